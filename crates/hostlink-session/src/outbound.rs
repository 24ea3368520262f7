//! Typed task-to-host messages
//!
//! Experiment code reports what the participant is doing through these.
//! None of them expects a reply.

use hostlink_core::HostlinkResult;
use hostlink_wire::{types, HostMessage};
use serde_json::{Map, Value};

use crate::connection::Connection;

/// Closed-loop stimulation decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosedLoopKind {
    Stim,
    Sham,
    Normalize,
}

impl ClosedLoopKind {
    pub fn msg_type(&self) -> &'static str {
        match self {
            ClosedLoopKind::Stim => "CLSTIM",
            ClosedLoopKind::Sham => "CLSHAM",
            ClosedLoopKind::Normalize => "CLNORMALIZE",
        }
    }
}

/// Continuous closed-loop control
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CclControl {
    Pause,
    Resume,
    Stop,
}

impl CclControl {
    pub fn msg_type(&self) -> &'static str {
        match self {
            CclControl::Pause => "CCLPAUSESTIM",
            CclControl::Resume => "CCLRESUMESTIM",
            CclControl::Stop => "CCLSTOPSTIM",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskMessage {
    /// Answer to a distractor math problem
    Math {
        problem: String,
        response: String,
        response_time_ms: u32,
        correct: bool,
    },
    Stim,
    StimSelect {
        tag: String,
    },
    ClosedLoop {
        kind: ClosedLoopKind,
        classify_ms: u32,
    },
    CclStart {
        duration_s: u32,
    },
    Ccl(CclControl),
    Session {
        session: u32,
    },
    /// Experiment state change such as `ENCODING` or `RECALL`
    State {
        name: String,
        extra: Option<Map<String, Value>>,
    },
    Trial {
        trial: u32,
        stim: bool,
    },
    Word {
        word: String,
        serial_pos: u32,
        stim: bool,
        /// Merged into the payload without replacing the fields above
        extra: Map<String, Value>,
    },
    Exit,
}

impl TaskMessage {
    pub fn msg_type(&self) -> &str {
        match self {
            TaskMessage::Math { .. } => "MATH",
            TaskMessage::Stim => "STIM",
            TaskMessage::StimSelect { .. } => "STIMSELECT",
            TaskMessage::ClosedLoop { kind, .. } => kind.msg_type(),
            TaskMessage::CclStart { .. } => "CCLSTARTSTIM",
            TaskMessage::Ccl(control) => control.msg_type(),
            TaskMessage::Session { .. } => "SESSION",
            TaskMessage::State { name, .. } => name.as_str(),
            TaskMessage::Trial { .. } => "TRIAL",
            TaskMessage::Word { .. } => "WORD",
            TaskMessage::Exit => types::EXIT,
        }
    }

    /// Wire message stamped with the current time
    pub fn into_message(self) -> HostMessage {
        let message = HostMessage::new(self.msg_type());
        match self {
            TaskMessage::Math {
                problem,
                response,
                response_time_ms,
                correct,
            } => message
                .with_field("problem", problem)
                .with_field("response", response)
                .with_field("response_time_ms", response_time_ms.to_string())
                .with_field("correct", if correct { "True" } else { "False" }),
            TaskMessage::StimSelect { tag } => message.with_field("stimtag", tag),
            TaskMessage::ClosedLoop { classify_ms, .. } => {
                message.with_field("classifyms", classify_ms)
            }
            TaskMessage::CclStart { duration_s } => message.with_field("duration", duration_s),
            TaskMessage::Session { session } => message.with_field("session", session),
            TaskMessage::State { extra, .. } => match extra {
                Some(extra) => message.with_data(Value::Object(extra)),
                None => message,
            },
            TaskMessage::Trial { trial, stim } => {
                message.with_field("trial", trial).with_field("stim", stim)
            }
            TaskMessage::Word {
                word,
                serial_pos,
                stim,
                extra,
            } => {
                let mut data = Map::new();
                data.insert("word".into(), word.into());
                data.insert("serialPos".into(), serial_pos.into());
                data.insert("stim".into(), stim.into());
                for (key, value) in extra {
                    data.entry(key).or_insert(value);
                }
                message.with_data(Value::Object(data))
            }
            TaskMessage::Stim | TaskMessage::Ccl(_) | TaskMessage::Exit => message,
        }
    }
}

impl Connection {
    /// Queue a typed message for the host PC
    pub fn send(&self, message: TaskMessage) -> HostlinkResult<()> {
        self.send_host_message(message.into_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(message: TaskMessage) -> (String, Value) {
        let wire = message.into_message();
        (wire.msg_type, wire.data)
    }

    #[test]
    fn test_math_fields_are_strings() {
        let (ty, data) = wire(TaskMessage::Math {
            problem: "3+4".into(),
            response: "7".into(),
            response_time_ms: 1250,
            correct: true,
        });
        assert_eq!(ty, "MATH");
        assert_eq!(
            data,
            json!({"problem": "3+4", "response": "7", "response_time_ms": "1250", "correct": "True"})
        );
    }

    #[test]
    fn test_closed_loop_types() {
        let (ty, data) = wire(TaskMessage::ClosedLoop {
            kind: ClosedLoopKind::Sham,
            classify_ms: 1366,
        });
        assert_eq!(ty, "CLSHAM");
        assert_eq!(data, json!({"classifyms": 1366}));
        assert_eq!(TaskMessage::Ccl(CclControl::Resume).msg_type(), "CCLRESUMESTIM");
        assert_eq!(data_of(TaskMessage::CclStart { duration_s: 30 }), json!({"duration": 30}));
    }

    fn data_of(message: TaskMessage) -> Value {
        message.into_message().data
    }

    #[test]
    fn test_word_extra_does_not_override() {
        let mut extra = Map::new();
        extra.insert("word".into(), json!("OVERRIDE"));
        extra.insert("list".into(), json!(4));
        let (ty, data) = wire(TaskMessage::Word {
            word: "APPLE".into(),
            serial_pos: 2,
            stim: false,
            extra,
        });
        assert_eq!(ty, "WORD");
        assert_eq!(
            data,
            json!({"word": "APPLE", "serialPos": 2, "stim": false, "list": 4})
        );
    }

    #[test]
    fn test_state_message_uses_name_as_type() {
        let mut extra = Map::new();
        extra.insert("duration".into(), json!(1.5));
        let (ty, data) = wire(TaskMessage::State {
            name: "ISI".into(),
            extra: Some(extra),
        });
        assert_eq!(ty, "ISI");
        assert_eq!(data, json!({"duration": 1.5}));

        let (ty, data) = wire(TaskMessage::State {
            name: "REST".into(),
            extra: None,
        });
        assert_eq!(ty, "REST");
        assert_eq!(data, json!({}));
    }

    #[test]
    fn test_empty_payloads() {
        for message in [TaskMessage::Stim, TaskMessage::Ccl(CclControl::Stop), TaskMessage::Exit] {
            assert_eq!(data_of(message), json!({}));
        }
        assert_eq!(TaskMessage::Exit.msg_type(), "EXIT");
    }

    #[test]
    fn test_disabled_connection_accepts_messages() {
        let conn = Connection::disabled();
        assert!(conn.send(TaskMessage::Trial { trial: 1, stim: true }).is_ok());
    }
}
