//! Inbound message queue - filled by the stream reader, drained on the loop

use std::collections::VecDeque;

use hostlink_core::HostlinkError;
use hostlink_wire::InboundMessage;
use parking_lot::Mutex;

/// One item handed over by the stream reader
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    Message(InboundMessage),
    /// A line that could not be decoded
    Malformed { raw: String, error: HostlinkError },
    /// The host PC closed the stream
    Closed,
}

/// Thread-safe FIFO of inbound events
#[derive(Debug, Default)]
pub struct InboundMessageQueue {
    events: Mutex<VecDeque<InboundEvent>>,
}

impl InboundMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: InboundEvent) {
        self.events.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<InboundEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::WireTime;
    use hostlink_wire::HostMessage;

    fn message(t: &str) -> InboundEvent {
        InboundEvent::Message(InboundMessage {
            message: HostMessage::new(t),
            received_at: WireTime::now(),
            raw: String::new(),
        })
    }

    #[test]
    fn test_fifo() {
        let queue = InboundMessageQueue::new();
        queue.push(message("A"));
        queue.push(InboundEvent::Closed);
        queue.push(message("B"));
        assert_eq!(queue.len(), 3);

        assert!(matches!(queue.pop(), Some(InboundEvent::Message(m)) if m.msg_type() == "A"));
        assert_eq!(queue.pop(), Some(InboundEvent::Closed));
        queue.clear();
        assert!(queue.is_empty());
    }
}
