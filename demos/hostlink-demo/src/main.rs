//! hostlink demo: handshake with a host PC, pulse, report a short word list, exit
//!
//! ```text
//! hostlink-demo <config.json>     connect to the host PC named in the config
//! hostlink-demo --simulate        run against an in-process simulated host
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hostlink_core::HostlinkResult;
use hostlink_session::{Connection, HostPcConfig, SyncPulseConfig, SyncPulser, TaskMessage};
use hostlink_test::{HostProfile, HostSimulator};
use serde_json::{json, Map};

const WORDS: [&str; 4] = ["PIANO", "RIVER", "CANDLE", "GARDEN"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("Usage: hostlink-demo <config.json> | --simulate");
        return;
    }

    // Keeps the simulated host alive for the whole session
    let mut _host = None;
    let connection = if args[1] == "--simulate" {
        let host = HostSimulator::new(HostProfile::jittery(0, 2, 7).with_reply("PING", "PONG"));
        let connection = Connection::new(HostPcConfig::default(), Arc::new(host.connector()));
        _host = Some(host);
        connection
    } else {
        match HostPcConfig::from_path(&args[1]) {
            Ok(config) => Connection::tcp(config),
            Err(e) => {
                tracing::error!("failed to load config: {e}");
                std::process::exit(1);
            }
        }
    };

    let outcome = run_session(&connection);
    if let Err(e) = connection.shutdown() {
        tracing::warn!("shutdown: {e}");
    }
    if let Err(e) = outcome {
        tracing::error!("session ended with an error: {e}");
        std::process::exit(1);
    }
}

fn run_session(connection: &Connection) -> HostlinkResult<()> {
    connection.connect()?;
    if let Some(report) = connection.latency_report() {
        println!(
            "Connected: {} (max {:?}, mean {:?} over {} round trips)",
            connection.state(),
            report.max,
            report.mean,
            report.samples.len()
        );
    }

    let pulser = SyncPulser::new(connection.clone(), SyncPulseConfig::default())?;
    pulser.start()?;

    connection.send(TaskMessage::Session {
        session: connection.config().session.session,
    })?;
    connection.send(TaskMessage::State {
        name: "ENCODING".into(),
        extra: None,
    })?;
    for (serial_pos, word) in WORDS.iter().enumerate() {
        connection.send(TaskMessage::Word {
            word: word.to_string(),
            serial_pos: serial_pos as u32,
            stim: false,
            extra: Map::new(),
        })?;
        thread::sleep(Duration::from_millis(250));
    }

    let reply = connection.send_and_wait("PING", json!({}), "PONG", Duration::from_secs(1));
    match reply {
        Ok(reply) => println!("Host answered {}", reply.msg_type()),
        Err(e) => println!("No PONG from host: {e}"),
    }

    pulser.stop();
    println!("Sent {} sync pulses", pulser.pulse_count());

    // Queued ahead of the shutdown request, so it is written first
    connection.send(TaskMessage::Exit)
}
