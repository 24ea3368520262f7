//! Connection handshake
//!
//! ```text
//! task PC                         host PC
//!   CONNECTED        ------------>
//!                    <------------  CONNECTED_OK
//!   CONFIGURE        ------------>
//!                    <------------  CONFIGURE_OK
//!   HEARTBEAT x N    <----------->  HEARTBEAT_OK x N   (latency probe)
//!   HEARTBEAT ...    periodic from here on
//!   READY            ------------>
//!                    <------------  START
//! ```

use hostlink_core::HostlinkResult;
use hostlink_wire::{types, HostMessage};

use crate::connection::Connection;

impl Connection {
    /// Run every handshake step on the loop thread
    pub(crate) fn handshake(&self) -> HostlinkResult<()> {
        let timeout = self.inner.config.message_timeout();

        self.exchange(
            Some(HostMessage::new(types::CONNECTED)),
            vec![types::CONNECTED_OK.to_string()],
            timeout,
        )?;
        tracing::debug!("host PC acknowledged connection");

        let configure = HostMessage::new(types::CONFIGURE)
            .with_data(self.inner.config.session.to_configure_data());
        let reply = self.exchange(
            Some(configure),
            vec![types::CONFIGURE_OK.to_string()],
            timeout,
        )?;
        let host_config = reply.message.data;
        self.inner.reporter.report_event("host pc config", &host_config);
        *self.inner.host_config.lock() = Some(host_config);

        self.run_latency_probe()?;
        self.start_heartbeat()?;

        self.exchange(
            Some(HostMessage::new(types::READY)),
            vec![types::START.to_string()],
            timeout,
        )?;
        tracing::debug!("host PC started the session");
        Ok(())
    }
}
