//! Outbound commands to the companion agent.
//!
//! Disconnected policy:
//!
//! - plain commands ([`ServiceCommand`]) are dropped with [`Delivery::Deferred`],
//!   except SHUTDOWN, which fails with [`Error::NotConnected`] so the caller
//!   can force the container down right away
//! - replies and notifications carrying a payload fail with
//!   [`Error::NotConnected`]
//!
//! A failed write is returned as [`Error::Send`] and leaves the connection
//! open.

use std::os::fd::AsRawFd;

use tracing::{debug, info, trace, warn};

use cmld_core::{Connectivity, Error, Result};

use crate::engine::{Delivery, ServiceEngine, Shared};
use crate::protocol::{CmldMessage, ProtocolError, ServiceCommand, encode_frame};
use crate::socket::send_nonblocking;

impl Shared {
    /// Frame `payload` and write it to the connected endpoint.
    pub(crate) fn send_payload(&self, payload: &[u8]) -> Result<Delivery> {
        let frame = encode_frame(payload, self.config.max_message_size).map_err(|e| match e {
            ProtocolError::MessageTooLarge { .. } => Error::Send {
                message: e.to_string(),
            },
            e => e.into(),
        })?;

        let connection = self.connection.borrow();
        let Some(connection) = connection.as_ref() else {
            return Err(Error::NotConnected);
        };

        send_nonblocking(connection.stream.as_raw_fd(), &frame).map_err(|e| Error::Send {
            message: e.to_string(),
        })?;

        trace!(connection = connection.id, len = frame.len(), "Frame sent");
        Ok(Delivery::Sent)
    }

    pub(crate) fn send_message(&self, msg: &CmldMessage) -> Result<Delivery> {
        self.send_payload(&msg.encode_payload())
    }

    pub(crate) fn send_command(&self, command: ServiceCommand) -> Result<Delivery> {
        debug!(command = %command, "Sending command to companion agent");

        if self.connection.borrow().is_none() {
            if command == ServiceCommand::Shutdown {
                warn!(
                    container = %self.describe(),
                    "Cannot send shutdown, companion agent is not connected"
                );
                return Err(Error::NotConnected);
            }
            debug!(
                container = %self.describe(),
                command = %command,
                "Companion agent not connected yet; dropping command"
            );
            return Ok(Delivery::Deferred);
        }

        let Some(msg) = command.message() else {
            return Ok(Delivery::Skipped);
        };

        self.send_message(&msg).inspect_err(|e| {
            warn!(command = %command, error = %e, "Failed to send command to companion agent");
        })
    }

    pub(crate) fn send_container_cfg_name(&self) -> Result<Delivery> {
        let container = self.container()?;
        let name = container.name();
        info!(name = %name, container = %container.description(), "Sending container config name");
        self.send_message(&CmldMessage::ContainerCfgName(name))
    }

    pub(crate) fn send_container_cfg_dns(&self) -> Result<Delivery> {
        let container = self.container()?;
        let dns = container.dns_server();
        info!(
            dns = dns.as_deref().unwrap_or("<none>"),
            container = %container.description(),
            "Sending container config DNS server"
        );
        self.send_message(&CmldMessage::ContainerCfgDns(dns))
    }

    /// Push `connectivity` to the agent and remember it on success.
    pub(crate) fn send_connectivity(&self, connectivity: Connectivity) -> Result<Delivery> {
        info!(
            container = %self.describe(),
            connectivity = %connectivity,
            "Sending connectivity to companion agent"
        );
        let delivery = self.send_message(&CmldMessage::ConnectivityChange(connectivity))?;
        self.connectivity.set(connectivity);
        Ok(delivery)
    }
}

impl ServiceEngine {
    /// Ask the agent to shut the container down.
    ///
    /// Fails with [`Error::NotConnected`] when no agent is connected; the
    /// caller is expected to force the container down instead.
    pub fn stop(&self) -> Result<Delivery> {
        self.shared.send_command(ServiceCommand::Shutdown)
    }

    /// Send a plain command to the agent.
    pub fn send_command(&self, command: ServiceCommand) -> Result<Delivery> {
        self.shared.send_command(command)
    }

    /// Send the container name to the agent.
    pub fn send_container_cfg_name(&self) -> Result<Delivery> {
        self.shared.send_container_cfg_name()
    }

    /// Send the container DNS server to the agent.
    pub fn send_container_cfg_dns(&self) -> Result<Delivery> {
        self.shared.send_container_cfg_dns()
    }

    /// Push a connectivity value to the agent.
    pub fn send_connectivity(&self, connectivity: Connectivity) -> Result<Delivery> {
        self.shared.send_connectivity(connectivity)
    }
}
