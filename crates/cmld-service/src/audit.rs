//! Audit bridge.
//!
//! The audit subsystem hands records to the companion agent through the
//! service channel. Records arrive already encoded as
//! `CmldToServiceMessage` payloads and are framed and written unchanged.

use tracing::{error, trace};

use cmld_core::Result;

use crate::engine::{Delivery, ServiceEngine};
use crate::protocol::{CmldMessage, ServiceCommand};

/// Channel from the audit subsystem to a container's companion agent.
pub trait AuditBridge {
    /// Forward one pre-packed audit record.
    fn send_record(&self, record: &[u8]) -> Result<()>;

    /// Tell the agent how much audit storage is left.
    fn notify_remaining(&self, remaining_storage: u64) -> Result<()>;

    /// Tell the agent that all stored records were delivered.
    fn complete(&self) -> Result<()>;
}

impl ServiceEngine {
    /// Forward a pre-packed audit record.
    pub fn audit_send_record(&self, record: &[u8]) -> Result<Delivery> {
        trace!(len = record.len(), container = %self.shared.describe(), "Sending packed audit record");
        self.shared.send_payload(record).inspect_err(|e| {
            error!(
                container = %self.shared.describe(),
                error = %e,
                "Failed to send packed audit record"
            );
        })
    }

    /// Notify the agent about remaining audit storage.
    pub fn audit_notify(&self, remaining_storage: u64) -> Result<Delivery> {
        trace!(
            remaining_storage,
            container = %self.shared.describe(),
            "Notifying about stored audit events"
        );
        self.shared
            .send_message(&CmldMessage::AuditNotify { remaining_storage })
    }
}

impl AuditBridge for ServiceEngine {
    fn send_record(&self, record: &[u8]) -> Result<()> {
        self.audit_send_record(record).map(|_| ())
    }

    fn notify_remaining(&self, remaining_storage: u64) -> Result<()> {
        self.audit_notify(remaining_storage).map(|_| ())
    }

    fn complete(&self) -> Result<()> {
        self.send_command(ServiceCommand::AuditComplete).map(|_| ())
    }
}
