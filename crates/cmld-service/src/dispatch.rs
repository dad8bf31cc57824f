//! Inbound message dispatch.
//!
//! Every complete frame from the companion agent is decoded into an
//! [`AgentMessage`] and routed to the container. Handler failures are
//! logged and contained here; only an undecodable frame propagates, and
//! that tears the connection down.

use tracing::{debug, error, info, warn};

use cmld_core::{Container, ContainerState};

use crate::engine::Shared;
use crate::protocol::{AgentMessage, ProtocolError};

impl Shared {
    /// Decode and handle one frame payload.
    ///
    /// Messages with an unknown code or missing fields are skipped.
    pub(crate) fn handle_payload(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        match AgentMessage::decode_payload(payload) {
            Ok(msg) => {
                self.handle_message(msg);
                Ok(())
            }
            Err(e) if e.is_unrecognized() => {
                warn!(error = %e, "Ignoring unrecognized message from companion agent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn handle_message(&self, msg: AgentMessage) {
        let Some(container) = self.container.upgrade() else {
            warn!(code = msg.code().as_str_name(), "Container is gone; dropping agent message");
            return;
        };
        let container: &dyn Container = &*container;

        debug!(
            container = %container.description(),
            code = msg.code().as_str_name(),
            "Received message from companion agent"
        );

        match msg {
            AgentMessage::BootCompleted => {
                info!(container = %container.description(), "Container boot completed");
                container.set_state(ContainerState::Running);
            }
            AgentMessage::AudioSuspendCompleted | AgentMessage::AudioResumeCompleted => {}
            AgentMessage::SuspendCompleted => container.set_screen_on(false),
            AgentMessage::ResumeCompleted => container.set_screen_on(true),
            AgentMessage::Shutdown => self.handle_shutdown(container),
            AgentMessage::MasterClear => {
                info!(container = %container.description(), "Companion agent requested wipe");
                if let Err(e) = container.wipe() {
                    error!(container = %container.description(), error = %e, "Failed to wipe container");
                }
            }
            AgentMessage::ConnectivityChange(connectivity) => {
                info!(
                    container = %container.description(),
                    connectivity = %connectivity,
                    "Companion agent reported connectivity"
                );
                // Stored first so the resulting notification is not echoed back
                self.connectivity.set(connectivity);
                container.set_connectivity(connectivity);
            }
            AgentMessage::Identity(update) => {
                debug!(
                    imei = update.imei.is_some(),
                    mac = update.mac.is_some(),
                    phone_number = update.phone_number.is_some(),
                    "Applying identity update"
                );
                update.apply_to(container);
            }
            AgentMessage::ContainerCfgNameRequest => {
                if let Err(e) = self.send_container_cfg_name() {
                    warn!(error = %e, "Failed to reply with container name");
                }
            }
            AgentMessage::ContainerCfgDnsRequest => {
                if let Err(e) = self.send_container_cfg_dns() {
                    warn!(error = %e, "Failed to reply with container DNS server");
                }
            }
            AgentMessage::ExecCapSystime { path, params } => {
                let mut argv = Vec::with_capacity(params.len() + 1);
                argv.push(path);
                argv.extend(params);

                info!(container = %container.description(), argv = ?argv, "Executing with time capability");
                if let Err(e) = container.exec_cap_systime(&argv) {
                    warn!(container = %container.description(), error = %e, "Privileged exec failed");
                }
            }
            AgentMessage::AuditAck(ack) => {
                if let Err(e) = container.audit_process_ack(&ack) {
                    error!(container = %container.description(), error = %e, "Failed to process audit ack");
                }
            }
        }
    }

    fn handle_shutdown(&self, container: &dyn Container) {
        match container.state() {
            ContainerState::ShuttingDown => {
                info!(container = %container.description(), "Container is already shutting down");
            }
            ContainerState::Stopped => {
                error!(
                    container = %container.description(),
                    "Companion agent requested shutdown of a stopped container"
                );
            }
            _ => {
                info!(container = %container.description(), "Companion agent requested shutdown");
                if let Err(e) = container.stop() {
                    warn!(container = %container.description(), error = %e, "Failed to stop container");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use cmld_core::{Connectivity, IdentityUpdate, ServiceConfig};
    use cmld_test_utils::FakeContainer;
    use prost::Message as _;

    use crate::ServiceEngine;
    use crate::proto;

    fn setup() -> (Rc<FakeContainer>, ServiceEngine) {
        let container = Rc::new(FakeContainer::new());
        let engine = ServiceEngine::new(FakeContainer::weak(&container), ServiceConfig::new());
        (container, engine)
    }

    #[test]
    fn test_boot_completed_sets_running() {
        let (container, engine) = setup();
        container.set_state(ContainerState::Booting);
        engine.shared.handle_message(AgentMessage::BootCompleted);
        assert_eq!(container.state(), ContainerState::Running);
    }

    #[test]
    fn test_suspend_resume_toggle_screen() {
        let (container, engine) = setup();
        container.set_screen_on(true);

        engine.shared.handle_message(AgentMessage::SuspendCompleted);
        assert!(!container.screen_on());

        engine.shared.handle_message(AgentMessage::ResumeCompleted);
        assert!(container.screen_on());
    }

    #[test]
    fn test_shutdown_running_stops_once() {
        let (container, engine) = setup();
        container.set_state(ContainerState::Running);
        engine.shared.handle_message(AgentMessage::Shutdown);
        assert_eq!(container.stop_count(), 1);
    }

    #[test]
    fn test_shutdown_when_stopped_does_not_stop() {
        let (container, engine) = setup();
        container.set_state(ContainerState::Stopped);
        engine.shared.handle_message(AgentMessage::Shutdown);
        assert_eq!(container.stop_count(), 0);
    }

    #[test]
    fn test_shutdown_when_shutting_down_does_not_stop() {
        let (container, engine) = setup();
        container.set_state(ContainerState::ShuttingDown);
        engine.shared.handle_message(AgentMessage::Shutdown);
        assert_eq!(container.stop_count(), 0);
    }

    #[test]
    fn test_master_clear_wipes() {
        let (container, engine) = setup();
        engine.shared.handle_message(AgentMessage::MasterClear);
        assert_eq!(container.wipe_count(), 1);
    }

    #[test]
    fn test_connectivity_change_is_stored_and_propagated() {
        let (container, engine) = setup();
        engine
            .shared
            .handle_message(AgentMessage::ConnectivityChange(Connectivity::MobileAndWifi));

        assert_eq!(engine.connectivity(), Connectivity::MobileAndWifi);
        assert_eq!(container.connectivity(), Connectivity::MobileAndWifi);
    }

    #[test]
    fn test_identity_only_mac() {
        let (container, engine) = setup();
        container.set_imei("490154203237518");
        container.set_phone_number("+491234");

        engine.shared.handle_message(AgentMessage::Identity(IdentityUpdate {
            mac: Some("02:00:00:00:00:01".into()),
            ..Default::default()
        }));

        assert_eq!(container.mac_address().as_deref(), Some("02:00:00:00:00:01"));
        assert_eq!(container.imei().as_deref(), Some("490154203237518"));
        assert_eq!(container.phone_number().as_deref(), Some("+491234"));
    }

    #[test]
    fn test_exec_builds_argv() {
        let (container, engine) = setup();
        engine.shared.handle_message(AgentMessage::ExecCapSystime {
            path: "/system/bin/date".into(),
            params: vec!["-s".into(), "20240101.000000".into()],
        });

        assert_eq!(
            container.exec_calls(),
            vec![vec![
                "/system/bin/date".to_string(),
                "-s".to_string(),
                "20240101.000000".to_string()
            ]]
        );
    }

    #[test]
    fn test_exec_failure_is_contained() {
        let (container, engine) = setup();
        container.fail_exec(true);
        engine.shared.handle_message(AgentMessage::ExecCapSystime {
            path: "/bin/false".into(),
            params: vec![],
        });
        assert_eq!(container.exec_calls().len(), 1);
    }

    #[test]
    fn test_audit_ack_forwarded() {
        let (container, engine) = setup();
        engine
            .shared
            .handle_message(AgentMessage::AuditAck(vec![1, 2, 3]));
        assert_eq!(container.audit_acks(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_cfg_requests_without_connection_are_contained() {
        let (container, engine) = setup();
        engine.shared.handle_message(AgentMessage::ContainerCfgNameRequest);
        engine.shared.handle_message(AgentMessage::ContainerCfgDnsRequest);
        assert_eq!(container.stop_count(), 0);
    }

    #[test]
    fn test_unknown_code_is_skipped() {
        let (_container, engine) = setup();
        let payload = proto::ServiceToCmldMessage {
            code: Some(250),
            ..Default::default()
        }
        .encode_to_vec();
        assert!(engine.shared.handle_payload(&payload).is_ok());
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let (_container, engine) = setup();
        assert!(engine.shared.handle_payload(&[0x0a, 0xff]).is_err());
    }

    #[test]
    fn test_codeless_payload_is_an_error() {
        let (container, engine) = setup();
        container.set_state(ContainerState::Booting);

        assert!(engine.shared.handle_payload(&[]).is_err());
        assert!(engine.shared.handle_payload(&[0x1a, 0x01, b'x']).is_err());
        assert_eq!(container.state(), ContainerState::Booting);
        assert_eq!(container.imei(), None);
    }

    #[test]
    fn test_container_gone() {
        let (container, engine) = setup();
        drop(container);
        // Must not panic
        engine.shared.handle_message(AgentMessage::BootCompleted);
    }
}
