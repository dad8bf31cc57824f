//! End-to-end tests for the service channel over a real Unix socket.
//!
//! Each test starts an engine for a [`FakeContainer`] in a temporary
//! directory and plays the companion agent with [`AgentClient`].

use std::rc::Rc;
use std::time::Duration;

use prost::Message as _;
use tempfile::TempDir;
use tokio::task::LocalSet;

use cmld_core::{Connectivity, Container, ContainerState, Error, IdentityUpdate};
use cmld_service::{
    AgentClient, AgentMessage, AuditBridge, CmldMessage, Delivery, ServiceCommand, ServiceEngine,
    proto,
};
use cmld_test_utils::{FakeContainer, TEST_TIMEOUT, service_config_in, wait_until};

/// How long to wait before concluding that nothing was sent.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

fn start_engine(dir: &TempDir, container: &Rc<FakeContainer>) -> ServiceEngine {
    cmld_core::logging::init_test_logging();
    let engine = ServiceEngine::new(FakeContainer::weak(container), service_config_in(dir.path()));
    engine.start_pre_clone().unwrap();
    engine.start_child().unwrap();
    engine.start_pre_exec().unwrap();
    engine
}

async fn connect(engine: &ServiceEngine) -> AgentClient {
    let client = AgentClient::connect(&engine.socket_path()).await.unwrap();
    assert!(wait_until(TEST_TIMEOUT, || engine.is_connected()).await);
    client
}

async fn expect_message(client: &mut AgentClient) -> CmldMessage {
    client
        .recv_timeout(TEST_TIMEOUT)
        .await
        .unwrap()
        .expect("no message from cmld")
}

async fn expect_nothing(client: &mut AgentClient) {
    let msg = client.recv_timeout(QUIET_PERIOD).await.unwrap();
    assert_eq!(msg, None);
}

#[tokio::test]
async fn boot_completed_sets_running() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            container.set_state(ContainerState::Booting);

            let mut client = connect(&engine).await;
            client.send(&AgentMessage::BootCompleted).await.unwrap();

            assert!(
                wait_until(TEST_TIMEOUT, || container.state() == ContainerState::Running).await
            );
        })
        .await;
}

#[tokio::test]
async fn name_and_dns_requests_are_answered() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());
    container.set_name("a0");
    container.set_dns_server(Some("10.0.2.3"));

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client.send(&AgentMessage::ContainerCfgNameRequest).await.unwrap();
            assert_eq!(
                expect_message(&mut client).await,
                CmldMessage::ContainerCfgName("a0".into())
            );

            client.send(&AgentMessage::ContainerCfgDnsRequest).await.unwrap();
            assert_eq!(
                expect_message(&mut client).await,
                CmldMessage::ContainerCfgDns(Some("10.0.2.3".into()))
            );
        })
        .await;
}

#[tokio::test]
async fn connectivity_change_is_pushed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            container.set_connectivity(Connectivity::WifiOnly);
            assert_eq!(
                expect_message(&mut client).await,
                CmldMessage::ConnectivityChange(Connectivity::WifiOnly)
            );
            assert_eq!(engine.connectivity(), Connectivity::WifiOnly);

            // Same value again: observers fire, nothing is sent
            container.set_connectivity(Connectivity::WifiOnly);
            expect_nothing(&mut client).await;
            assert!(!engine.reconcile_connectivity().unwrap());
        })
        .await;
}

#[tokio::test]
async fn agent_connectivity_is_not_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client
                .send(&AgentMessage::ConnectivityChange(Connectivity::MobileOnly))
                .await
                .unwrap();
            assert!(
                wait_until(TEST_TIMEOUT, || {
                    container.connectivity() == Connectivity::MobileOnly
                })
                .await
            );
            assert_eq!(engine.connectivity(), Connectivity::MobileOnly);
            expect_nothing(&mut client).await;
        })
        .await;
}

#[tokio::test]
async fn missed_change_is_reconciled_after_connect() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);

            // No agent yet: the push fails and is only logged
            container.set_connectivity(Connectivity::MobileAndWifi);
            assert_eq!(engine.connectivity(), Connectivity::Offline);

            let mut client = connect(&engine).await;
            assert!(engine.reconcile_connectivity().unwrap());
            assert_eq!(
                expect_message(&mut client).await,
                CmldMessage::ConnectivityChange(Connectivity::MobileAndWifi)
            );
        })
        .await;
}

#[tokio::test]
async fn decode_failure_closes_connection_and_agent_can_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client.send_raw(&[0x0a, 0xff, 0xff]).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);
            assert!(engine.is_listening());
            assert!(matches!(
                client.recv_timeout(TEST_TIMEOUT).await,
                Err(Error::PeerClosed)
            ));

            let mut client = connect(&engine).await;
            container.set_state(ContainerState::Booting);
            client.send(&AgentMessage::BootCompleted).await.unwrap();
            assert!(
                wait_until(TEST_TIMEOUT, || container.state() == ContainerState::Running).await
            );
        })
        .await;
}

#[tokio::test]
async fn codeless_frame_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            container.set_state(ContainerState::Booting);
            let mut client = connect(&engine).await;

            client.send_raw(&[]).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);
            assert_eq!(container.state(), ContainerState::Booting);

            // Same for a frame with fields but no code
            let mut client = connect(&engine).await;
            client.send_raw(&[0x1a, 0x01, b'x']).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);
            assert_eq!(container.state(), ContainerState::Booting);
            assert_eq!(container.imei(), None);

            let mut client = connect(&engine).await;
            client.send(&AgentMessage::BootCompleted).await.unwrap();
            assert!(
                wait_until(TEST_TIMEOUT, || container.state() == ContainerState::Running).await
            );
        })
        .await;
}

#[tokio::test]
async fn peer_close_then_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);

            let client = connect(&engine).await;
            drop(client);
            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);

            let mut client = connect(&engine).await;
            client.send(&AgentMessage::MasterClear).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || container.wipe_count() == 1).await);
        })
        .await;
}

#[tokio::test]
async fn message_before_close_is_still_handled() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client.send(&AgentMessage::MasterClear).await.unwrap();
            client.shutdown().await.unwrap();

            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);
            assert_eq!(container.wipe_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client.send_unframed(&u32::MAX.to_be_bytes()).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || !engine.is_connected()).await);
            assert!(engine.is_listening());
        })
        .await;
}

#[tokio::test]
async fn unknown_message_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            let unknown = proto::ServiceToCmldMessage {
                code: Some(99),
                ..Default::default()
            };
            client.send_raw(&unknown.encode_to_vec()).await.unwrap();
            client.send(&AgentMessage::MasterClear).await.unwrap();

            assert!(wait_until(TEST_TIMEOUT, || container.wipe_count() == 1).await);
            assert!(engine.is_connected());
        })
        .await;
}

#[tokio::test]
async fn frames_in_one_write_are_all_handled() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            let mut bytes = Vec::new();
            for msg in [AgentMessage::SuspendCompleted, AgentMessage::MasterClear] {
                let payload = msg.to_proto().encode_to_vec();
                bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                bytes.extend_from_slice(&payload);
            }
            container.set_screen_on(true);
            client.send_unframed(&bytes).await.unwrap();

            assert!(wait_until(TEST_TIMEOUT, || container.wipe_count() == 1).await);
            assert!(!container.screen_on());
        })
        .await;
}

#[tokio::test]
async fn commands_reach_the_agent() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            assert_eq!(
                engine.send_command(ServiceCommand::Suspend).unwrap(),
                Delivery::Sent
            );
            assert_eq!(expect_message(&mut client).await, CmldMessage::Suspend);

            // Audio resume is never put on the wire
            assert_eq!(
                engine.send_command(ServiceCommand::AudioResume).unwrap(),
                Delivery::Skipped
            );
            expect_nothing(&mut client).await;

            assert_eq!(engine.stop().unwrap(), Delivery::Sent);
            assert_eq!(expect_message(&mut client).await, CmldMessage::Shutdown);
        })
        .await;
}

#[tokio::test]
async fn shutdown_request_stops_container_once() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = Rc::new(start_engine(&dir, &container));

            // Like cmld, stopping the container asks the agent to shut down
            let hook_engine = Rc::downgrade(&engine);
            container.on_stop(move || {
                if let Some(engine) = hook_engine.upgrade() {
                    engine.stop().unwrap();
                }
            });

            container.set_state(ContainerState::Running);
            let mut client = connect(&engine).await;

            client.send(&AgentMessage::Shutdown).await.unwrap();
            assert_eq!(expect_message(&mut client).await, CmldMessage::Shutdown);
            assert_eq!(container.stop_count(), 1);
            assert_eq!(container.state(), ContainerState::ShuttingDown);

            // Already shutting down: logged only
            client.send(&AgentMessage::Shutdown).await.unwrap();
            expect_nothing(&mut client).await;
            assert_eq!(container.stop_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn shutdown_request_for_stopped_container_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            container.set_state(ContainerState::Stopped);
            let mut client = connect(&engine).await;

            client.send(&AgentMessage::Shutdown).await.unwrap();
            client.send(&AgentMessage::MasterClear).await.unwrap();
            assert!(wait_until(TEST_TIMEOUT, || container.wipe_count() == 1).await);
            assert_eq!(container.stop_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn identity_update_with_only_mac() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());
    container.set_imei("490154203237518");

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client
                .send(&AgentMessage::Identity(IdentityUpdate {
                    mac: Some("02:00:00:00:00:01".into()),
                    ..Default::default()
                }))
                .await
                .unwrap();

            assert!(wait_until(TEST_TIMEOUT, || container.mac_address().is_some()).await);
            assert_eq!(container.imei().as_deref(), Some("490154203237518"));
            assert_eq!(container.phone_number(), None);
        })
        .await;
}

#[tokio::test]
async fn exec_and_audit_ack_are_delegated() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            client
                .send(&AgentMessage::ExecCapSystime {
                    path: "/system/bin/date".into(),
                    params: vec!["-s".into(), "20240101.000000".into()],
                })
                .await
                .unwrap();
            client.send(&AgentMessage::AuditAck(b"ack-1".to_vec())).await.unwrap();

            assert!(wait_until(TEST_TIMEOUT, || !container.audit_acks().is_empty()).await);
            assert_eq!(
                container.exec_calls(),
                vec![vec![
                    "/system/bin/date".to_string(),
                    "-s".to_string(),
                    "20240101.000000".to_string(),
                ]]
            );
            assert_eq!(container.audit_acks(), vec![b"ack-1".to_vec()]);
        })
        .await;
}

#[tokio::test]
async fn audit_bridge_reaches_the_agent() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;

            let record = CmldMessage::AuditRecord(b"type=AVC msg=audit(1)".to_vec());
            engine.send_record(&record.encode_payload()).unwrap();
            assert_eq!(expect_message(&mut client).await, record);

            engine.notify_remaining(4096).unwrap();
            assert_eq!(
                expect_message(&mut client).await,
                CmldMessage::AuditNotify {
                    remaining_storage: 4096
                }
            );

            engine.complete().unwrap();
            assert_eq!(expect_message(&mut client).await, CmldMessage::AuditComplete);
        })
        .await;
}

#[tokio::test]
async fn new_connection_replaces_the_old_one() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut first = connect(&engine).await;

            let mut second = AgentClient::connect(&engine.socket_path()).await.unwrap();
            assert!(matches!(
                first.recv_timeout(TEST_TIMEOUT).await,
                Err(Error::PeerClosed)
            ));
            assert!(engine.is_connected());

            engine.send_command(ServiceCommand::Resume).unwrap();
            assert_eq!(expect_message(&mut second).await, CmldMessage::Resume);
        })
        .await;
}

#[tokio::test]
async fn cleanup_releases_everything_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            let mut client = connect(&engine).await;
            assert_eq!(container.observer_count(), 1);

            engine.cleanup();
            assert!(!engine.is_connected());
            assert!(!engine.is_listening());
            assert_eq!(container.observer_count(), 0);
            assert!(matches!(
                client.recv_timeout(TEST_TIMEOUT).await,
                Err(Error::PeerClosed)
            ));

            engine.cleanup();
            assert_eq!(container.unregistered_observers(), 1);

            // Disconnected policy applies again
            assert!(matches!(engine.stop(), Err(Error::NotConnected)));
            assert_eq!(
                engine.send_command(ServiceCommand::Suspend).unwrap(),
                Delivery::Deferred
            );
        })
        .await;
}

#[tokio::test]
async fn dropping_engine_unregisters_observer() {
    let dir = tempfile::tempdir().unwrap();
    let container = Rc::new(FakeContainer::new());

    LocalSet::new()
        .run_until(async {
            let engine = start_engine(&dir, &container);
            assert_eq!(container.observer_count(), 1);
            drop(engine);
            assert_eq!(container.observer_count(), 0);

            // A later notification finds no observer
            container.set_connectivity(Connectivity::WifiOnly);
        })
        .await;
}
