//! Standalone container for running one service engine outside the daemon.
//!
//! `cml-service serve` uses this to host the service socket for a companion
//! agent without a real container behind it. Every mutation is logged.
//! A stop request is sent to the agent as SHUTDOWN; if that is not
//! possible the container is forced down immediately.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cmld_core::{
    Connectivity, Container, ContainerObserver, ContainerState, Error, ObserverId, Result,
    ServiceConfig,
};

use crate::engine::ServiceEngine;

type SharedObserver = Rc<dyn Fn(&dyn Container)>;

/// Standalone container settings.
#[derive(Debug, Clone)]
pub struct StandaloneConfig {
    /// Container name reported to the agent.
    pub name: String,
    /// DNS server reported to the agent.
    pub dns_server: Option<String>,
    /// Run privileged exec requests from the agent.
    pub allow_exec: bool,
}

/// In-memory container hosting one service engine.
pub struct StandaloneContainer {
    uuid: Uuid,
    config: StandaloneConfig,
    state: Cell<ContainerState>,
    screen_on: Cell<bool>,
    connectivity: Cell<Connectivity>,
    imei: RefCell<Option<String>>,
    mac: RefCell<Option<String>>,
    phone_number: RefCell<Option<String>>,
    observers: RefCell<Vec<(ObserverId, SharedObserver)>>,
    next_observer: Cell<u64>,
    engine: RefCell<Option<ServiceEngine>>,
    stop_requested: Notify,
}

impl StandaloneContainer {
    /// Create a stopped container.
    pub fn new(config: StandaloneConfig) -> Rc<Self> {
        Rc::new(Self {
            uuid: Uuid::new_v4(),
            config,
            state: Cell::new(ContainerState::Stopped),
            screen_on: Cell::new(true),
            connectivity: Cell::new(Connectivity::Offline),
            imei: RefCell::new(None),
            mac: RefCell::new(None),
            phone_number: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            engine: RefCell::new(None),
            stop_requested: Notify::new(),
        })
    }

    /// Bring the service engine up and mark the container as booting.
    ///
    /// Runs all three start phases back to back since there is no fork.
    pub fn start(self: &Rc<Self>, service: ServiceConfig) -> Result<()> {
        if self.engine.borrow().is_some() {
            return Err(Error::InvalidState {
                expected: ContainerState::Stopped.to_string(),
                actual: self.state.get().to_string(),
            });
        }

        self.set_state(ContainerState::Starting);
        let container: Rc<dyn Container> = self.clone();
        let engine = ServiceEngine::new(Rc::downgrade(&container), service);

        let started = engine
            .start_pre_clone()
            .and_then(|_| engine.start_child())
            .and_then(|_| engine.start_pre_exec());
        if let Err(e) = started {
            drop(engine);
            self.set_state(ContainerState::Stopped);
            return Err(e);
        }

        info!(path = %engine.socket_path().display(), "Waiting for companion agent");
        *self.engine.borrow_mut() = Some(engine);
        self.set_state(ContainerState::Booting);
        Ok(())
    }

    /// Wait until a stop was requested, either locally or by the agent.
    pub async fn stop_requested(&self) {
        self.stop_requested.notified().await;
    }

    /// Give the agent `grace` to shut down, then release the engine.
    pub async fn finish(&self, grace: Duration) {
        if self.state.get() == ContainerState::ShuttingDown {
            debug!(grace = ?grace, "Waiting for companion agent to shut down");
            tokio::time::sleep(grace).await;
        }

        let engine = self.engine.borrow_mut().take();
        drop(engine);
        self.set_state(ContainerState::Stopped);
    }

    /// Check if the companion agent is connected.
    pub fn agent_connected(&self) -> bool {
        self.engine
            .borrow()
            .as_ref()
            .is_some_and(|engine| engine.is_connected())
    }

    fn spawn_exec(&self, argv: &[String]) -> Result<()> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::Container {
            message: "empty argument vector".to_string(),
        })?;

        let mut child = tokio::process::Command::new(program).args(args).spawn()?;
        let program = program.clone();
        tokio::task::spawn_local(async move {
            match child.wait().await {
                Ok(status) => info!(program = %program, status = %status, "Privileged exec finished"),
                Err(e) => warn!(program = %program, error = %e, "Failed to wait for privileged exec"),
            }
        });
        Ok(())
    }
}

impl Container for StandaloneContainer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        format!("{} ({})", self.config.name, self.uuid)
    }

    fn dns_server(&self) -> Option<String> {
        self.config.dns_server.clone()
    }

    fn state(&self) -> ContainerState {
        self.state.get()
    }

    fn set_state(&self, state: ContainerState) {
        let previous = self.state.replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Container state changed");
        }
    }

    fn screen_on(&self) -> bool {
        self.screen_on.get()
    }

    fn set_screen_on(&self, on: bool) {
        info!(screen_on = on, "Screen state changed");
        self.screen_on.set(on);
    }

    fn connectivity(&self) -> Connectivity {
        self.connectivity.get()
    }

    fn set_connectivity(&self, connectivity: Connectivity) {
        info!(connectivity = %connectivity, "Connectivity changed");
        self.connectivity.set(connectivity);

        // Observers may register or unregister while being notified
        let observers: Vec<SharedObserver> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in observers {
            observer(self);
        }
    }

    fn set_imei(&self, imei: &str) {
        info!(imei, "IMEI set");
        *self.imei.borrow_mut() = Some(imei.to_string());
    }

    fn set_mac_address(&self, mac: &str) {
        info!(mac, "MAC address set");
        *self.mac.borrow_mut() = Some(mac.to_string());
    }

    fn set_phone_number(&self, number: &str) {
        info!(phone_number = number, "Phone number set");
        *self.phone_number.borrow_mut() = Some(number.to_string());
    }

    fn stop(&self) -> Result<()> {
        let delivery = match self.engine.borrow().as_ref() {
            Some(engine) => engine.stop(),
            None => Err(Error::NotConnected),
        };

        match delivery {
            Ok(_) => self.set_state(ContainerState::ShuttingDown),
            Err(e) => {
                warn!(error = %e, "Graceful shutdown not possible; forcing container down");
                self.set_state(ContainerState::Stopped);
            }
        }
        self.stop_requested.notify_one();
        Ok(())
    }

    fn wipe(&self) -> Result<()> {
        info!(container = %self.description(), "Wiping container data");
        self.imei.borrow_mut().take();
        self.mac.borrow_mut().take();
        self.phone_number.borrow_mut().take();
        Ok(())
    }

    fn exec_cap_systime(&self, argv: &[String]) -> Result<()> {
        if !self.config.allow_exec {
            return Err(Error::Container {
                message: "privileged exec is disabled (use --allow-exec)".to_string(),
            });
        }
        self.spawn_exec(argv)
    }

    fn audit_process_ack(&self, ack: &[u8]) -> Result<()> {
        debug!(len = ack.len(), "Audit ack received");
        Ok(())
    }

    fn register_observer(&self, observer: ContainerObserver) -> Result<ObserverId> {
        let id = ObserverId(self.next_observer.get() + 1);
        self.next_observer.set(id.0);
        self.observers.borrow_mut().push((id, Rc::from(observer)));
        Ok(id)
    }

    fn unregister_observer(&self, id: ObserverId) {
        self.observers.borrow_mut().retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(allow_exec: bool) -> StandaloneConfig {
        StandaloneConfig {
            name: "a0".to_string(),
            dns_server: Some("10.0.2.3".to_string()),
            allow_exec,
        }
    }

    #[test]
    fn test_stop_without_engine_forces() {
        let container = StandaloneContainer::new(config(false));
        container.set_state(ContainerState::Running);
        container.stop().unwrap();
        assert_eq!(container.state(), ContainerState::Stopped);
    }

    #[test]
    fn test_exec_disabled() {
        let container = StandaloneContainer::new(config(false));
        let argv = vec!["/bin/true".to_string()];
        assert!(matches!(
            container.exec_cap_systime(&argv),
            Err(Error::Container { .. })
        ));
    }

    #[test]
    fn test_wipe_clears_identity() {
        let container = StandaloneContainer::new(config(false));
        container.set_imei("490154203237518");
        container.wipe().unwrap();
        assert!(container.imei.borrow().is_none());
    }

    #[tokio::test]
    async fn test_start_and_forced_stop() {
        let dir = tempdir().unwrap();
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                let container = StandaloneContainer::new(config(false));
                container
                    .start(ServiceConfig::new().with_socket_dir(dir.path()))
                    .unwrap();
                assert_eq!(container.state(), ContainerState::Booting);
                assert!(!container.agent_connected());

                // No agent connected, so stop escalates right away
                container.stop().unwrap();
                assert_eq!(container.state(), ContainerState::Stopped);

                container.stop_requested().await;
                container.finish(Duration::from_secs(5)).await;
                assert!(container.engine.borrow().is_none());
                assert!(container.observers.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = tempdir().unwrap();
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                let container = StandaloneContainer::new(config(false));
                let service = ServiceConfig::new().with_socket_dir(dir.path());
                container.start(service.clone()).unwrap();
                assert!(matches!(
                    container.start(service),
                    Err(Error::InvalidState { .. })
                ));
            })
            .await;
    }
}
