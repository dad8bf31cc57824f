//! Recording container double.
//!
//! Implements [`Container`] with plain interior mutability and records
//! every collaborator call so tests can assert on side effects. Observers
//! are notified on every `set_connectivity`, changed value or not.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use uuid::Uuid;

use cmld_core::{
    Connectivity, Container, ContainerObserver, ContainerState, Error, ObserverId, Result,
};

type SharedObserver = Rc<dyn Fn(&dyn Container)>;

/// Container double recording all calls.
pub struct FakeContainer {
    uuid: Uuid,
    name: RefCell<String>,
    dns_server: RefCell<Option<String>>,
    state: Cell<ContainerState>,
    screen_on: Cell<bool>,
    connectivity: Cell<Connectivity>,
    imei: RefCell<Option<String>>,
    mac: RefCell<Option<String>>,
    phone_number: RefCell<Option<String>>,

    stops: Cell<usize>,
    wipes: Cell<usize>,
    exec_calls: RefCell<Vec<Vec<String>>>,
    audit_acks: RefCell<Vec<Vec<u8>>>,

    observers: RefCell<Vec<(ObserverId, SharedObserver)>>,
    next_observer: Cell<u64>,
    unregistered: Cell<usize>,

    fail_observer_registration: Cell<bool>,
    fail_exec: Cell<bool>,
    stop_hook: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Default for FakeContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeContainer {
    /// A stopped container named `test`.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: RefCell::new("test".to_string()),
            dns_server: RefCell::new(None),
            state: Cell::new(ContainerState::Stopped),
            screen_on: Cell::new(false),
            connectivity: Cell::new(Connectivity::Offline),
            imei: RefCell::new(None),
            mac: RefCell::new(None),
            phone_number: RefCell::new(None),
            stops: Cell::new(0),
            wipes: Cell::new(0),
            exec_calls: RefCell::new(Vec::new()),
            audit_acks: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            unregistered: Cell::new(0),
            fail_observer_registration: Cell::new(false),
            fail_exec: Cell::new(false),
            stop_hook: RefCell::new(None),
        }
    }

    /// Non-owning handle as taken by services.
    pub fn weak(this: &Rc<Self>) -> Weak<dyn Container> {
        let weak: Weak<Self> = Rc::downgrade(this);
        weak
    }

    pub fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_string();
    }

    pub fn set_dns_server(&self, dns: Option<&str>) {
        *self.dns_server.borrow_mut() = dns.map(str::to_string);
    }

    pub fn imei(&self) -> Option<String> {
        self.imei.borrow().clone()
    }

    pub fn mac_address(&self) -> Option<String> {
        self.mac.borrow().clone()
    }

    pub fn phone_number(&self) -> Option<String> {
        self.phone_number.borrow().clone()
    }

    /// Number of `stop()` calls.
    pub fn stop_count(&self) -> usize {
        self.stops.get()
    }

    /// Number of `wipe()` calls.
    pub fn wipe_count(&self) -> usize {
        self.wipes.get()
    }

    /// Argument vectors passed to `exec_cap_systime`.
    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.exec_calls.borrow().clone()
    }

    /// Payloads passed to `audit_process_ack`.
    pub fn audit_acks(&self) -> Vec<Vec<u8>> {
        self.audit_acks.borrow().clone()
    }

    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Number of `unregister_observer` calls for known ids.
    pub fn unregistered_observers(&self) -> usize {
        self.unregistered.get()
    }

    /// Make `register_observer` fail.
    pub fn fail_observer_registration(&self, fail: bool) {
        self.fail_observer_registration.set(fail);
    }

    /// Make `exec_cap_systime` fail (calls are still recorded).
    pub fn fail_exec(&self, fail: bool) {
        self.fail_exec.set(fail);
    }

    /// Run `hook` from inside every `stop()` call, after the state change.
    pub fn on_stop(&self, hook: impl Fn() + 'static) {
        *self.stop_hook.borrow_mut() = Some(Rc::new(hook));
    }
}

impl Container for FakeContainer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> String {
        self.name.borrow().clone()
    }

    fn description(&self) -> String {
        format!("{} ({})", self.name.borrow(), self.uuid)
    }

    fn dns_server(&self) -> Option<String> {
        self.dns_server.borrow().clone()
    }

    fn state(&self) -> ContainerState {
        self.state.get()
    }

    fn set_state(&self, state: ContainerState) {
        self.state.set(state);
    }

    fn screen_on(&self) -> bool {
        self.screen_on.get()
    }

    fn set_screen_on(&self, on: bool) {
        self.screen_on.set(on);
    }

    fn connectivity(&self) -> Connectivity {
        self.connectivity.get()
    }

    fn set_connectivity(&self, connectivity: Connectivity) {
        self.connectivity.set(connectivity);

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
        *self.imei.borrow_mut() = Some(imei.to_string());
    }

    fn set_mac_address(&self, mac: &str) {
        *self.mac.borrow_mut() = Some(mac.to_string());
    }

    fn set_phone_number(&self, number: &str) {
        *self.phone_number.borrow_mut() = Some(number.to_string());
    }

    fn stop(&self) -> Result<()> {
        self.stops.set(self.stops.get() + 1);
        self.state.set(ContainerState::ShuttingDown);

        let hook = self.stop_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn wipe(&self) -> Result<()> {
        self.wipes.set(self.wipes.get() + 1);
        Ok(())
    }

    fn exec_cap_systime(&self, argv: &[String]) -> Result<()> {
        self.exec_calls.borrow_mut().push(argv.to_vec());
        if self.fail_exec.get() {
            return Err(Error::Container {
                message: "exec failed".to_string(),
            });
        }
        Ok(())
    }

    fn audit_process_ack(&self, ack: &[u8]) -> Result<()> {
        self.audit_acks.borrow_mut().push(ack.to_vec());
        Ok(())
    }

    fn register_observer(&self, observer: ContainerObserver) -> Result<ObserverId> {
        if self.fail_observer_registration.get() {
            return Err(Error::Container {
                message: "observer registration refused".to_string(),
            });
        }

        let id = ObserverId(self.next_observer.get() + 1);
        self.next_observer.set(id.0);
        self.observers.borrow_mut().push((id, Rc::from(observer)));
        Ok(id)
    }

    fn unregister_observer(&self, id: ObserverId) {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        if observers.len() != before {
            self.unregistered.set(self.unregistered.get() + 1);
        }
    }
}
