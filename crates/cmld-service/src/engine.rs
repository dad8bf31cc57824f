//! Per-container service engine.
//!
//! One [`ServiceEngine`] exists per container. It owns the rendezvous
//! socket the companion agent connects to and, once accepted, the single
//! connected endpoint. Both endpoints are driven by `spawn_local` tasks on
//! the current-thread reactor; each task is owned by a [`Registration`]
//! guard that aborts it on drop, so a registration lives exactly as long as
//! the endpoint slot holding it.
//!
//! Bring-up happens in three phases around the container fork:
//!
//! ```text
//! start_pre_clone  -> socket allocated       (parent, before fork)
//! start_child      -> socket bound            (child, container namespaces)
//! start_pre_exec   -> listening + observer    (child, before exec)
//! ```
//!
//! The engine must be started and driven from within a tokio `LocalSet`.
//!
//! Container callbacks may re-enter the engine (a container stop sends
//! SHUTDOWN, a connectivity update notifies the bridge), so no `RefCell`
//! borrow is ever held across a container call.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use bytes::BytesMut;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use cmld_core::constants::READ_BUFFER_SIZE;
use cmld_core::{Connectivity, Container, Error, ObserverId, Result, ServiceConfig};

use crate::protocol::{ProtocolError, try_decode_frame};
use crate::socket;

/// Reason a connected endpoint was torn down.
///
/// Read-side failures always close the connection. Write failures never
/// do; they surface as [`Error::Send`] to the caller instead.
#[derive(Debug, Error)]
pub enum Teardown {
    /// The agent closed its end.
    #[error("peer closed the connection")]
    PeerClosed,

    /// A frame could not be decoded.
    #[error("decode failed: {0}")]
    DecodeFailed(#[source] ProtocolError),

    /// The socket reported an error condition.
    #[error("exception on connection: {0}")]
    Exception(#[source] io::Error),
}

impl From<Teardown> for Error {
    fn from(t: Teardown) -> Self {
        match t {
            Teardown::PeerClosed => Error::PeerClosed,
            Teardown::DecodeFailed(e) => e.into(),
            Teardown::Exception(e) => Error::Io(e),
        }
    }
}

/// Successful outcome of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was written to the connected endpoint.
    Sent,
    /// No agent is connected yet; the command was dropped.
    Deferred,
    /// The command is never sent. This applies to AUDIO_RESUME to a
    /// connected agent, and is a successful no-op rather than a send
    /// failure.
    Skipped,
}

/// Reactor registration for one endpoint. Aborts the driving task on drop.
pub(crate) struct Registration {
    task: AbortHandle,
}

impl Registration {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            task: tokio::task::spawn_local(future).abort_handle(),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Rendezvous socket state across the bring-up phases.
pub(crate) enum Rendezvous {
    Closed,
    Created(OwnedFd),
    Bound(OwnedFd),
    /// The listener is owned by the accept task.
    Listening(Registration),
}

impl Rendezvous {
    fn phase(&self) -> &'static str {
        match self {
            Rendezvous::Closed => "closed",
            Rendezvous::Created(_) => "created",
            Rendezvous::Bound(_) => "bound",
            Rendezvous::Listening(_) => "listening",
        }
    }
}

/// The accepted endpoint to the companion agent.
pub(crate) struct Connection {
    pub(crate) id: u64,
    pub(crate) stream: Rc<UnixStream>,
    _registration: Registration,
}

/// State shared between the engine handle, its tasks and the observer.
pub(crate) struct Shared {
    pub(crate) container: Weak<dyn Container>,
    pub(crate) config: ServiceConfig,
    pub(crate) rendezvous: RefCell<Rendezvous>,
    pub(crate) connection: RefCell<Option<Connection>>,
    /// Last connectivity sent to or received from the agent.
    pub(crate) connectivity: Cell<Connectivity>,
    pub(crate) observer: Cell<Option<ObserverId>>,
    next_connection_id: Cell<u64>,
}

impl Shared {
    /// Upgrade the container reference.
    pub(crate) fn container(&self) -> Result<Rc<dyn Container>> {
        self.container.upgrade().ok_or_else(|| Error::Container {
            message: "container is gone".to_string(),
        })
    }

    /// Container description for log lines.
    pub(crate) fn describe(&self) -> String {
        self.container
            .upgrade()
            .map(|c| c.description())
            .unwrap_or_else(|| "<gone>".to_string())
    }

    pub(crate) fn is_current(&self, id: u64) -> bool {
        self.connection
            .borrow()
            .as_ref()
            .is_some_and(|conn| conn.id == id)
    }

    fn on_accept(self: &Rc<Self>, stream: UnixStream) {
        // Release the previous endpoint before installing the new one
        let previous = self.connection.borrow_mut().take();
        if let Some(previous) = previous {
            warn!(
                container = %self.describe(),
                previous = previous.id,
                "Companion agent reconnected while a connection was open; replacing it"
            );
            drop(previous);
        }

        let id = self.next_connection_id.get() + 1;
        self.next_connection_id.set(id);

        let stream = Rc::new(stream);
        let registration = Registration::spawn(connection_task(
            Rc::downgrade(self),
            id,
            Rc::clone(&stream),
            self.config.max_message_size,
        ));

        *self.connection.borrow_mut() = Some(Connection {
            id,
            stream,
            _registration: registration,
        });

        info!(container = %self.describe(), connection = id, "Companion agent connected");
    }

    /// Close the connection `id` if it is still the current one.
    fn close_connection(&self, id: u64, reason: Teardown) {
        let closed = {
            let mut slot = self.connection.borrow_mut();
            if slot.as_ref().is_some_and(|conn| conn.id == id) {
                slot.take()
            } else {
                None
            }
        };

        if closed.is_none() {
            return;
        }

        match reason {
            Teardown::PeerClosed => {
                info!(container = %self.describe(), connection = id, "Companion agent disconnected")
            }
            reason => warn!(
                container = %self.describe(),
                connection = id,
                reason = %reason,
                "Closing companion agent connection"
            ),
        }
        drop(closed);
    }

    fn close_rendezvous(&self) {
        let previous = std::mem::replace(&mut *self.rendezvous.borrow_mut(), Rendezvous::Closed);
        drop(previous);
    }
}

async fn accept_task(shared: Weak<Shared>, listener: UnixListener) {
    loop {
        let accepted = listener.accept().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match accepted {
            Ok((stream, _addr)) => shared.on_accept(stream),
            Err(e) => {
                let err = Error::Accept(e);
                warn!(
                    container = %shared.describe(),
                    error = %err,
                    "Exception on service socket; closing it, the agent cannot reconnect"
                );
                // Drops this task's own registration
                shared.close_rendezvous();
                return;
            }
        }
    }
}

async fn connection_task(shared: Weak<Shared>, id: u64, stream: Rc<UnixStream>, max_size: usize) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let reason = 'conn: loop {
        if let Err(e) = stream.readable().await {
            break Teardown::Exception(e);
        }

        loop {
            buf.reserve(READ_BUFFER_SIZE);
            let closed = match stream.try_read_buf(&mut buf) {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break 'conn Teardown::Exception(e),
            };

            let Some(shared) = shared.upgrade() else {
                return;
            };

            // Frames that arrived before a close are still handled
            loop {
                match try_decode_frame(&mut buf, max_size) {
                    Ok(Some(payload)) => {
                        if let Err(e) = shared.handle_payload(&payload) {
                            break 'conn Teardown::DecodeFailed(e);
                        }
                        // A handler may have replaced or closed this connection
                        if !shared.is_current(id) {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => break 'conn Teardown::DecodeFailed(e),
                }
            }

            if closed {
                if !buf.is_empty() {
                    debug!(connection = id, pending = buf.len(), "Discarding partial frame");
                }
                break 'conn Teardown::PeerClosed;
            }
        }
    };

    if let Some(shared) = shared.upgrade() {
        shared.close_connection(id, reason);
    }
}

/// The per-container service engine.
pub struct ServiceEngine {
    pub(crate) shared: Rc<Shared>,
}

impl ServiceEngine {
    /// Create an engine for `container`. No resources are acquired yet.
    pub fn new(container: Weak<dyn Container>, config: ServiceConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                container,
                config,
                rendezvous: RefCell::new(Rendezvous::Closed),
                connection: RefCell::new(None),
                connectivity: Cell::new(Connectivity::Offline),
                observer: Cell::new(None),
                next_connection_id: Cell::new(0),
            }),
        }
    }

    /// Allocate the rendezvous socket. Called before the container is forked.
    pub fn start_pre_clone(&self) -> Result<()> {
        self.shared.config.validate()?;

        let mut rendezvous = self.shared.rendezvous.borrow_mut();
        if !matches!(*rendezvous, Rendezvous::Closed) {
            return Err(Error::InvalidState {
                expected: "closed".to_string(),
                actual: rendezvous.phase().to_string(),
            });
        }

        *rendezvous = Rendezvous::Created(socket::create_rendezvous()?);
        debug!("Service socket created");
        Ok(())
    }

    /// Bind the rendezvous socket. Called in the forked child.
    pub fn start_child(&self) -> Result<()> {
        let mut rendezvous = self.shared.rendezvous.borrow_mut();
        let fd = match std::mem::replace(&mut *rendezvous, Rendezvous::Closed) {
            Rendezvous::Created(fd) => fd,
            other => {
                let actual = other.phase().to_string();
                *rendezvous = other;
                return Err(Error::InvalidState {
                    expected: "created".to_string(),
                    actual,
                });
            }
        };

        // On failure the socket is dropped and the rendezvous stays closed
        socket::bind_rendezvous(&fd, &self.shared.config.socket_path())?;
        *rendezvous = Rendezvous::Bound(fd);
        Ok(())
    }

    /// Start listening and subscribe to connectivity notifications. Called
    /// before the container's entry point is executed.
    pub fn start_pre_exec(&self) -> Result<()> {
        {
            let mut rendezvous = self.shared.rendezvous.borrow_mut();
            let fd = match std::mem::replace(&mut *rendezvous, Rendezvous::Closed) {
                Rendezvous::Bound(fd) => fd,
                other => {
                    let actual = other.phase().to_string();
                    *rendezvous = other;
                    return Err(Error::InvalidState {
                        expected: "bound".to_string(),
                        actual,
                    });
                }
            };

            let listener = socket::listen_rendezvous(fd, self.shared.config.listen_backlog)?;
            let registration =
                Registration::spawn(accept_task(Rc::downgrade(&self.shared), listener));
            *rendezvous = Rendezvous::Listening(registration);
        }

        let container = self.shared.container().map_err(|e| Error::ObserverRegistration {
            message: e.to_string(),
        })?;
        let id = container
            .register_observer(crate::connectivity::observer(Rc::downgrade(&self.shared)))
            .map_err(|e| Error::ObserverRegistration {
                message: e.to_string(),
            })?;
        self.shared.observer.set(Some(id));

        info!(
            container = %container.description(),
            path = %self.shared.config.socket_path().display(),
            "Service socket listening"
        );
        Ok(())
    }

    /// Release the connection, the rendezvous socket and the observer
    /// subscription, in that order. Safe to call any number of times.
    pub fn cleanup(&self) {
        let connection = self.shared.connection.borrow_mut().take();
        if let Some(connection) = connection {
            debug!(connection = connection.id, "Releasing companion agent connection");
            drop(connection);
        }

        self.shared.close_rendezvous();

        if let Some(id) = self.shared.observer.take() {
            if let Some(container) = self.shared.container.upgrade() {
                container.unregister_observer(id);
            }
        }
    }

    /// Check if the rendezvous socket is accepting connections.
    pub fn is_listening(&self) -> bool {
        matches!(*self.shared.rendezvous.borrow(), Rendezvous::Listening(_))
    }

    /// Check if a companion agent is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connection.borrow().is_some()
    }

    /// Last connectivity exchanged with the agent.
    pub fn connectivity(&self) -> Connectivity {
        self.shared.connectivity.get()
    }

    /// Path of the service socket.
    pub fn socket_path(&self) -> PathBuf {
        self.shared.config.socket_path()
    }
}

impl fmt::Debug for ServiceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEngine")
            .field("socket_path", &self.socket_path())
            .field("rendezvous", &self.shared.rendezvous.borrow().phase())
            .field("connected", &self.is_connected())
            .field("connectivity", &self.connectivity())
            .finish()
    }
}

impl Drop for ServiceEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
