//! Per-container service channel between cmld and the companion agent.
//!
//! Every container runs a companion agent that talks to cmld over a Unix
//! stream socket at a fixed path inside the container. This crate provides
//! the cmld side of that channel:
//!
//! - **Engine**: rendezvous socket bring-up around the container fork, accept
//!   and reconnect handling, cleanup. See [`engine`].
//! - **Dispatch**: agent messages routed to container mutations.
//! - **Sender**: commands and replies to the agent, with the disconnected
//!   policy. See [`ServiceEngine::send_command`].
//! - **Connectivity bridge**: mirrors container connectivity to the agent.
//! - **Audit bridge**: forwards audit records. See [`AuditBridge`].
//!
//! # Wire Format
//!
//! Messages are framed as:
//! - 4 bytes: u32 big-endian length prefix
//! - N bytes: protobuf-encoded `CmldToServiceMessage` or `ServiceToCmldMessage`
//!
//! # Threading
//!
//! The engine is single-threaded. It must be driven by a current-thread
//! tokio runtime inside a `LocalSet`; endpoint tasks are spawned with
//! `spawn_local`.

pub mod audit;
pub mod cli;
pub mod client;
pub mod engine;
pub mod protocol;
pub mod socket;
pub mod standalone;

mod connectivity;
mod dispatch;
mod sender;

// Generated protobuf types
pub mod proto;

pub use audit::AuditBridge;
pub use cli::Cli;
pub use client::AgentClient;
pub use engine::{Delivery, ServiceEngine, Teardown};
pub use protocol::{AgentMessage, CmldMessage, ProtocolError, ServiceCommand};
pub use standalone::{StandaloneConfig, StandaloneContainer};
