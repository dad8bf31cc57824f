//! cmld-core: Shared library for the container management daemon.
//!
//! This crate provides:
//! - The container collaborator interface used by per-container services
//! - Error types shared by all cmld crates
//! - Service configuration and well-known socket conventions
//! - Logging setup

pub mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod logging;

pub use config::ServiceConfig;
pub use container::{
    Connectivity, Container, ContainerObserver, ContainerState, IdentityUpdate, ObserverId,
};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
