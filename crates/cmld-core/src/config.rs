//! Service channel configuration.
//!
//! Every container gets its own service socket at a fixed, well-known path.
//! Inside the container's mount namespace that path is always
//! `<socket_dir>/<socket_name>`; the directory can be overridden for
//! standalone runs and tests.

use std::path::PathBuf;

use crate::constants::{
    DEFAULT_LISTEN_BACKLOG, DEFAULT_SOCKET_DIR, MAX_MESSAGE_SIZE, SERVICE_SOCKET_NAME,
    SOCKET_DIR_ENV,
};
use crate::error::{Error, Result};

/// Configuration for one service engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Directory holding the service socket.
    pub socket_dir: PathBuf,
    /// File name of the service socket.
    pub socket_name: String,
    /// Backlog passed to `listen(2)`.
    pub listen_backlog: i32,
    /// Largest protobuf payload accepted or sent.
    pub max_message_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            socket_name: SERVICE_SOCKET_NAME.to_string(),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from defaults, honouring `CML_SOCKET_DIR`.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var_os(SOCKET_DIR_ENV) {
            Some(dir) if !dir.is_empty() => config.with_socket_dir(dir),
            _ => config,
        }
    }

    /// Set the socket directory.
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Set the socket file name.
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = name.into();
        self
    }

    /// Set the listen backlog.
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Full path of the service socket.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_name)
    }

    /// Check the values before any resource is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.socket_name.is_empty() || self.socket_name.contains('/') {
            return Err(Error::Config {
                message: format!("invalid socket name '{}'", self.socket_name),
            });
        }
        if self.listen_backlog <= 0 {
            return Err(Error::Config {
                message: format!("listen backlog must be positive, got {}", self.listen_backlog),
            });
        }
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(Error::Config {
                message: format!("max message size out of range: {}", self.max_message_size),
            });
        }
        // sun_path holds 108 bytes including the terminating NUL
        let path = self.socket_path();
        if path.as_os_str().len() >= 108 {
            return Err(Error::Config {
                message: format!("socket path too long: {}", path.display()),
            });
        }
        Ok(())
    }
}
