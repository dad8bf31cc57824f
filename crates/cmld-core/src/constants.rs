//! Protocol and configuration constants for cmld.

// =============================================================================
// Socket Conventions
// =============================================================================

/// Directory holding the daemon's well-known sockets.
pub const DEFAULT_SOCKET_DIR: &str = "/run/socket";

/// Name of the per-container service socket inside [`DEFAULT_SOCKET_DIR`].
pub const SERVICE_SOCKET_NAME: &str = "cml-service";

/// Environment variable overriding the socket directory.
pub const SOCKET_DIR_ENV: &str = "CML_SOCKET_DIR";

/// Default listen backlog for the rendezvous channel.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 16;

// =============================================================================
// Wire Constants
// =============================================================================

/// Length of the frame header (4 bytes, big-endian u32).
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum protobuf payload size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Initial capacity of a connection's read buffer.
pub const READ_BUFFER_SIZE: usize = 8192;
