//! Rendezvous socket plumbing.
//!
//! The service socket is brought up in three steps because the daemon forks
//! the container's execution context before the companion agent exists:
//!
//! 1. [`create_rendezvous`] before fork (allocates the socket)
//! 2. [`bind_rendezvous`] in the child, inside the container's mount namespace
//! 3. [`listen_rendezvous`] before exec, turning the socket into a tokio listener
//!
//! Writes to the connected endpoint go through [`send_nonblocking`], which
//! never waits for buffer space.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, Backlog, MsgFlags, SockFlag, SockType, UnixAddr, bind, listen, send, socket,
};
use tokio::net::UnixListener;
use tracing::debug;

use cmld_core::{Error, Result};

/// Allocate a non-blocking, close-on-exec Unix stream socket.
pub fn create_rendezvous() -> Result<OwnedFd> {
    socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        None,
    )
    .map_err(|errno| Error::ChannelCreate(errno.into()))
}

/// Bind the rendezvous socket to `path`.
///
/// A socket file left behind by a previous run is removed first. Anything
/// else occupying the path is an error.
pub fn bind_rendezvous(fd: &OwnedFd, path: &Path) -> Result<()> {
    let bind_err = |source: io::Error| Error::Bind {
        path: path.to_path_buf(),
        source,
    };

    remove_stale_socket(path).map_err(bind_err)?;

    let addr = UnixAddr::new(path).map_err(|errno| bind_err(errno.into()))?;
    bind(fd.as_raw_fd(), &addr).map_err(|errno| bind_err(errno.into()))?;

    debug!(path = %path.display(), "Service socket bound");
    Ok(())
}

/// Put the rendezvous socket into listening mode and hand it to tokio.
///
/// Must be called from within a tokio runtime.
pub fn listen_rendezvous(fd: OwnedFd, backlog: i32) -> Result<UnixListener> {
    let backlog = Backlog::new(backlog).map_err(|errno| Error::Listen(errno.into()))?;
    listen(&fd, backlog).map_err(|errno| Error::Listen(errno.into()))?;

    let std_listener = std::os::unix::net::UnixListener::from(fd);
    // SOCK_NONBLOCK was set at creation, set it again for sockets handed in
    // from elsewhere
    std_listener.set_nonblocking(true).map_err(Error::Listen)?;
    UnixListener::from_std(std_listener).map_err(Error::Listen)
}

/// Write all of `buf` without blocking.
///
/// Returns `WouldBlock` when the peer's receive buffer is full; a partial
/// frame may have been written in that case.
pub fn send_nonblocking(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    let flags = MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL;
    while !buf.is_empty() {
        match send(fd, buf, flags) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
    Ok(())
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists but is not a socket",
        ));
    }

    debug!(path = %path.display(), "Removing stale socket");
    std::fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use tempfile::tempdir;

    #[test]
    fn test_bind_creates_socket_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cml-service");

        let fd = create_rendezvous().unwrap();
        bind_rendezvous(&fd, &path).unwrap();

        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(metadata.file_type().is_socket());
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cml-service");

        // Leave a bound socket file behind without listening on it
        let first = create_rendezvous().unwrap();
        bind_rendezvous(&first, &path).unwrap();
        drop(first);

        let second = create_rendezvous().unwrap();
        bind_rendezvous(&second, &path).unwrap();
    }

    #[test]
    fn test_bind_refuses_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cml-service");
        std::fs::write(&path, b"not a socket").unwrap();

        let fd = create_rendezvous().unwrap();
        let err = bind_rendezvous(&fd, &path).unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
        assert!(err.is_setup());
    }

    #[test]
    fn test_bind_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("cml-service");

        let fd = create_rendezvous().unwrap();
        assert!(matches!(
            bind_rendezvous(&fd, &path),
            Err(Error::Bind { .. })
        ));
    }

    #[test]
    fn test_send_nonblocking_writes_everything() {
        let (a, mut b) = StdUnixStream::pair().unwrap();
        send_nonblocking(a.as_raw_fd(), b"hello").unwrap();

        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_send_nonblocking_full_buffer() {
        let (a, _b) = StdUnixStream::pair().unwrap();
        let chunk = vec![0u8; 64 * 1024];

        // The peer never reads, so the socket buffer fills up eventually
        let mut result = Ok(());
        for _ in 0..1024 {
            result = send_nonblocking(a.as_raw_fd(), &chunk);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_send_to_closed_peer_does_not_signal() {
        let (a, b) = StdUnixStream::pair().unwrap();
        drop(b);
        let err = send_nonblocking(a.as_raw_fd(), b"bye").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
