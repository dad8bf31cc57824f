//! Companion-agent side of the service channel.
//!
//! [`AgentClient`] connects to a container's service socket and speaks the
//! agent's half of the protocol. It backs the `cml-service agent` command
//! and the integration tests.

use std::path::Path;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use cmld_core::constants::{MAX_MESSAGE_SIZE, READ_BUFFER_SIZE};
use cmld_core::{Error, Result};

use crate::protocol::{AgentMessage, CmldMessage, encode_frame, encode_message, try_decode_frame};

/// Client for the agent end of a service socket.
pub struct AgentClient {
    stream: UnixStream,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl AgentClient {
    /// Connect to the service socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;

        Ok(Self {
            stream,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Send one message to cmld.
    pub async fn send(&mut self, msg: &AgentMessage) -> Result<()> {
        let frame = encode_message(&msg.to_proto(), self.max_message_size)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Frame and send an arbitrary payload.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload, self.max_message_size)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Write bytes to the socket as they are, without a frame header.
    pub async fn send_unframed(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Wait for the next message from cmld.
    ///
    /// Fails with [`Error::PeerClosed`] when cmld closes the connection.
    pub async fn recv(&mut self) -> Result<CmldMessage> {
        loop {
            if let Some(payload) = try_decode_frame(&mut self.read_buffer, self.max_message_size)? {
                return Ok(CmldMessage::decode_payload(&payload)?);
            }

            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(Error::PeerClosed);
            }
        }
    }

    /// Like [`recv`](Self::recv), but gives up after `timeout` and returns
    /// `None`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CmldMessage>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Close the write half, signalling end of stream to cmld.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
