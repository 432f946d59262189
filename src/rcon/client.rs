//! RCON client session.

use crate::rcon::packet::{MAX_BODY_LEN, Packet, PacketType};
use crate::rcon::{RconError, Result};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound for connecting and for each command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Packets with foreign ids skipped before a command gives up.
const MAX_UNMATCHED: usize = 32;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
}

/// Check a login reply against the id of the login request.
///
/// Servers echo the request id on success and answer `-1` otherwise.
pub fn check_auth_response(sent_id: i32, response: &Packet) -> Result<()> {
    if response.id == sent_id {
        Ok(())
    } else {
        Err(RconError::AuthenticationFailed)
    }
}

struct Inner {
    state: SessionState,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    next_id: i32,
}

impl Inner {
    fn next_request_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id == i32::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }

    /// Drop buffered and already-received input after a framing error.
    ///
    /// The stream is resynchronized at the next packet boundary the server
    /// writes; stray replies to earlier requests are then skipped by id.
    fn discard_pending(&mut self) {
        self.read_buf.clear();
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let mut scratch = [0u8; 1024];
        // stops on WouldBlock, EOF or error; EOF surfaces on the next read
        while let Ok(read) = stream.try_read(&mut scratch) {
            if read == 0 {
                break;
            }
        }
    }

    fn reset(&mut self) {
        self.stream = None;
        self.read_buf.clear();
        self.state = SessionState::Disconnected;
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(RconError::NotAuthenticated)?;
        stream.write_all(&packet.encode()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.read_buf)? {
                return Ok(packet);
            }

            let stream = self.stream.as_mut().ok_or(RconError::NotAuthenticated)?;
            let read = stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                return Err(RconError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    /// Read the login reply, skipping the empty response some servers send first.
    async fn read_auth_response(&mut self) -> Result<Packet> {
        loop {
            let packet = self.read_packet().await?;
            if packet.kind == PacketType::Response {
                debug!("Skipping response packet {} before auth reply", packet.id);
                continue;
            }
            return Ok(packet);
        }
    }

    async fn exchange(&mut self, id: i32, command: &str) -> Result<String> {
        self.send(&Packet::command(id, command)).await?;

        for _ in 0..MAX_UNMATCHED {
            let packet = self.read_packet().await?;
            if packet.id == id {
                return Ok(packet.body);
            }
            debug!(
                "Discarding response for request {} while waiting for {}",
                packet.id, id
            );
        }

        Err(RconError::UnmatchedResponse { expected: id })
    }
}

/// An authenticated RCON session.
///
/// Commands are serialized: a second [`execute`](RconClient::execute) waits
/// until the first one has its response.
pub struct RconClient {
    addr: String,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconClient").field("addr", &self.addr).finish()
    }
}

impl RconClient {
    /// Connect and log in.
    ///
    /// # Errors
    ///
    /// [`RconError::Timeout`] when the TCP connect takes longer than
    /// `timeout_after`. [`RconError::AuthenticationFailed`] when the server
    /// rejects the password, closes the connection or sends no login reply
    /// within `timeout_after`.
    pub async fn connect(
        host: &str,
        port: u16,
        password: &str,
        timeout_after: Duration,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        debug!("Connecting to RCON at {}", addr);

        let stream = timeout(timeout_after, TcpStream::connect(&addr))
            .await
            .map_err(|_| RconError::Timeout(timeout_after))??;

        let mut inner = Inner {
            state: SessionState::Connected,
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(MAX_BODY_LEN),
            next_id: 1,
        };

        let id = inner.next_request_id();
        let login = async {
            inner.send(&Packet::auth(id, password)).await?;
            inner.read_auth_response().await
        };
        let outcome = timeout(timeout_after, login).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(RconError::Io(e))) => {
                warn!("RCON login to {} failed: {}", addr, e);
                inner.reset();
                return Err(RconError::AuthenticationFailed);
            }
            Ok(Err(e)) => {
                inner.reset();
                return Err(e);
            }
            Err(_) => {
                warn!("No RCON login reply from {} within {:?}", addr, timeout_after);
                inner.reset();
                return Err(RconError::AuthenticationFailed);
            }
        };

        if let Err(e) = check_auth_response(id, &response) {
            warn!("RCON login to {} rejected", addr);
            inner.reset();
            return Err(e);
        }

        inner.state = SessionState::Authenticated;
        info!("RCON session established with {}", addr);

        Ok(Self {
            addr,
            inner: Mutex::new(inner),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    /// Run a command with [`DEFAULT_TIMEOUT`] and return its output.
    pub async fn execute(&self, command: &str) -> Result<String> {
        self.execute_with_timeout(command, DEFAULT_TIMEOUT).await
    }

    /// Run a command and return its output.
    ///
    /// I/O errors close the session. Timeouts and malformed packets leave it
    /// open; late replies to a timed-out command are discarded by id. After a
    /// malformed packet, input already received is dropped so the next
    /// command starts on a fresh packet boundary.
    pub async fn execute_with_timeout(&self, command: &str, timeout_after: Duration) -> Result<String> {
        if command.len() > MAX_BODY_LEN {
            return Err(RconError::CommandTooLong {
                len: command.len(),
                max: MAX_BODY_LEN,
            });
        }

        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Authenticated {
            return Err(RconError::NotAuthenticated);
        }

        let id = inner.next_request_id();
        debug!("RCON {} -> [{}] {}", self.addr, id, command);

        match timeout(timeout_after, inner.exchange(id, command)).await {
            Err(_) => Err(RconError::Timeout(timeout_after)),
            Ok(Ok(body)) => Ok(body),
            Ok(Err(RconError::Io(e))) => {
                warn!("RCON connection to {} lost: {}", self.addr, e);
                inner.reset();
                Err(RconError::Io(e))
            }
            Ok(Err(RconError::Malformed(reason))) => {
                warn!("Malformed RCON reply from {}: {}", self.addr, reason);
                inner.discard_pending();
                Err(RconError::Malformed(reason))
            }
            Ok(Err(e)) => Err(e),
        }
    }

    /// Close the socket. Calling this on a closed session does nothing.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown().await;
            debug!("Closed RCON session with {}", self.addr);
        }
        inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_id_match() {
        let reply = Packet::decode(&mut BytesMut::from(
            &Packet::new(4, PacketType::ExecCommand, "").encode()[..],
        ))
        .unwrap()
        .unwrap();
        assert!(check_auth_response(4, &reply).is_ok());

        let rejected = Packet::new(-1, PacketType::ExecCommand, "");
        assert!(matches!(
            check_auth_response(4, &rejected),
            Err(RconError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_request_ids_wrap_to_one() {
        let mut inner = Inner {
            state: SessionState::Disconnected,
            stream: None,
            read_buf: BytesMut::new(),
            next_id: i32::MAX,
        };
        assert_eq!(inner.next_request_id(), i32::MAX);
        assert_eq!(inner.next_request_id(), 1);
        assert_eq!(inner.next_request_id(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout_on_unroutable_address() {
        // 10.255.255.1 is not routed in CI; either timeout or an immediate I/O error
        let result = RconClient::connect("10.255.255.1", 25575, "pw", Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(RconError::Timeout(_)) | Err(RconError::Io(_))
        ));
    }
}
