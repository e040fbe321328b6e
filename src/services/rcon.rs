//! Remote console client - runs one command on the game server per session.
//!
//! Speaks the Source RCON protocol: every packet is
//! `size:i32le | id:i32le | type:i32le | body | 0x00 0x00`, where `size`
//! counts everything after itself. A session authenticates, sends one
//! command, reads one response and disconnects. The whole session is bounded
//! by a timeout so a stalled server cannot wedge a sweep.

use crate::{
    config::app::RconConfig,
    errors::{Error, Result},
};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const AUTH_ID: i32 = 1;
const COMMAND_ID: i32 = 2;

/// id + type + two terminating nulls
const MIN_PACKET_SIZE: i32 = 10;
/// Largest response body a server sends in one packet, plus header
const MAX_PACKET_SIZE: i32 = 4096 + MIN_PACKET_SIZE;

/// Executes console commands on the game server
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs `command` and returns the server's text response
    async fn execute(&self, command: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    pub(crate) id: i32,
    pub(crate) kind: i32,
    pub(crate) body: String,
}

impl Packet {
    pub(crate) fn new(id: i32, kind: i32, body: &str) -> Self {
        Self {
            id,
            kind,
            body: body.to_string(),
        }
    }

    pub(crate) fn encode(&self) -> io::Result<BytesMut> {
        let size = i32::try_from(self.body.len())
            .ok()
            .and_then(|len| len.checked_add(MIN_PACKET_SIZE))
            .filter(|size| *size <= MAX_PACKET_SIZE)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "command too long"))?;

        let mut buf = BytesMut::with_capacity(self.body.len() + 14);
        buf.put_i32_le(size);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_slice(self.body.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0);
        Ok(buf)
    }

    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let size = reader.read_i32_le().await?;
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid packet size {size}"),
            ));
        }
        let id = reader.read_i32_le().await?;
        let kind = reader.read_i32_le().await?;

        // size is within bounds, so the cast cannot truncate
        #[allow(clippy::cast_sign_loss)]
        let mut body = vec![0_u8; (size - 8) as usize];
        reader.read_exact(&mut body).await?;
        while body.last() == Some(&0) {
            body.pop();
        }

        Ok(Self {
            id,
            kind,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Remote console client with per-call sessions
#[derive(Debug, Clone)]
pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
}

impl RconClient {
    /// Creates a client from configuration
    #[must_use]
    pub fn new(config: &RconConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Overrides the session timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn session(&self, command: &str) -> io::Result<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let auth = Packet::new(AUTH_ID, SERVERDATA_AUTH, &self.password).encode()?;
        stream.write_all(&auth).await?;
        // Some servers send an empty RESPONSE_VALUE before the auth response.
        loop {
            let packet = Packet::read_from(&mut stream).await?;
            if packet.kind == SERVERDATA_AUTH_RESPONSE {
                if packet.id == -1 {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "authentication rejected",
                    ));
                }
                break;
            }
        }

        let exec = Packet::new(COMMAND_ID, SERVERDATA_EXECCOMMAND, command).encode()?;
        stream.write_all(&exec).await?;
        loop {
            let packet = Packet::read_from(&mut stream).await?;
            if packet.id == COMMAND_ID && packet.kind == SERVERDATA_RESPONSE_VALUE {
                let _ = stream.shutdown().await;
                return Ok(packet.body);
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for RconClient {
    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    async fn execute(&self, command: &str) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::InvalidInput {
                message: "Console command cannot be empty.".to_string(),
            });
        }

        let response = tokio::time::timeout(self.timeout, self.session(command))
            .await
            .map_err(|_| Error::RemoteExecutor {
                message: format!(
                    "timed out after {:?} talking to {}:{}",
                    self.timeout, self.host, self.port
                ),
            })?
            .map_err(|e| Error::RemoteExecutor {
                message: format!("{}:{}: {e}", self.host, self.port),
            })?;

        debug!(response = %response, "Console command executed");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tokio::net::TcpListener;

    fn config(port: u16, password: &str) -> RconConfig {
        RconConfig {
            host: "127.0.0.1".to_string(),
            port,
            password: password.to_string(),
            timeout_secs: 5,
        }
    }

    /// Minimal server: checks the password and echoes the command back.
    async fn spawn_fake_server(password: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let auth = Packet::read_from(&mut socket).await.unwrap();
                    let empty = Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "");
                    socket.write_all(&empty.encode().unwrap()).await.unwrap();
                    let reply_id = if auth.body == password { auth.id } else { -1 };
                    let reply = Packet::new(reply_id, SERVERDATA_AUTH_RESPONSE, "");
                    socket.write_all(&reply.encode().unwrap()).await.unwrap();
                    if reply_id == -1 {
                        return;
                    }

                    let exec = Packet::read_from(&mut socket).await.unwrap();
                    let response = Packet::new(
                        exec.id,
                        SERVERDATA_RESPONSE_VALUE,
                        &format!("ran: {}", exec.body),
                    );
                    socket.write_all(&response.encode().unwrap()).await.unwrap();
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_packet_layout() {
        let packet = Packet::new(7, SERVERDATA_EXECCOMMAND, "say hi");
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), 4 + 10 + 6);
        assert_eq!(&bytes[0..4], &16_i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7_i32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);

        let mut reader = &bytes[..];
        let decoded = Packet::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_rejects_oversized_packets() {
        let mut bytes = BytesMut::new();
        bytes.put_i32_le(1_000_000);
        let mut reader = &bytes[..];
        let result = Packet::read_from(&mut reader).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);

        let huge = "x".repeat(5000);
        assert!(Packet::new(1, SERVERDATA_EXECCOMMAND, &huge).encode().is_err());
    }

    #[tokio::test]
    async fn test_execute_against_fake_server() -> Result<()> {
        let port = spawn_fake_server("secret").await;
        let client = RconClient::new(&config(port, "secret"));

        let response = client.execute("oxide.grant user 7656 vip").await?;
        assert_eq!(response, "ran: oxide.grant user 7656 vip");
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_password_is_an_executor_error() {
        let port = spawn_fake_server("secret").await;
        let client = RconClient::new(&config(port, "wrong"));

        let result = client.execute("status").await;
        assert!(matches!(result, Err(Error::RemoteExecutor { ref message }) if message.contains("authentication")));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = RconClient::new(&config(port, "secret")).with_timeout(Duration::from_millis(200));
        let result = client.execute("status").await;
        assert!(matches!(result, Err(Error::RemoteExecutor { ref message }) if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = RconClient::new(&config(port, "secret"));
        let result = client.execute("status").await;
        assert!(matches!(result, Err(Error::RemoteExecutor { .. })));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let client = RconClient::new(&config(1, "secret"));
        let result = client.execute("   ").await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }
}
