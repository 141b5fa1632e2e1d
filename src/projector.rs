use crate::config::ProjectorConfig;
use crate::error::{Result, RoomError};
use crate::protocol::{self, Banner, LINE_END};
use crate::types::{InputSource, PowerState};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Backoff step between attempts; attempt `n` waits `(n + 1) * RETRY_BACKOFF`
pub const RETRY_BACKOFF: Duration = Duration::from_millis(400);

/// Projector operations the power sequencer and room scenes rely on
#[async_trait]
pub trait ProjectorControl: Send + Sync {
    /// Switch the lamp on or off; `true` when the projector acknowledged
    async fn power(&self, on: bool) -> Result<bool>;

    /// Query the current power state
    async fn power_state(&self) -> Result<PowerState>;

    /// Select an input; `true` when the projector acknowledged
    async fn set_input(&self, source: InputSource) -> Result<bool>;
}

/// Client for the projector's line protocol
///
/// Every call opens a fresh connection, reads the banner, authenticates when
/// asked to, sends one command, reads one reply and closes. The projector
/// drops idle connections, so nothing is kept between calls.
pub struct ProjectorLink {
    addr: String,
    password: Option<String>,
    timeout: Duration,
    retries: u32,
    nudge_banner: bool,
    input_map: BTreeMap<InputSource, String>,
}

impl ProjectorLink {
    pub fn new(config: &ProjectorConfig) -> Self {
        Self {
            addr: config.addr(),
            password: config.password.clone().filter(|p| !p.is_empty()),
            timeout: config.timeout(),
            retries: config.retries,
            nudge_banner: config.nudge_banner,
            input_map: config.input_map.clone(),
        }
    }

    /// `host:port` of the projector
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `POWR 1` or `POWR 0`
    pub async fn power(&self, on: bool) -> Result<bool> {
        let reply = self.send_command("POWR", if on { "1" } else { "0" }).await?;
        tracing::info!("Projector power {}: {}", if on { "on" } else { "off" }, reply);
        Ok(protocol::reply_is_ok(&reply))
    }

    /// Send `INPT <code>` for a configured source
    pub async fn set_input(&self, source: InputSource) -> Result<bool> {
        let code = self
            .input_map
            .get(&source)
            .ok_or_else(|| RoomError::InvalidArgument(format!("no input code for {}", source)))?;

        let reply = self.send_command("INPT", code).await?;
        tracing::info!("Projector input {}: {}", source, reply);
        Ok(protocol::reply_is_ok(&reply))
    }

    /// Send `POWR ?` and parse the state
    pub async fn power_state(&self) -> Result<PowerState> {
        let reply = self.send_command("POWR", "?").await?;
        let state = protocol::parse_power_reply(&reply);
        tracing::debug!("Projector power state {} ({})", state, reply);
        Ok(state)
    }

    /// Run one command with retries and return the raw reply line
    pub async fn send_command(&self, command: &str, args: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            match self.exchange(command, args).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(
                        "Projector {} {} attempt {}/{} failed: {}",
                        command,
                        args,
                        attempt + 1,
                        self.retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.retries {
                sleep(RETRY_BACKOFF * (attempt + 1)).await;
            }
        }

        Err(last_error.unwrap_or(RoomError::ConnectionClosed))
    }

    /// One connect/handshake/command/close cycle
    async fn exchange(&self, command: &str, args: &str) -> Result<String> {
        let mut stream = match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(RoomError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(RoomError::Connect {
                    addr: self.addr.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };
        tracing::debug!("Connected to projector at {}", self.addr);

        let result = self.converse(&mut stream, command, args).await;

        // Release the session on every path
        if let Err(e) = stream.shutdown().await {
            tracing::debug!("Projector shutdown: {}", e);
        }

        result
    }

    async fn converse(&self, stream: &mut TcpStream, command: &str, args: &str) -> Result<String> {
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        if self.nudge_banner {
            write_half.write_all(&[LINE_END]).await?;
        }

        let banner_line = read_line(&mut reader, self.timeout).await?;
        tracing::debug!("Projector banner: {}", banner_line);
        let banner = Banner::parse(&banner_line)?;

        let mut payload = protocol::format_command(command, args);
        if banner.auth_required {
            let password = self.password.as_deref().ok_or_else(|| {
                RoomError::Config("projector requires a password but none is configured".to_string())
            })?;
            let nonce = banner.nonce.as_deref().unwrap_or_default();
            payload.insert_str(0, &protocol::auth_digest(nonce, password));
        }

        tracing::debug!("Projector send: {}", payload.trim_end());
        write_half.write_all(payload.as_bytes()).await?;
        write_half.flush().await?;

        let reply = read_line(&mut reader, self.timeout).await?;
        tracing::debug!("Projector reply: {}", reply);
        Ok(reply)
    }
}

/// Read one CR-terminated line, trimmed of surrounding whitespace
async fn read_line<R>(reader: &mut BufReader<R>, budget: Duration) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let read = timeout(budget, reader.read_until(LINE_END, &mut line))
        .await
        .map_err(|_| RoomError::Timeout(budget))??;

    if read == 0 {
        return Err(RoomError::ConnectionClosed);
    }

    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

#[async_trait]
impl ProjectorControl for ProjectorLink {
    async fn power(&self, on: bool) -> Result<bool> {
        ProjectorLink::power(self, on).await
    }

    async fn power_state(&self) -> Result<PowerState> {
        ProjectorLink::power_state(self).await
    }

    async fn set_input(&self, source: InputSource) -> Result<bool> {
        ProjectorLink::set_input(self, source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_for(retries: u32) -> ProjectorLink {
        let mut config = ProjectorConfig::new("127.0.0.1");
        config.port = 9;
        config.retries = retries;
        config.timeout_s = 0.1;
        ProjectorLink::new(&config)
    }

    #[tokio::test]
    async fn unmapped_input_is_rejected_without_connecting() {
        let link = link_for(0);
        let err = link.set_input(InputSource::Auto).await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn reader_reports_closed_connection() {
        let data: &[u8] = b"";
        let mut reader = BufReader::new(data);
        let err = read_line(&mut reader, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RoomError::ConnectionClosed));
    }

    #[tokio::test]
    async fn reader_splits_on_carriage_return() {
        let data: &[u8] = b"PJLINK 0\r\n%1POWR=OK\r";
        let mut reader = BufReader::new(data);
        assert_eq!(read_line(&mut reader, Duration::from_millis(50)).await.unwrap(), "PJLINK 0");
        assert_eq!(read_line(&mut reader, Duration::from_millis(50)).await.unwrap(), "%1POWR=OK");
    }

    #[test]
    fn empty_password_counts_as_missing() {
        let mut config = ProjectorConfig::new("127.0.0.1");
        config.password = Some(String::new());
        let link = ProjectorLink::new(&config);
        assert!(link.password.is_none());
    }
}
