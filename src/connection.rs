use crate::config::MixerConfig;
use crate::error::{Result, RoomError};
use crate::protocol::{CommandFrame, MixerCommand, FRAME_LEN};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};

/// Pause between a send and the first reply read, for device turnaround
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Byte stream carrying mixer frames
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> LinkStream for T {}

/// Opens the byte stream behind a [`MixerConnection`]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LinkStream>>;

    /// Human readable endpoint for logs
    fn describe(&self) -> String;
}

/// Plain TCP to a serial-over-IP bridge
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn LinkStream>> {
        let stream = match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
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
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        self.addr.clone()
    }
}

/// Per-call overrides of the reply handling
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyOptions {
    /// Override the command's default "expects reply"
    pub expect_reply: Option<bool>,
    /// Override the command's default reply length
    pub reply_len: Option<usize>,
    /// Override the link's default reply timeout
    pub reply_timeout: Option<Duration>,
}

impl ReplyOptions {
    pub fn none() -> Self {
        Self {
            expect_reply: Some(false),
            ..Self::default()
        }
    }

    pub fn with_timeout(reply_timeout: Duration) -> Self {
        Self {
            expect_reply: Some(true),
            reply_timeout: Some(reply_timeout),
            ..Self::default()
        }
    }
}

/// Persistent framed link to the mixer
///
/// Not synchronised: pacing and reply association assume one writer, so
/// callers share it behind a single mutex (see [`MixerLink`](crate::MixerLink)).
pub struct MixerConnection {
    connector: Box<dyn Connector>,
    address: u8,
    min_spacing: Duration,
    reply_timeout: Duration,
    expect_echo: bool,
    stream: Option<Box<dyn LinkStream>>,
    last_send: Option<Instant>,
}

impl MixerConnection {
    /// Link to the configured TCP bridge
    pub fn new(config: &MixerConfig) -> Self {
        let connector = TcpConnector::new(config.addr(), config.timeout());
        Self::with_connector(config, Box::new(connector))
    }

    /// Link over a custom transport
    pub fn with_connector(config: &MixerConfig, connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            address: config.address,
            min_spacing: config.min_spacing(),
            reply_timeout: config.default_reply_timeout(),
            expect_echo: config.expect_echo,
            stream: None,
            last_send: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the link if it is not open yet
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_none() {
            tracing::info!("Connecting to mixer at {}", self.connector.describe());
            self.stream = Some(self.connector.connect().await?);
        }
        Ok(())
    }

    /// Drop the link; the next command reconnects
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Closed mixer link to {}", self.connector.describe());
        }
    }

    /// Send one frame and, if a reply is expected, return its bytes
    pub async fn send_command(
        &mut self,
        command: MixerCommand,
        data: [u8; 3],
        options: ReplyOptions,
    ) -> Result<Option<Vec<u8>>> {
        self.connect().await?;

        let frame = CommandFrame::new(self.address, command, data[0], data[1], data[2]);
        if let Some(ready_at) = self.next_send_at() {
            sleep_until(ready_at).await;
        }

        tracing::debug!("Mixer TX: {:02X?}", frame.as_bytes());
        let written = match self.stream.as_mut() {
            Some(stream) => write_frame(stream, &frame).await,
            None => Err(RoomError::ConnectionClosed),
        };
        self.last_send = Some(Instant::now());
        if let Err(e) = written {
            self.close();
            return Err(e);
        }

        if !options.expect_reply.unwrap_or_else(|| command.expects_reply()) {
            return Ok(None);
        }

        sleep(SETTLE_DELAY).await;
        let reply_len = options.reply_len.unwrap_or_else(|| command.reply_len());
        let budget = options.reply_timeout.unwrap_or(self.reply_timeout);

        match self.read_reply(&frame, reply_len, budget).await {
            Ok(reply) => {
                tracing::debug!("Mixer RX: {:02X?}", reply);
                Ok(Some(reply))
            }
            Err(e) => {
                // dropping the link also discards any late answer
                if e.is_timeout() {
                    tracing::warn!("Mixer did not answer {:?} within {:?}", command, budget);
                }
                self.close();
                Err(e)
            }
        }
    }

    /// Earliest instant the next frame may go out
    fn next_send_at(&self) -> Option<Instant> {
        self.last_send.map(|last| last + self.min_spacing)
    }

    /// Read `len` reply bytes, skipping the bridge's echo of `sent` when it
    /// shows up in front of them
    async fn read_reply(&mut self, sent: &CommandFrame, len: usize, budget: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + budget;
        let expect_echo = self.expect_echo;
        let stream = self.stream.as_mut().ok_or(RoomError::ConnectionClosed)?;

        let mut reply = recv_exact(stream, len, deadline, budget).await?;
        let sent = sent.as_bytes();
        let seen = len.min(FRAME_LEN);
        if !expect_echo || reply[..seen] != sent[..seen] {
            return Ok(reply);
        }

        if seen < FRAME_LEN {
            let rest = recv_exact(stream, FRAME_LEN - seen, deadline, budget).await?;
            if rest[..] != sent[seen..] {
                return Err(RoomError::Protocol(format!(
                    "garbled echo of {:02X?}: {:02X?} then {:02X?}",
                    sent,
                    &reply[..seen],
                    rest
                )));
            }
        }
        reply.drain(..seen);
        let missing = len - reply.len();
        reply.extend(recv_exact(stream, missing, deadline, budget).await?);
        Ok(reply)
    }
}

async fn write_frame(stream: &mut Box<dyn LinkStream>, frame: &CommandFrame) -> Result<()> {
    stream.write_all(frame.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn recv_exact(
    stream: &mut Box<dyn LinkStream>,
    len: usize,
    deadline: Instant,
    budget: Duration,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    match timeout_at(deadline, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Ok(buf),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RoomError::ConnectionClosed),
        Ok(Err(e)) => Err(RoomError::Io(e)),
        Err(_) => Err(RoomError::Timeout(budget)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    fn config() -> MixerConfig {
        let mut config = MixerConfig::new("mock");
        config.min_spacing_ms = 20;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn connects_lazily_and_once() {
        let mock = MockConnector::new();
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));
        assert!(!link.is_connected());

        link.send_command(MixerCommand::Mute, [0, 0, 1], ReplyOptions::default())
            .await
            .unwrap();
        link.send_command(MixerCommand::Mute, [0, 0, 0], ReplyOptions::default())
            .await
            .unwrap();

        assert!(link.is_connected());
        assert_eq!(mock.connect_count(), 1);
        assert_eq!(mock.frames().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_sends_are_spaced() {
        let mock = MockConnector::new();
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));

        for ch in 0..3 {
            link.send_command(MixerCommand::Mute, [1, ch, 1], ReplyOptions::default())
                .await
                .unwrap();
        }

        let writes = mock.writes();
        assert_eq!(writes.len(), 3);
        for pair in writes.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(20));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn query_returns_reply_bytes() {
        let mock = MockConnector::new();
        mock.reply_next(&[0x01, 0x18]);
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));

        let reply = link
            .send_command(MixerCommand::GetGain, [0, 0, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x01, 0x18]));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out_and_drops_link() {
        let mock = MockConnector::new();
        mock.silent_next();
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));

        let err = link
            .send_command(
                MixerCommand::GetMute,
                [0, 0, 0],
                ReplyOptions::with_timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!link.is_connected());

        mock.reply_next(&[0x01]);
        let reply = link
            .send_command(MixerCommand::GetMute, [0, 0, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x01]));
        assert_eq!(mock.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_not_taken_for_the_next_reply() {
        let mock = MockConnector::new();
        mock.reply_after(Duration::from_millis(800), &[0x01]);
        mock.reply_after(Duration::from_millis(500), &[0x00, 0xB4]);
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));

        let err = link
            .send_command(
                MixerCommand::GetMute,
                [0, 0, 0],
                ReplyOptions::with_timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let reply = link
            .send_command(MixerCommand::GetGain, [1, 0, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x00, 0xB4]));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_is_discarded() {
        let mut cfg = config();
        cfg.expect_echo = true;
        let mock = MockConnector::new();
        mock.echo_and_reply_next(&[0x01]);
        let mut link = MixerConnection::with_connector(&cfg, Box::new(mock.clone()));

        let reply = link
            .send_command(MixerCommand::GetMute, [1, 2, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x01]));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_without_echo_is_accepted() {
        let mut cfg = config();
        cfg.expect_echo = true;
        let mock = MockConnector::new();
        mock.reply_next(&[0x00, 0xB4]);
        let mut link = MixerConnection::with_connector(&cfg, Box::new(mock.clone()));

        let reply = link
            .send_command(MixerCommand::GetGain, [1, 1, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x00, 0xB4]));
        assert!(link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn garbled_echo_is_a_protocol_error() {
        let mut cfg = config();
        cfg.expect_echo = true;
        let mock = MockConnector::new();
        let mut garbled = [0u8; FRAME_LEN];
        garbled[0] = 0x7B;
        mock.reply_next(&garbled);
        let mut link = MixerConnection::with_connector(&cfg, Box::new(mock.clone()));

        let err = link
            .send_command(MixerCommand::GetMute, [1, 2, 0], ReplyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Protocol(_)));
        assert!(!link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_peer_drops_the_link() {
        let mock = MockConnector::new();
        mock.hang_up_next();
        let mut link = MixerConnection::with_connector(&config(), Box::new(mock.clone()));

        let err = link
            .send_command(MixerCommand::GetPreset, [0, 0, 0], ReplyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::ConnectionClosed));
        assert!(!link.is_connected());

        mock.reply_next(&[0x02]);
        let reply = link
            .send_command(MixerCommand::GetPreset, [0, 0, 0], ReplyOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(vec![0x02]));
        assert_eq!(mock.connect_count(), 2);
    }
}
