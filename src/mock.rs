//! In-memory stand-ins for the room devices.
//!
//! [`MockConnector`] scripts the mixer's byte stream, [`MockRelay`] records
//! relay switches and [`MockProjector`] plays back a list of power states.

use crate::connection::{Connector, LinkStream};
use crate::error::{Result, RoomError};
use crate::projector::ProjectorControl;
use crate::protocol::{CommandFrame, FRAME_LEN};
use crate::relay::RelayControl;
use crate::types::{InputSource, PowerState};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant};

/// What the simulated device does after receiving a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Send nothing back
    Silent,
    /// Send these bytes back
    Reply(Vec<u8>),
    /// Echo the frame, then send these bytes
    EchoReply(Vec<u8>),
    /// Send these bytes after a delay, unless the connection was replaced
    Late(Duration, Vec<u8>),
    /// Close the connection
    HangUp,
}

/// One write observed by the transport
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockResponse>,
    writes: Vec<RecordedWrite>,
    partial: Vec<u8>,
    inbox: VecDeque<u8>,
    read_waker: Option<Waker>,
    hung_up: bool,
    connects: usize,
    refuse_connect: bool,
}

impl MockState {
    /// Apply the next scripted response; a delayed answer is handed back
    fn on_frame(&mut self, frame: Vec<u8>) -> Option<(Duration, Vec<u8>)> {
        let mut later = None;
        match self.script.pop_front().unwrap_or(MockResponse::Silent) {
            MockResponse::Silent => {}
            MockResponse::Reply(bytes) => self.deliver(bytes),
            MockResponse::EchoReply(mut bytes) => {
                bytes.splice(0..0, frame);
                self.deliver(bytes);
            }
            MockResponse::Late(delay, bytes) => later = Some((delay, bytes)),
            MockResponse::HangUp => {
                self.hung_up = true;
                self.wake_reader();
            }
        }
        later
    }

    fn deliver(&mut self, bytes: Vec<u8>) {
        self.inbox.extend(bytes);
        self.wake_reader();
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// Connector handing out [`MockStream`]s that share one script
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the device's behaviour for the next frame
    pub fn push(&self, response: MockResponse) {
        self.state.lock().unwrap().script.push_back(response);
    }

    pub fn reply_next(&self, bytes: &[u8]) {
        self.push(MockResponse::Reply(bytes.to_vec()));
    }

    /// Answer the next frame only after `delay`
    pub fn reply_after(&self, delay: Duration, bytes: &[u8]) {
        self.push(MockResponse::Late(delay, bytes.to_vec()));
    }

    pub fn echo_and_reply_next(&self, bytes: &[u8]) {
        self.push(MockResponse::EchoReply(bytes.to_vec()));
    }

    pub fn silent_next(&self) {
        self.push(MockResponse::Silent);
    }

    pub fn hang_up_next(&self) {
        self.push(MockResponse::HangUp);
    }

    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    /// Every write, in order
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    /// All bytes written so far, split into frames
    pub fn frames(&self) -> Vec<CommandFrame> {
        let bytes: Vec<u8> = self
            .state
            .lock()
            .unwrap()
            .writes
            .iter()
            .flat_map(|w| w.bytes.iter().copied())
            .collect();
        bytes
            .chunks(FRAME_LEN)
            .filter_map(|chunk| CommandFrame::from_bytes(chunk).ok())
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.writes.clear();
        state.partial.clear();
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn LinkStream>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            return Err(RoomError::Connect {
                addr: self.describe(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        state.connects += 1;
        state.hung_up = false;
        state.inbox.clear();
        state.partial.clear();
        Ok(Box::new(MockStream {
            state: self.state.clone(),
            generation: state.connects,
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Stream side of a [`MockConnector`]
pub struct MockStream {
    state: Arc<Mutex<MockState>>,
    /// Connection count when this stream was opened
    generation: usize,
}

impl AsyncRead for MockStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut state = self.state.lock().unwrap();
        if !state.inbox.is_empty() {
            let n = buf.remaining().min(state.inbox.len());
            let chunk: Vec<u8> = state.inbox.drain(..n).collect();
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        if state.hung_up {
            return Poll::Ready(Ok(()));
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        if state.hung_up {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up")));
        }

        state.writes.push(RecordedWrite {
            at: Instant::now(),
            bytes: buf.to_vec(),
        });
        state.partial.extend_from_slice(buf);
        while state.partial.len() >= FRAME_LEN {
            let frame: Vec<u8> = state.partial.drain(..FRAME_LEN).collect();
            if let Some((delay, bytes)) = state.on_frame(frame) {
                let shared = self.state.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    sleep(delay).await;
                    let mut state = shared.lock().unwrap();
                    if state.connects == generation && !state.hung_up {
                        state.deliver(bytes);
                    }
                });
            }
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// One switch request seen by a [`MockRelay`]
#[derive(Debug, Clone)]
pub struct RelayCall {
    pub at: Instant,
    pub channel: u8,
    pub on: bool,
}

/// Relay that records every switch and answers with a fixed result
#[derive(Clone)]
pub struct MockRelay {
    calls: Arc<Mutex<Vec<RelayCall>>>,
    accept: bool,
}

impl MockRelay {
    pub fn new() -> Self {
        Self {
            calls: Arc::default(),
            accept: true,
        }
    }

    /// Relay that rejects every request
    pub fn failing() -> Self {
        Self {
            accept: false,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayControl for MockRelay {
    async fn set_relay(&self, channel: u8, on: bool) -> bool {
        self.calls.lock().unwrap().push(RelayCall {
            at: Instant::now(),
            channel,
            on,
        });
        self.accept
    }
}

/// Something a [`MockProjector`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectorCall {
    Power(bool),
    PowerState,
    SetInput(InputSource),
}

#[derive(Default)]
struct ProjectorState {
    states: VecDeque<PowerState>,
    calls: Vec<(Instant, ProjectorCall)>,
    /// State queries still to fail before states are played back
    failing_polls: usize,
}

/// Projector that replays queued power states
///
/// Each state query pops the next state; the last one repeats forever.
/// Power and input commands are acknowledged unless the projector is
/// unreachable, in which case every call fails.
#[derive(Clone)]
pub struct MockProjector {
    state: Arc<Mutex<ProjectorState>>,
    reachable: bool,
}

impl MockProjector {
    pub fn new(states: impl IntoIterator<Item = PowerState>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProjectorState {
                states: states.into_iter().collect(),
                calls: Vec::new(),
                failing_polls: 0,
            })),
            reachable: true,
        }
    }

    /// Projector that never answers
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(Vec::<PowerState>::new())
        }
    }

    /// Fail the next `count` state queries before answering again
    pub fn failing_polls(self, count: usize) -> Self {
        self.state.lock().unwrap().failing_polls = count;
        self
    }

    pub fn calls(&self) -> Vec<ProjectorCall> {
        self.state.lock().unwrap().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    /// Calls with the instant they were made
    pub fn timed_calls(&self) -> Vec<(Instant, ProjectorCall)> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: ProjectorCall) -> Result<()> {
        self.state.lock().unwrap().calls.push((Instant::now(), call));
        if self.reachable {
            Ok(())
        } else {
            Err(RoomError::Connect {
                addr: "mock projector".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            })
        }
    }
}

#[async_trait]
impl ProjectorControl for MockProjector {
    async fn power(&self, on: bool) -> Result<bool> {
        self.record(ProjectorCall::Power(on))?;
        Ok(true)
    }

    async fn power_state(&self) -> Result<PowerState> {
        self.record(ProjectorCall::PowerState)?;
        let mut state = self.state.lock().unwrap();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(RoomError::Timeout(Duration::from_secs(5)));
        }
        let current = if state.states.len() > 1 {
            state.states.pop_front()
        } else {
            state.states.front().copied()
        };
        Ok(current.unwrap_or(PowerState::Unknown))
    }

    async fn set_input(&self, source: InputSource) -> Result<bool> {
        self.record(ProjectorCall::SetInput(source))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MixerCommand;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn scripted_reply_follows_frame() {
        let mock = MockConnector::new();
        mock.reply_next(&[0x2A]);
        let mut stream = mock.connect().await.unwrap();

        let frame = CommandFrame::new(3, MixerCommand::GetPreset, 0, 0, 0);
        stream.write_all(frame.as_bytes()).await.unwrap();

        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x2A]);
        assert_eq!(mock.frames(), vec![frame]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_lost_with_its_connection() {
        let mock = MockConnector::new();
        mock.reply_after(Duration::from_secs(1), &[0x01]);
        let mut old = mock.connect().await.unwrap();
        let frame = CommandFrame::new(3, MixerCommand::GetMute, 0, 0, 0);
        old.write_all(frame.as_bytes()).await.unwrap();
        drop(old);

        let mut fresh = mock.connect().await.unwrap();
        sleep(Duration::from_secs(2)).await;
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), fresh.read_exact(&mut byte)).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn refused_connection() {
        let mock = MockConnector::new();
        mock.refuse_connections(true);
        assert!(matches!(mock.connect().await, Err(RoomError::Connect { .. })));
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn projector_repeats_its_last_state() {
        let projector = MockProjector::new([PowerState::Cooling, PowerState::Standby]);
        assert_eq!(projector.power_state().await.unwrap(), PowerState::Cooling);
        assert_eq!(projector.power_state().await.unwrap(), PowerState::Standby);
        assert_eq!(projector.power_state().await.unwrap(), PowerState::Standby);
        assert_eq!(projector.calls().len(), 3);
    }
}
