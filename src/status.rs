use crate::error::{Result, RoomError};
use std::sync::Mutex;
use tokio::sync::broadcast;

const HISTORY: usize = 64;

/// Destination of human readable progress messages
pub trait StatusSink: Send + Sync {
    fn publish(&self, message: &str);
}

/// Latest status message plus a feed of every message
///
/// Publishing never blocks; slow subscribers lose old messages.
pub struct StatusBoard {
    latest: Mutex<String>,
    tx: broadcast::Sender<String>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HISTORY);
        Self {
            latest: Mutex::new(String::new()),
            tx,
        }
    }

    /// Most recent message, empty before the first one
    pub fn latest(&self) -> String {
        self.latest
            .lock()
            .map(|latest| latest.clone())
            .unwrap_or_default()
    }

    /// Receive every message published from now on
    pub fn subscribe(&self) -> StatusReceiver {
        StatusReceiver::new(self.tx.subscribe())
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for StatusBoard {
    fn publish(&self, message: &str) {
        tracing::info!("Status: {}", message);
        if let Ok(mut latest) = self.latest.lock() {
            *latest = message.to_string();
        }
        // No subscribers is fine
        let _ = self.tx.send(message.to_string());
    }
}

/// Receiver for status messages
///
/// A subscriber that falls more than the board's history behind skips
/// ahead to the oldest message still held; progress text has no value once
/// it is stale.
pub struct StatusReceiver {
    rx: broadcast::Receiver<String>,
}

impl StatusReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Receive the next status message
    ///
    /// Fails with [`RoomError::ConnectionClosed`] once the board is dropped.
    pub async fn recv(&mut self) -> Result<String> {
        loop {
            let next = self.rx.recv().await.map_err(Missed::from);
            if let Some(message) = Missed::resolve(next)? {
                return Ok(message);
            }
        }
    }

    /// Next status message if one is waiting
    pub fn try_recv(&mut self) -> Result<Option<String>> {
        loop {
            let next = match self.rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => Err(Missed::Skipped(skipped)),
                Err(broadcast::error::TryRecvError::Closed) => Err(Missed::BoardGone),
                Ok(message) => Ok(message),
            };
            if let Some(message) = Missed::resolve(next)? {
                return Ok(Some(message));
            }
        }
    }
}

/// Why a receive produced no message
enum Missed {
    Skipped(u64),
    BoardGone,
}

impl From<broadcast::error::RecvError> for Missed {
    fn from(e: broadcast::error::RecvError) -> Self {
        match e {
            broadcast::error::RecvError::Lagged(skipped) => Missed::Skipped(skipped),
            broadcast::error::RecvError::Closed => Missed::BoardGone,
        }
    }
}

impl Missed {
    /// `Ok(None)` means read again
    fn resolve(next: std::result::Result<String, Missed>) -> Result<Option<String>> {
        match next {
            Ok(message) => Ok(Some(message)),
            Err(Missed::Skipped(skipped)) => {
                tracing::warn!("Status subscriber fell behind, {} message(s) dropped", skipped);
                Ok(None)
            }
            Err(Missed::BoardGone) => Err(RoomError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_tracks_last_message() {
        let board = StatusBoard::new();
        assert_eq!(board.latest(), "");
        board.publish("Projector: warming up");
        board.publish("Projector: on");
        assert_eq!(board.latest(), "Projector: on");
    }

    #[tokio::test]
    async fn subscribers_see_messages_in_order() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.publish("one");
        board.publish("two");
        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(rx.try_recv().unwrap(), None);
    }

    #[test]
    fn slow_subscriber_skips_to_the_oldest_kept_message() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        for i in 0..HISTORY + 3 {
            board.publish(&format!("message {}", i));
        }
        assert_eq!(rx.try_recv().unwrap().as_deref(), Some("message 3"));
        assert_eq!(rx.try_recv().unwrap().as_deref(), Some("message 4"));
    }

    #[tokio::test]
    async fn dropped_board_closes_the_feed() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.publish("last");
        drop(board);

        assert_eq!(rx.recv().await.unwrap(), "last");
        assert!(matches!(rx.recv().await, Err(RoomError::ConnectionClosed)));
        assert!(matches!(rx.try_recv(), Err(RoomError::ConnectionClosed)));
    }
}
