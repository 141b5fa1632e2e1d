use crate::config::RelayConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Switchable mains/contact relay
///
/// Failures are reported as `false` and logged; callers decide whether a
/// failed switch aborts what they are doing.
#[async_trait]
pub trait RelayControl: Send + Sync {
    /// Switch one channel; `true` when the relay accepted the request
    async fn set_relay(&self, channel: u8, on: bool) -> bool;

    /// Close a channel for `duration`, then open it again
    async fn pulse_relay(&self, channel: u8, duration: Duration) -> bool {
        if !self.set_relay(channel, true).await {
            return false;
        }
        sleep(duration).await;
        self.set_relay(channel, false).await
    }
}

/// Relay driven through the `Switch.Set` RPC over HTTP
pub struct HttpRelay {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn switch_url(&self) -> String {
        format!("{}/rpc/Switch.Set", self.base_url)
    }
}

#[async_trait]
impl RelayControl for HttpRelay {
    async fn set_relay(&self, channel: u8, on: bool) -> bool {
        let body = json!({ "id": channel, "on": on });

        match self.http.post(self.switch_url()).json(&body).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!("Relay {} channel {} -> {}", self.base_url, channel, if on { "on" } else { "off" });
                true
            }
            Ok(response) => {
                tracing::warn!(
                    "Relay {} channel {} rejected switch: HTTP {}",
                    self.base_url,
                    channel,
                    response.status()
                );
                false
            }
            Err(e) => {
                tracing::warn!("Relay {} channel {} unreachable: {}", self.base_url, channel, e);
                false
            }
        }
    }
}

/// One channel of a relay, as assigned in the room configuration
#[derive(Clone)]
pub struct RelayChannel {
    relay: Arc<dyn RelayControl>,
    channel: u8,
}

impl RelayChannel {
    pub fn new(relay: Arc<dyn RelayControl>, channel: u8) -> Self {
        Self { relay, channel }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn relay(&self) -> &Arc<dyn RelayControl> {
        &self.relay
    }

    pub async fn set(&self, on: bool) -> bool {
        self.relay.set_relay(self.channel, on).await
    }

    pub async fn pulse(&self, duration: Duration) -> bool {
        self.relay.pulse_relay(self.channel, duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRelay;

    #[tokio::test(start_paused = true)]
    async fn pulse_switches_on_then_off() {
        let relay = MockRelay::new();
        let start = tokio::time::Instant::now();

        assert!(relay.pulse_relay(2, Duration::from_millis(800)).await);

        let calls = relay.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].channel, calls[0].on), (2, true));
        assert_eq!((calls[1].channel, calls[1].on), (2, false));
        assert_eq!(calls[1].at - start, Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_close_skips_the_release() {
        let relay = MockRelay::failing();
        assert!(!relay.pulse_relay(1, Duration::from_millis(800)).await);
        assert_eq!(relay.calls().len(), 1);
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let relay = HttpRelay::new(&RelayConfig {
            base_url: "http://192.168.1.10/".to_string(),
            timeout_s: 1.0,
        })
        .unwrap();
        assert_eq!(relay.switch_url(), "http://192.168.1.10/rpc/Switch.Set");
    }
}
