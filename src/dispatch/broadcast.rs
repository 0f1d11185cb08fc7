use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::Broadcaster;
use crate::db::models::Event;

/// In-process pub/sub feeding the `/ws` subscriber sockets.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        ChannelBroadcaster { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn send_event(&self, event: &Event) -> Result<()> {
        // An error here only means nobody is connected
        if let Ok(n) = self.tx.send(event.clone()) {
            debug!("Event {} delivered to {} subscriber(s)", event.team_code, n);
        }
        Ok(())
    }
}

/// POSTs each event as JSON to an external endpoint.
pub struct WebhookBroadcaster {
    http: Client,
    url: String,
}

impl WebhookBroadcaster {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(WebhookBroadcaster {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Broadcaster for WebhookBroadcaster {
    async fn send_event(&self, event: &Event) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("Webhook request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Webhook error {}: {}", status, body);
        }
        Ok(())
    }
}

/// Sends to every inner broadcaster concurrently; fails if any of them fails.
pub struct FanoutBroadcaster {
    targets: Vec<Arc<dyn Broadcaster>>,
}

impl FanoutBroadcaster {
    pub fn new(targets: Vec<Arc<dyn Broadcaster>>) -> Self {
        FanoutBroadcaster { targets }
    }
}

#[async_trait]
impl Broadcaster for FanoutBroadcaster {
    async fn send_event(&self, event: &Event) -> Result<()> {
        let results = join_all(self.targets.iter().map(|t| t.send_event(event))).await;
        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if !errors.is_empty() {
            anyhow::bail!(
                "{} of {} broadcaster(s) failed: {}",
                errors.len(),
                self.targets.len(),
                errors.join("; ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingBroadcaster;

    #[tokio::test]
    async fn test_channel_without_subscribers_is_ok() {
        let b = ChannelBroadcaster::new(8);
        assert!(b.send_event(&Event::test_goal()).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_delivers_to_each_subscriber() {
        let b = ChannelBroadcaster::new(8);
        let mut rx1 = b.subscribe();
        let mut rx2 = b.subscribe();
        b.send_event(&Event::test_goal()).await.unwrap();
        assert!(rx1.recv().await.unwrap().is_test());
        assert!(rx2.recv().await.unwrap().is_test());
    }

    #[tokio::test]
    async fn test_fanout_reports_partial_failure() {
        let ok = Arc::new(RecordingBroadcaster::default());
        let bad = Arc::new(RecordingBroadcaster {
            fail: true,
            ..Default::default()
        });
        let fanout = FanoutBroadcaster::new(vec![ok.clone() as Arc<dyn Broadcaster>, bad]);

        let err = fanout.send_event(&Event::test_goal()).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        // the healthy target still got the event
        assert_eq!(ok.events.lock().await.len(), 1);
    }
}
