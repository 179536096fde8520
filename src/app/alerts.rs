use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::app::order_notifier::AlertSink;
use crate::domain::alert::Alert;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    Toast(Alert),
    Chime,
}

impl AlertEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Toast(_) => "toast",
            Self::Chime => "chime",
        }
    }
}

/// Fans alerts out to every connected dashboard stream.
#[derive(Clone)]
pub struct AlertHub {
    sender: broadcast::Sender<AlertEvent>,
}

impl AlertHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl AlertSink for AlertHub {
    fn raise_alert(&self, alert: Alert) {
        let order_id = alert.order_id;
        match self.sender.send(AlertEvent::Toast(alert)) {
            Ok(listeners) => debug!(order_id = %order_id, listeners, "alert dispatched"),
            Err(_) => debug!(order_id = %order_id, "no dashboard connected for alert"),
        }
    }

    fn play_sound(&self) -> Result<()> {
        self.sender
            .send(AlertEvent::Chime)
            .map(|_| ())
            .map_err(|_| anyhow!("no dashboard connected to play the chime"))
    }
}

/// Writes alerts to the log; used when no dashboard is served.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise_alert(&self, alert: Alert) {
        info!(
            order_id = %alert.order_id,
            title = %alert.title,
            body = %alert.body,
            "order alert"
        );
    }

    fn play_sound(&self) -> Result<()> {
        Ok(())
    }
}
