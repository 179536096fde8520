use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::order_notifier::{FeedEvent, FeedSubscription, OrderFeed};
use crate::domain::order::{ChangeType, Order, OrderChange, OrderStatus};
use crate::infra::db::Db;

const ERROR_BACKOFF_MS: u64 = 1000;

/// Order changes published by the `notify_order_change` trigger.
#[derive(Clone)]
pub struct PgOrderFeed {
    db: Db,
    channel: String,
    buffer_size: usize,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    op: String,
    id: Uuid,
    status: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    description: String,
    amount_cents: i64,
}

impl PgOrderFeed {
    pub fn new(db: Db, channel: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            db,
            channel: channel.into(),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Channel the `notify_order_change` trigger publishes to, as seen by a
    /// fresh database session.
    pub async fn trigger_channel(&self) -> Result<String> {
        let channel = sqlx::query_scalar::<_, String>(
            "SELECT COALESCE(NULLIF(current_setting('ovenbell.orders_channel', true), ''), 'order_changes')",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(channel)
    }

    /// Returns false (and warns) when the trigger publishes to a channel this
    /// feed does not listen on.
    pub async fn verify_trigger_channel(&self) -> Result<bool> {
        let trigger_channel = self.trigger_channel().await?;
        if trigger_channel != self.channel {
            warn!(
                listening = %self.channel,
                publishing = %trigger_channel,
                "order trigger publishes to another channel, no order alerts will arrive"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl OrderFeed for PgOrderFeed {
    async fn subscribe(&self, since: OffsetDateTime) -> Result<FeedSubscription> {
        let mut listener = PgListener::connect_with(self.db.pool()).await?;
        listener.listen(&self.channel).await?;
        info!(channel = %self.channel, "listening for order changes");

        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let pump = tokio::spawn(pump_notifications(listener, sender, since));
        Ok(FeedSubscription::new(receiver, Some(pump)))
    }
}

async fn pump_notifications(
    mut listener: PgListener,
    sender: mpsc::Sender<FeedEvent>,
    since: OffsetDateTime,
) {
    loop {
        let event = match listener.recv().await {
            Ok(notification) => match parse_change(notification.payload()) {
                Ok(change) if change.order.created_at > since => FeedEvent::Change(change),
                Ok(change) => {
                    debug!(order_id = %change.order_id, "order predates watermark, skipping");
                    continue;
                }
                Err(err) => FeedEvent::Error(err.context("unreadable order change payload")),
            },
            Err(err) => {
                warn!(error = ?err, "order listener receive failed, backing off");
                tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                FeedEvent::Error(anyhow::Error::new(err).context("order listener connection error"))
            }
        };

        if sender.send(event).await.is_err() {
            debug!("order feed subscriber dropped");
            return;
        }
    }
}

pub fn parse_change(payload: &str) -> Result<OrderChange> {
    let payload: ChangePayload = serde_json::from_str(payload)?;

    let change_type = match payload.op.as_str() {
        "INSERT" => ChangeType::Added,
        "UPDATE" => ChangeType::Modified,
        "DELETE" => ChangeType::Removed,
        other => return Err(anyhow!("unknown order change op: {}", other)),
    };
    let status = OrderStatus::from_db(&payload.status)
        .ok_or_else(|| anyhow!("unknown order status: {}", payload.status))?;

    Ok(OrderChange::new(
        change_type,
        Order {
            id: payload.id,
            status,
            created_at: payload.created_at,
            description: payload.description,
            amount_cents: payload.amount_cents,
        },
    ))
}

/// In-process order feed with the same filtering as [`PgOrderFeed`].
#[derive(Clone)]
pub struct MemoryOrderFeed {
    inner: Arc<MemoryFeedInner>,
}

struct MemoryFeedInner {
    subscribers: Mutex<Vec<MemorySubscriber>>,
    subscriber_count: watch::Sender<usize>,
    buffer_size: usize,
}

struct MemorySubscriber {
    since: OffsetDateTime,
    sender: mpsc::Sender<FeedEvent>,
}

impl Default for MemoryOrderFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryOrderFeed {
    pub fn new(buffer_size: usize) -> Self {
        let (subscriber_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryFeedInner {
                subscribers: Mutex::new(Vec::new()),
                subscriber_count,
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    /// Delivers `change` to every subscriber whose watermark it passes.
    /// Returns the number of subscriptions it was delivered to.
    pub async fn publish(&self, change: OrderChange) -> usize {
        let targets: Vec<mpsc::Sender<FeedEvent>> = self
            .live_subscribers()
            .into_iter()
            .filter(|(since, _)| change.order.created_at > *since)
            .map(|(_, sender)| sender)
            .collect();

        let mut delivered = 0;
        for sender in targets {
            if sender.send(FeedEvent::Change(change.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn publish_error(&self, message: &str) -> usize {
        let mut delivered = 0;
        for (_, sender) in self.live_subscribers() {
            if sender.send(FeedEvent::Error(anyhow!("{}", message))).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Resolves once at least `count` subscriptions are open.
    pub async fn wait_for_subscribers(&self, count: usize) {
        let mut receiver = self.inner.subscriber_count.subscribe();
        let _ = receiver.wait_for(|current| *current >= count).await;
    }

    fn live_subscribers(&self) -> Vec<(OffsetDateTime, mpsc::Sender<FeedEvent>)> {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        self.inner.subscriber_count.send_replace(subscribers.len());
        subscribers
            .iter()
            .map(|subscriber| (subscriber.since, subscriber.sender.clone()))
            .collect()
    }
}

#[async_trait]
impl OrderFeed for MemoryOrderFeed {
    async fn subscribe(&self, since: OffsetDateTime) -> Result<FeedSubscription> {
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size);
        {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            subscribers.push(MemorySubscriber { since, sender });
            self.inner.subscriber_count.send_replace(subscribers.len());
        }
        debug!(since = %since, "memory order feed subscribed");
        Ok(FeedSubscription::new(receiver, None))
    }
}
