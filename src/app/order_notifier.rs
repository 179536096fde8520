//! Pending order alerts for the admin dashboard.
//!
//! A [`PendingOrderNotifier`] session captures a watermark, subscribes to the
//! live order feed, seeds its seen-set from the pending backlog and then raises
//! one alert per order that is created after the watermark while pending.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::alert::Alert;
use crate::domain::order::{ChangeType, OrderChange};

pub enum FeedEvent {
    Change(OrderChange),
    Error(anyhow::Error),
}

/// Live view over an order feed. Dropping it unsubscribes.
pub struct FeedSubscription {
    events: mpsc::Receiver<FeedEvent>,
    pump: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<FeedEvent>, pump: Option<JoinHandle<()>>) -> Self {
        Self { events, pump }
    }

    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[async_trait]
pub trait OrderFeed: Send + Sync {
    /// Subscribe to changes of orders created strictly after `since`.
    async fn subscribe(&self, since: OffsetDateTime) -> Result<FeedSubscription>;
}

#[async_trait]
pub trait BacklogLoader: Send + Sync {
    /// Ids of every order currently pending.
    async fn load_pending(&self) -> Result<Vec<Uuid>>;
}

/// Presentation side of an alert. Called while the session lock is held, so
/// implementations must not call back into the notifier.
pub trait AlertSink: Send + Sync {
    fn raise_alert(&self, alert: Alert);

    fn play_sound(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierStage {
    Subscribe,
    Feed,
    Backlog,
}

impl NotifierStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Feed => "feed",
            Self::Backlog => "backlog",
        }
    }
}

impl fmt::Display for NotifierStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, stage: NotifierStage, error: &anyhow::Error);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, stage: NotifierStage, error: &anyhow::Error) {
        match stage {
            NotifierStage::Feed => warn!(stage = %stage, error = ?error, "order feed error"),
            _ => error!(stage = %stage, error = ?error, "pending order notifier failure"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierState {
    watermark: OffsetDateTime,
    seen: HashSet<Uuid>,
    initialized: bool,
}

impl NotifierState {
    pub fn new(watermark: OffsetDateTime) -> Self {
        Self {
            watermark,
            seen: HashSet::new(),
            initialized: false,
        }
    }

    pub fn watermark(&self) -> OffsetDateTime {
        self.watermark
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn has_seen(&self, order_id: Uuid) -> bool {
        self.seen.contains(&order_id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Marks backlog orders as already known. Returns how many were new.
    pub fn seed_backlog<I>(&mut self, order_ids: I) -> usize
    where
        I: IntoIterator<Item = Uuid>,
    {
        order_ids
            .into_iter()
            .filter(|id| self.seen.insert(*id))
            .count()
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn mark_seen(&mut self, order_id: Uuid) -> bool {
        self.seen.insert(order_id)
    }
}

/// Whether `change` announces an order the operator has not been told about.
pub fn should_alert(change: &OrderChange, state: &NotifierState) -> bool {
    state.initialized
        && change.change_type == ChangeType::Added
        && change.order.is_pending()
        && change.order.created_at > state.watermark
        && !state.seen.contains(&change.order_id)
}

#[derive(Debug, Clone)]
pub struct NotifierOptions {
    pub alert_duration: Duration,
    pub play_sound: bool,
}

impl Default for NotifierOptions {
    fn default() -> Self {
        Self {
            alert_duration: Duration::from_millis(5000),
            play_sound: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifierStats {
    pub events_processed: u64,
    pub alerts_raised: u64,
    pub duplicates_suppressed: u64,
    pub backlog_size: u64,
    pub feed_errors: u64,
    pub sound_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifierSnapshot {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub watermark: Option<OffsetDateTime>,
    pub initialized: bool,
    pub seen_count: usize,
    pub stats: NotifierStats,
}

struct SessionState {
    stopped: bool,
    state: NotifierState,
    stats: NotifierStats,
}

impl SessionState {
    fn new(watermark: OffsetDateTime) -> Self {
        Self {
            stopped: false,
            state: NotifierState::new(watermark),
            stats: NotifierStats::default(),
        }
    }

    fn apply(&mut self, change: &OrderChange, alerts: &dyn AlertSink, options: &NotifierOptions) {
        self.stats.events_processed += 1;

        if !should_alert(change, &self.state) {
            if change.change_type == ChangeType::Added && self.state.has_seen(change.order_id) {
                self.stats.duplicates_suppressed += 1;
                debug!(order_id = %change.order_id, "order already known, not alerting");
            }
            return;
        }

        // Recorded before the sink runs so a replayed delivery stays silent.
        self.state.mark_seen(change.order_id);
        self.stats.alerts_raised += 1;
        info!(order_id = %change.order_id, "new pending order");

        alerts.raise_alert(Alert::new_order(&change.order, options.alert_duration));
        if options.play_sound {
            if let Err(err) = alerts.play_sound() {
                self.stats.sound_failures += 1;
                debug!(error = ?err, "alert sound not played");
            }
        }
    }
}

struct Session {
    shared: Arc<Mutex<SessionState>>,
    task: JoinHandle<()>,
}

impl Session {
    fn cancel(self) {
        lock(&self.shared).stopped = true;
        self.task.abort();
    }
}

pub struct PendingOrderNotifier {
    alerts: Arc<dyn AlertSink>,
    errors: Arc<dyn ErrorSink>,
    options: NotifierOptions,
    session: Mutex<Option<Session>>,
}

impl PendingOrderNotifier {
    pub fn new(
        alerts: Arc<dyn AlertSink>,
        errors: Arc<dyn ErrorSink>,
        options: NotifierOptions,
    ) -> Self {
        Self {
            alerts,
            errors,
            options,
            session: Mutex::new(None),
        }
    }

    /// Starts a fresh session, replacing any running one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, feed: Arc<dyn OrderFeed>, backlog: Arc<dyn BacklogLoader>) {
        let mut slot = lock(&self.session);
        if let Some(previous) = slot.take() {
            debug!("replacing running notifier session");
            previous.cancel();
        }

        let watermark = OffsetDateTime::now_utc();
        let shared = Arc::new(Mutex::new(SessionState::new(watermark)));
        let task = tokio::spawn(run_session(
            feed,
            backlog,
            Arc::clone(&shared),
            Arc::clone(&self.alerts),
            Arc::clone(&self.errors),
            self.options.clone(),
        ));

        *slot = Some(Session { shared, task });
        info!(watermark = %watermark, "pending order notifier started");
    }

    /// Cancels the running session. No alert is raised once this returns.
    pub fn stop(&self) {
        if let Some(session) = lock(&self.session).take() {
            session.cancel();
            info!("pending order notifier stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .map(|session| !session.task.is_finished())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> NotifierSnapshot {
        let slot = lock(&self.session);
        match slot.as_ref() {
            Some(session) => {
                let shared = lock(&session.shared);
                NotifierSnapshot {
                    running: !shared.stopped && !session.task.is_finished(),
                    watermark: Some(shared.state.watermark()),
                    initialized: shared.state.is_initialized(),
                    seen_count: shared.state.seen_count(),
                    stats: shared.stats,
                }
            }
            None => NotifierSnapshot {
                running: false,
                watermark: None,
                initialized: false,
                seen_count: 0,
                stats: NotifierStats::default(),
            },
        }
    }
}

impl Drop for PendingOrderNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session(
    feed: Arc<dyn OrderFeed>,
    backlog: Arc<dyn BacklogLoader>,
    shared: Arc<Mutex<SessionState>>,
    alerts: Arc<dyn AlertSink>,
    errors: Arc<dyn ErrorSink>,
    options: NotifierOptions,
) {
    let watermark = lock(&shared).state.watermark();

    // Subscribe first so changes made during the backlog load queue up.
    let mut subscription = match feed.subscribe(watermark).await {
        Ok(subscription) => subscription,
        Err(err) => {
            errors.report(NotifierStage::Subscribe, &err);
            return;
        }
    };

    let loaded = backlog.load_pending().await;
    {
        let mut session = lock(&shared);
        if session.stopped {
            return;
        }
        match loaded {
            Ok(order_ids) => {
                let seeded = session.state.seed_backlog(order_ids);
                session.stats.backlog_size = seeded as u64;
                debug!(backlog = seeded, "seeded pending order backlog");
            }
            Err(err) => errors.report(NotifierStage::Backlog, &err),
        }
        session.state.mark_initialized();
    }

    while let Some(event) = subscription.next().await {
        let mut session = lock(&shared);
        if session.stopped {
            return;
        }
        match event {
            FeedEvent::Change(change) => session.apply(&change, alerts.as_ref(), &options),
            FeedEvent::Error(err) => {
                session.stats.feed_errors += 1;
                errors.report(NotifierStage::Feed, &err);
            }
        }
    }

    debug!("order feed closed");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
