//! Cron Scheduler: fires scheduleable playgrounds at their next cron time.
//!
//! Pending firings live in a queue ordered by absolute fire time. The loop
//! sleeps in bounded slices toward the head of the queue and, between slices,
//! merges playgrounds created or edited since the last sync.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use phantom_core::config::ConcurrencyConfig;
use phantom_core::Playground;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::RunDispatcher;
use crate::error::EngineError;
use crate::interval::next_fire_at;
use crate::store::PlaygroundStore;

// ── Clock ────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored once and advanced by tokio's clock, so paused test
/// time moves it too.
pub struct TokioClock {
    wall: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

// ── Queue ────────────────────────────────────────────────────────

/// Playgrounds keyed by next fire time; at most one entry per playground.
#[derive(Debug, Default)]
pub struct FireQueue {
    order: BTreeMap<(DateTime<Utc>, Uuid), Playground>,
    index: HashMap<Uuid, DateTime<Utc>>,
}

impl FireQueue {
    pub fn insert(&mut self, fire_at: DateTime<Utc>, playground: Playground) {
        self.remove(playground.id);
        self.index.insert(playground.id, fire_at);
        self.order.insert((fire_at, playground.id), playground);
    }

    pub fn remove(&mut self, playground_id: Uuid) -> Option<Playground> {
        let fire_at = self.index.remove(&playground_id)?;
        self.order.remove(&(fire_at, playground_id))
    }

    pub fn peek(&self) -> Option<(DateTime<Utc>, &Playground)> {
        self.order.iter().next().map(|((at, _), pg)| (*at, pg))
    }

    pub fn pop(&mut self) -> Option<(DateTime<Utc>, Playground)> {
        let ((at, id), pg) = self.order.pop_first()?;
        self.index.remove(&id);
        Some((at, pg))
    }

    pub fn fire_time(&self, playground_id: Uuid) -> Option<DateTime<Utc>> {
        self.index.get(&playground_id).copied()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// ── Scheduler ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Longest single sleep; bounds how stale the queue can get.
    pub sleep_slice: Duration,
    /// Firings observed later than this after their time are dropped.
    pub grace: chrono::Duration,
    /// Minimum distance between a firing and the playground's previous
    /// firing, or its stored start when this scheduler has not fired it yet.
    pub min_spacing: chrono::Duration,
}

impl From<&ConcurrencyConfig> for SchedulerSettings {
    fn from(config: &ConcurrencyConfig) -> Self {
        Self {
            sleep_slice: config.scheduler_sleep(),
            grace: chrono::Duration::milliseconds(config.execution_grace_period_ms as i64),
            min_spacing: chrono::Duration::milliseconds(config.max_execution_frequency_ms as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PastGrace,
    TooSoon,
}

pub struct CronScheduler {
    store: Arc<dyn PlaygroundStore>,
    dispatcher: Arc<RunDispatcher>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    queue: FireQueue,
    high_water: Option<DateTime<Utc>>,
    last_fired: HashMap<Uuid, DateTime<Utc>>,
}

impl CronScheduler {
    pub fn new(
        store: Arc<dyn PlaygroundStore>,
        dispatcher: Arc<RunDispatcher>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            settings,
            queue: FireQueue::default(),
            high_water: None,
            last_fired: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &FireQueue {
        &self.queue
    }

    /// Loop until `shutdown` flips to true or its sender is dropped.
    /// Store errors are logged and the loop carries on.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sleep_slice_ms = self.settings.sleep_slice.as_millis() as u64,
            "Cron scheduler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = tokio::select! {
                outcome = self.step() => outcome,
                _ = shutdown.changed() => break,
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Scheduler cycle failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.sleep_slice) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
        info!("Cron scheduler stopped");
    }

    /// One pass: (re)load, wait a slice toward the head, or fire the head.
    pub async fn step(&mut self) -> Result<(), EngineError> {
        if self.queue.is_empty() {
            self.load().await?;
            if self.queue.is_empty() {
                debug!("No scheduleable playgrounds");
                tokio::time::sleep(self.settings.sleep_slice).await;
            }
            return Ok(());
        }

        let Some((fire_at, _)) = self.queue.peek() else {
            return Ok(());
        };
        let now = self.clock.now();
        if fire_at > now {
            let wait = (fire_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.settings.sleep_slice);
            tokio::time::sleep(wait).await;
            if self.clock.now() < fire_at {
                return self.merge_updates().await;
            }
        }

        if let Some((fire_at, playground)) = self.queue.pop() {
            self.fire(fire_at, playground).await;
        }
        Ok(())
    }

    /// Replace the queue with every scheduleable playground.
    pub async fn load(&mut self) -> Result<(), EngineError> {
        let playgrounds = self.store.scheduleable_playgrounds().await?;
        let now = self.clock.now();
        self.queue.clear();
        for playground in playgrounds {
            self.raise_high_water(playground.touched_at());
            self.admit(playground, now);
        }
        info!(queued = self.queue.len(), "Loaded schedule");
        Ok(())
    }

    /// Re-sync playgrounds created or edited since the last load or merge.
    pub async fn merge_updates(&mut self) -> Result<(), EngineError> {
        let mark = self.high_water.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let touched = self.store.playgrounds_touched_after(mark).await?;
        if touched.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        for playground in touched {
            self.raise_high_water(playground.touched_at());
            self.queue.remove(playground.id);
            if playground.is_scheduleable() {
                debug!(playground_id = %playground.id, "Re-scheduling edited playground");
                self.admit(playground, now);
            } else {
                debug!(playground_id = %playground.id, "Playground no longer scheduled");
                self.last_fired.remove(&playground.id);
            }
        }
        Ok(())
    }

    pub fn skip_reason(&self, playground: &Playground, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<SkipReason> {
        if now - fire_at > self.settings.grace {
            return Some(SkipReason::PastGrace);
        }
        // The stored start of a run this scheduler dispatched lags its fire time.
        let previous = self.last_fired.get(&playground.id).copied().or(playground.last_executed_at);
        match previous {
            Some(last) if fire_at - last < self.settings.min_spacing => Some(SkipReason::TooSoon),
            _ => None,
        }
    }

    async fn fire(&mut self, fire_at: DateTime<Utc>, playground: Playground) {
        let now = self.clock.now();
        match self.skip_reason(&playground, fire_at, now) {
            Some(reason) => {
                info!(playground_id = %playground.id, fire_at = %fire_at, reason = ?reason, "Skipping firing");
            }
            None => {
                info!(playground_id = %playground.id, name = %playground.name, fire_at = %fire_at, "Firing scheduled run");
                drop(self.dispatcher.submit_scheduled(playground.clone()));
                self.last_fired.insert(playground.id, fire_at);
            }
        }

        // Edited crons come back through merge_updates instead.
        let current = match self.store.get_playground(playground.id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(playground_id = %playground.id, error = %e, "Failed to refresh playground, keeping cached copy");
                Some(playground.clone())
            }
        };
        if let Some(current) = current {
            if current.cron_expression == playground.cron_expression {
                self.admit(current, now.max(fire_at));
            }
        }
    }

    fn admit(&mut self, playground: Playground, after: DateTime<Utc>) {
        let Some(cron) = playground.cron_expression.as_deref() else {
            return;
        };
        match next_fire_at(cron, after) {
            Some(fire_at) => {
                debug!(playground_id = %playground.id, fire_at = %fire_at, "Queued firing");
                self.queue.insert(fire_at, playground);
            }
            None => {
                warn!(playground_id = %playground.id, cron = %cron, "Unusable cron expression, not scheduling");
            }
        }
    }

    fn raise_high_water(&mut self, touched: DateTime<Utc>) {
        self.high_water = Some(self.high_water.map_or(touched, |mark| mark.max(touched)));
    }
}
