//! Background jobs: periodic evaluation tick, feedback pull, enrichment sweep
//! and interviewer reminders.
//! Each job ticks on a `tokio::time::interval`; a tick that is still running
//! when the next one is due is skipped, never stacked.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stagehand_core::config::StagehandConfig;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::feedback_sync::FeedbackSync;
use crate::orchestrator::AdvancementEngine;
use crate::refetch::EnrichmentSweep;
use crate::reminders::FeedbackReminders;

/// At most one holder at a time; a second caller is turned away.
pub struct JobGate {
    name: &'static str,
    lock: Mutex<()>,
}

impl JobGate {
    pub fn new(name: &'static str) -> Self {
        Self { name, lock: Mutex::new(()) }
    }

    /// `None` when a previous run still holds the gate.
    pub fn try_enter(&self) -> Option<MutexGuard<'_, ()>> {
        match self.lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("⏭️ {} job still running, skipping this tick", self.name);
                None
            }
        }
    }
}

/// Run `job` every `every` until `shutdown` flips to true. The first run
/// happens one full period after start.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::info!("⏰ {name} job started (every {:?})", every);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => job().await,
        }
    }
    tracing::info!("🛑 {name} job stopped");
}

/// Spawn the periodic jobs. Reminders only run when enabled. They all stop
/// when `shutdown` is set.
pub fn spawn_background_jobs(
    engine: Arc<AdvancementEngine>,
    sync: Arc<FeedbackSync>,
    sweep: Arc<EnrichmentSweep>,
    reminders: Arc<FeedbackReminders>,
    config: &StagehandConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let minutes = |m: u64| Duration::from_secs(m.max(1) * 60);
    let mut handles = Vec::with_capacity(4);

    handles.push(tokio::spawn(run_periodic(
        "advancement",
        minutes(config.advancement.evaluation_interval_mins),
        shutdown.clone(),
        move || {
            let engine = engine.clone();
            async move {
                if let Err(e) = engine.try_tick().await {
                    tracing::error!("❌ advancement tick failed: {e}");
                }
            }
        },
    )));

    handles.push(tokio::spawn(run_periodic(
        "feedback sync",
        minutes(config.feedback_sync.interval_mins),
        shutdown.clone(),
        move || {
            let sync = sync.clone();
            async move {
                if let Err(e) = sync.try_sync_all().await {
                    tracing::error!("❌ feedback sync failed: {e}");
                }
            }
        },
    )));

    if config.reminders.enabled {
        handles.push(tokio::spawn(run_periodic(
            "feedback reminders",
            minutes(config.reminders.interval_mins),
            shutdown.clone(),
            move || {
                let reminders = reminders.clone();
                async move {
                    if let Err(e) = reminders.try_run().await {
                        tracing::error!("❌ feedback reminders failed: {e}");
                    }
                }
            },
        )));
    }

    handles.push(tokio::spawn(run_periodic(
        "enrichment sweep",
        minutes(config.enrichment.refetch_interval_mins),
        shutdown,
        move || {
            let sweep = sweep.clone();
            async move {
                if let Err(e) = sweep.try_run().await {
                    tracing::error!("❌ enrichment sweep failed: {e}");
                }
            }
        },
    )));

    handles
}
