//! # Stagehand Engine
//!
//! Decides when a candidate is ready to leave an interview stage and moves
//! them there.
//!
//! ## Architecture
//! ```text
//! ATS webhook ──→ Reconciler ──→ schedules / events / assignments
//! ATS feedback ─→ FeedbackSync ─→ feedback submissions (touches schedules)
//!
//! Scheduler (tokio interval, skip-if-busy)
//!   ├── every 30min → AdvancementEngine.tick
//!   │                   ├── Evaluator → Verdict
//!   │                   ├── ready → AdvanceSink (retry 2s/4s) → audit row
//!   │                   └── requirements_not_met → Notifier (rejection prompt)
//!   ├── every 30min → FeedbackSync
//!   ├── every 5min  → FeedbackReminders (interviewer DM before the interview)
//!   └── every 60min → EnrichmentSweep (plan/job refetch)
//! ```

pub mod dispatch;
pub mod evaluator;
pub mod feedback_sync;
pub mod notify;
pub mod orchestrator;
pub mod reconciler;
pub mod refetch;
pub mod reminders;
pub mod retry;
pub mod scheduler;

pub use dispatch::{DispatchNotifier, NotifyTarget};
pub use evaluator::{BlockingReason, Evaluator, RuleEvaluation, Verdict};
pub use feedback_sync::{FeedbackSync, SyncReport};
pub use notify::{Notification, Notifier, NotifyPriority};
pub use orchestrator::{
    AdvancementEngine, EngineContext, EngineSettings, RejectionOutcome, ScheduleOutcome, TickReport,
};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use refetch::{EnrichmentSweep, SweepReport};
pub use reminders::{FeedbackReminders, ReminderReport};
pub use retry::{RetryError, RetryPolicy};
pub use scheduler::{JobGate, spawn_background_jobs};
