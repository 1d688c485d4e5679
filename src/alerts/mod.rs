//! Trigger timeout detection
//!
//! Every trigger is watched by two independent paths: a deadline timer armed
//! at ingestion and a periodic sweep over all open triggers. Both end in the
//! store's compare-and-set, so each trigger fires at most one notification.

pub mod checker;
pub mod model;
pub mod notifier;
pub mod sweeper;

pub use checker::{Evaluation, TimeoutChecker};
pub use model::{Alert, AlertKind, CorrelationKey, DeadlineWindow, NewAlert};
pub use notifier::{NotifierError, TimeoutNotifier, WebhookConfig, WebhookNotifier};
pub use sweeper::{SweepStats, SweepWorker};
