//! The monitor check-in subsystem: a per-environment state machine that
//! debounces noisy recoveries via a trailing-window recovery threshold and
//! recomputes expected check-in deadlines.

pub mod error;
pub mod evaluator;
pub mod store;

pub use error::MonitorStoreError;
pub use evaluator::{CheckInEvaluator, EvaluationOutcome};
pub use store::{EnvironmentUpdate, InMemoryMonitorStore, MonitorStore};
