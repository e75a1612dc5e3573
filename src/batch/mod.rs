//! Batch lifecycle: the run lock, the coordinator that drives one batch,
//! and the scheduler that decides when batches run.

mod coordinator;
mod lock;
pub mod scheduler;

pub use coordinator::{
    local_day_bounds, BatchCoordinator, BatchOutcome, BatchReport, BatchStage, DeliveryStatus, SourceReport,
};
pub use lock::{RunGuard, RunLock, RUN_LOCK_NAME};
pub use scheduler::{
    due_runs, parse_hhmm, ScheduleTimes, Scheduler, SchedulerHandle, EVENING_TIME_KEY, MORNING_TIME_KEY,
};
