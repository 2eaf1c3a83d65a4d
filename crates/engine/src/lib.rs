pub mod cancel;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod interval;
pub mod reconcile;
pub mod recovery;
pub mod run;
pub mod scheduler;
pub mod store;

pub use cancel::CancellationRegistry;
pub use dispatch::{CancelOutcome, Pool, RunDispatcher, RunHandle};
pub use error::{EngineError, StoreError};
pub use graph::{build_task_graph, TaskGraph};
pub use interval::{next_fire_at, next_fire_offset_millis, INVALID_OFFSET, NO_MORE_TODAY};
pub use reconcile::{NoReconciliation, Reconciler};
pub use recovery::recover_running;
pub use run::{PlaygroundRunner, RunOutcome};
pub use scheduler::{Clock, CronScheduler, FireQueue, SchedulerSettings, SkipReason, SystemClock, TokioClock};
pub use store::{MemoryStore, PlaygroundStore, TaskOutcome};
