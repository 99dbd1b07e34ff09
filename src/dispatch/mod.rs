//! Dispatch engine: assignment, admission, execution, aggregation.
//!
//! Core components:
//! - `planner`: per-worker orderings of the expanded task sequence
//! - `interrupt`: cooperative stop flag and the admission backlog
//! - `gate`: bounded admission of concurrently running workers
//! - `executor`: one worker's assignment, run sequentially with failure isolation
//! - `aggregator`: single consumer turning results into status and history
//! - `dispatcher`: validation, run driver, and the caller-facing handle

pub mod aggregator;
pub mod dispatcher;
pub mod executor;
pub mod gate;
pub mod interrupt;
pub mod planner;

pub use aggregator::{ExecutionStatus, History, StatusTracker};
pub use dispatcher::{DispatchHandle, Dispatcher, RunSummary};
pub use executor::{WorkerExecutor, WorkerExit, WorkerPhase};
pub use gate::{ConcurrencyGate, GatePermit};
pub use interrupt::{InterruptController, PendingWorker};
pub use planner::AssignmentPlanner;
