//! Run execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod workdir;

pub use engine::{EventHandler, EventSink, PlanReport, RunEngine, RunEvent, RunReport};
pub use executor::{per_guest, PlanExecutor, PlanOutputs};
pub use scheduler::{PlanScheduler, SchedulingStrategy};
