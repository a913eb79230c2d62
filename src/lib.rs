//! testcraft - run the same test plans against local, ssh and container guests

pub mod cli;
pub mod core;
pub mod execution;
pub mod guest;
pub mod library;
pub mod persistence;
pub mod plugin;
pub mod plugins;

// Re-export commonly used types
pub use crate::core::{Error, ErrorKind, ExecutionStatus, Plan, PlansConfig, Result, RunContext, Step, StepKind};
pub use execution::{RunEngine, RunEvent, RunReport, SchedulingStrategy};
pub use guest::{Guest, GuestHandle};
pub use library::{LibraryCache, LibraryIdentifier};
pub use plugin::{Method, Registries};
