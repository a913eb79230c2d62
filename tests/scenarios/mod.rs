//! Scenario-based tests for testcraft

mod dry_run;
mod guest_failure;
mod library_cache;
mod local_run;
mod resume;
