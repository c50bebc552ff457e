//! Application layer - use cases that chain parser, cache, installer, resolver
//! and link planner together for the CLI.

mod link;
mod sync;

pub use link::{DEFAULT_DIRECTORY, LinkReport, LinkRequest, LinkUseCase, default_symlink_name};
pub use sync::{SyncResult, SyncSummary, SyncUseCase, compile_filters};
