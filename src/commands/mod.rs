//! Command handlers
//!
//! Each command is one async call against an `Engine`. Failures are caught
//! at the command boundary, folded into the operation's error code when
//! unclassified, and logged once.

pub mod apply;
pub mod publish;
pub mod sync;
pub mod undo;

use crate::error::{EngineError, Operation};

pub use apply::{apply_file, apply_plan, propose_and_apply, start_attempt};
pub use publish::publish;
pub use sync::{active_project, disconnect, reconnect_from_history, record_run, sync};
pub use undo::{latest_attempt_status, undo};

/// Classify and log a failure leaving `operation`.
pub(crate) fn at_boundary(operation: Operation, error: EngineError) -> EngineError {
    let error = error.within(operation);
    match error.details() {
        Some(details) => tracing::error!(
            "{} failed [{}]: {} ({})",
            operation.as_str(),
            error.code(),
            error.reason(),
            details
        ),
        None => tracing::error!(
            "{} failed [{}]: {}",
            operation.as_str(),
            error.code(),
            error.reason()
        ),
    }
    error
}
