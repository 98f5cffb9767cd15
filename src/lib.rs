//! patchdeck - project sync and safe-apply engine
//!
//! Connects a remote repository (through a managed mirror) or a local
//! folder as the active project, applies edit plans to it with
//! transactional undo, and publishes the result back to the remote.

pub mod commands;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use engine::Engine;
pub use error::{EngineError, ErrorResponse, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patchdeck=debug,patchdeck_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
