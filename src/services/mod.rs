//! Service layer for patchdeck
//!
//! Services hold the engine's behavior; the command layer composes them
//! and owns error reporting.

pub mod branch_resolver;
pub mod config;
pub mod credentials_service;
pub mod fallback;
pub mod git_cli;
pub mod git_errors;
pub mod locks;
pub mod mirror_service;
pub mod planner;
pub mod project_state;
pub mod sandbox;
pub mod session_service;
pub mod store;

pub use config::EngineConfig;
pub use git_cli::GitCli;
pub use mirror_service::MirrorService;
pub use planner::{CodebaseContext, EditPlanGenerator};
pub use project_state::ProjectState;
pub use session_service::SessionService;
pub use store::Store;
