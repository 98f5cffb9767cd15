//! Data models for patchdeck

pub mod attempt;
pub mod plan;
pub mod project;
pub mod sync;

pub use attempt::*;
pub use plan::*;
pub use project::*;
pub use sync::*;
