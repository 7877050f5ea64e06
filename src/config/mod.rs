//! Configuration model and loader.

pub mod loader;
pub mod model;

pub use loader::{load, VerificationMode};
pub use model::{CommandGroup, GlobalConfig, ResolvedConfig};
