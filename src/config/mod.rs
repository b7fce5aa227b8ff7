// This module re-exports important pieces for convenience,
// so we can "use crate::config::*" easily.
pub mod env;
pub mod logging;
pub mod types;

pub use env::*;
pub use logging::*;
pub use types::*;
