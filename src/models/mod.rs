//! Result models returned by the engine
//!
//! Defines the `{success, error}`-shaped values consumers receive instead of
//! errors.

pub mod results;

// Re-export commonly used types
pub use results::{OperationResult, OptimizeReport, StoreFileResult};
