//! Background Tasks Module
//!
//! Contains the tasks that run alongside the engine.
//!
//! # Tasks
//! - Optimizer: cleanup plus compression sweep on the configured interval
//! - Compression: finishes a deferred write off the calling task

mod compression;
mod optimizer;

pub use compression::spawn_compression;
pub use optimizer::spawn_optimizer_task;
