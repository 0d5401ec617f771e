//! Crate includes reusable utils for the custodian's binaries.
//! Such as initializing the tracing framework.

pub mod logging;

// Re-export tracing crate for convenience.
pub use tracing;
