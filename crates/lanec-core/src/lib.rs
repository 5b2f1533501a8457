pub mod diagnostics;
pub mod error;
pub mod frontend;
pub mod lir;
pub mod pretty;
pub mod span;
pub mod target;
pub mod types;

// Re-export commonly used items for convenience
pub use tracing;

pub use frontend::{CompiledModule, LanguageFrontend, SnapshotFrontend, TargetContext};
pub use target::{Arch, Isa, Target, TargetError};

// Alias for error types
pub type Error = crate::error::Error;
pub type Result<T> = crate::error::Result<T>;
