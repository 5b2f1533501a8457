//! Command implementations for the lanec CLI

pub mod compile;
pub mod targets;

pub use compile::compile_command;
pub use targets::targets_command;
