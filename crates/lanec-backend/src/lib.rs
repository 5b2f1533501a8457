//! Multi-target compilation for lanec.
//!
//! [`Driver`] compiles a program for one or several targets. With several
//! targets, exported functions get one variant per ISA and a dispatch
//! module picks the best variant at run time.

pub mod codegen;
pub mod dispatch;
pub mod driver;
pub mod emit;
pub mod error;
pub mod options;
pub mod registry;
pub mod unify;

pub use codegen::{CodegenBackend, TextualBackend};
pub use dispatch::{DispatchCase, DispatchPlan};
pub use driver::{compile_and_output, parse_target_list, BuildOutcome, Driver};
pub use error::{BuildError, Result};
pub use options::{BuildRequest, OutputFlags, OutputType};
pub use registry::ExportRegistry;
