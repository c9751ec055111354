//! Stack sanitizer trap.
//!
//! Modules built with the stack sanitizer call
//! `__stack_sanitizer.report_stack_overflow` when they detect native stack
//! exhaustion. The call always fails and is never recovered.

use crate::engine::imports::{HostFunc, ImportNamespace};
use crate::error::RunnerError;
use tracing::error;

/// Namespace of the sanitizer import
pub const SANITIZER_NAMESPACE: &str = "__stack_sanitizer";

/// Name of the sanitizer import
pub const REPORT_STACK_OVERFLOW: &str = "report_stack_overflow";

/// The fixed sanitizer namespace
pub fn namespace() -> ImportNamespace {
    ImportNamespace::new().with_func(
        REPORT_STACK_OVERFLOW,
        HostFunc::new([], [], |_caller, _params, _results| {
            error!("Detected stack buffer overflow.");
            Err(RunnerError::StackOverflow.into())
        }),
    )
}
