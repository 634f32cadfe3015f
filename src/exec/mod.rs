//! External process execution.
//!
//! This module contains the two lowest layers of the pipeline:
//!
//! - **Invoker**: runs one external command to completion and reports its
//!   exit code and captured output
//! - **Retry**: wraps an invocation with bounded retry and fixed backoff

pub mod invoker;
pub mod retry;

pub use invoker::{locate, ToolError, ToolInvoker, ToolOutput};
pub use retry::{run_with_retry, Attempted, RetryPolicy};
