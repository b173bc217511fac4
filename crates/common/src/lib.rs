//! takt-common - 通用工具库

pub mod retry;

pub use retry::{RetryConfig, is_retryable_error, with_conditional_retry, with_retry};
