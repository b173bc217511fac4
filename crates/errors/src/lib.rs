//! takt-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范
//!
//! 错误分类规则：
//! - NotFound: 上游确认资源不存在，不重试，可短 TTL 负缓存
//! - Upstream: 上游可达但失败（或不可达），触发 stale 回退
//! - Timeout: fetch 或锁等待超时，回退行为同 Upstream，日志单独区分
//! - Backend: 缓存后端自身故障，由断路器吸收，绝不向调用方传播

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 上游类错误（含超时），允许 stale 回退后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Timeout(_))
    }

    /// 缓存后端故障，由断路器处理，不向调用方传播
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Upstream(_) => 503,
            Self::Timeout(_) => 504,
            Self::Backend(_) => 500,
            Self::Serialization(_) => 500,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.to_string(),
            instance: None,
        }
    }

    fn problem_type(&self) -> String {
        match self {
            Self::NotFound(_) => "https://api.takt.run/problems/not-found".to_string(),
            Self::Upstream(_) => "https://api.takt.run/problems/upstream".to_string(),
            Self::Timeout(_) => "https://api.takt.run/problems/timeout".to_string(),
            Self::Backend(_) => "https://api.takt.run/problems/cache-backend".to_string(),
            Self::Serialization(_) => "https://api.takt.run/problems/serialization".to_string(),
            Self::Config(_) => "https://api.takt.run/problems/config".to_string(),
            Self::Internal(_) => "https://api.takt.run/problems/internal".to_string(),
        }
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found".to_string(),
            Self::Upstream(_) => "Upstream Service Error".to_string(),
            Self::Timeout(_) => "Timeout".to_string(),
            Self::Backend(_) => "Cache Backend Error".to_string(),
            Self::Serialization(_) => "Serialization Error".to_string(),
            Self::Config(_) => "Configuration Error".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
        }
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
