//! 核心错误类型
//!
//! RouterError 表示路由链整体失败（上游耗尽），是终态错误，必须以类型化错误返回给调用方；
//! RelayError 汇总 crate 级错误（配置加载与取值校验、路由、IO、JSON）。

use thiserror::Error;

use crate::core::classifier::{Classify, ErrorType};
use crate::llm::ModelRole;

/// 路由失败：链上所有 Provider 都失败或都处于 DOWN
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("RouterError: all providers failed for role={role}: {last_error}")]
    AllProvidersFailed { role: ModelRole, last_error: String },

    #[error("RouterError: no live provider for role={role}")]
    NoProviderAvailable { role: ModelRole },
}

impl Classify for RouterError {
    fn error_type(&self) -> Option<ErrorType> {
        Some(ErrorType::UpstreamExhausted)
    }
}

/// crate 级错误
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
