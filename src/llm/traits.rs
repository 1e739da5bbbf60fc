//! Provider 抽象
//!
//! 所有后端（OpenAI 兼容端点 / Mock）实现 Provider：chat（非流式）与 health_check。
//! ProviderError 区分「普通失败」与「立即下线信号」（SilentMode），路由器据此决定计数还是直接标记 DOWN。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{Classify, ErrorType};
use crate::llm::{ChatOptions, ChatResponse, Message};

/// Provider 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("HTTP 429 rate limited: {0}")]
    RateLimited(String),

    /// 客户端自身进入静默模式（短时间内 429 过多），路由器应立即标记 DOWN
    #[error("provider in silent mode: {0}")]
    SilentMode(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

/// 路由器用于健康计数的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 立即下线
    ImmediateDown,
    RateLimited,
    /// 模型端点不存在，立即下线
    NotFound,
    ServerError,
    /// 其余失败：不计数，只触发本次调用的故障转移
    Generic,
}

impl ProviderError {
    /// 从任意错误文本构造（没有状态码的客户端走这里）
    pub fn from_message(message: impl Into<String>) -> Self {
        ProviderError::Other(message.into())
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            ProviderError::SilentMode(_) => FailureClass::ImmediateDown,
            ProviderError::RateLimited(_) => FailureClass::RateLimited,
            ProviderError::Http { status: 429, .. } => FailureClass::RateLimited,
            ProviderError::Http { status: 404, .. } => FailureClass::NotFound,
            ProviderError::Http { status: 500..=599, .. } => FailureClass::ServerError,
            other => Self::class_from_text(&other.to_string()),
        }
    }

    /// 文本兜底：429 优先于 404，再看 5xx
    fn class_from_text(text: &str) -> FailureClass {
        if text.contains("429") {
            FailureClass::RateLimited
        } else if text.contains("404") {
            FailureClass::NotFound
        } else if ["500", "502", "503"].iter().any(|code| text.contains(code)) {
            FailureClass::ServerError
        } else {
            FailureClass::Generic
        }
    }
}

impl Classify for ProviderError {
    fn error_type(&self) -> Option<ErrorType> {
        match self {
            ProviderError::RateLimited(_) | ProviderError::SilentMode(_) => {
                Some(ErrorType::RateLimited)
            }
            ProviderError::Timeout(_) => Some(ErrorType::Timeout),
            ProviderError::Connect(_) => Some(ErrorType::NetworkUnreachable),
            ProviderError::Http { status, .. } => match status {
                401 | 403 => Some(ErrorType::AuthRequired),
                404 => Some(ErrorType::NotFound),
                429 => Some(ErrorType::RateLimited),
                _ => None,
            },
            ProviderError::Other(_) => None,
        }
    }
}

/// Provider trait：统一的 chat / health_check 契约
#[async_trait]
pub trait Provider: Send + Sync {
    /// 名称（日志用）
    fn name(&self) -> &str;

    /// 非流式对话
    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;

    /// 连通性检查；默认发一条极短的 ping
    async fn health_check(&self) -> bool {
        let ping = [Message::user("ping")];
        self.chat(&ping, &ChatOptions::new().with_max_tokens(1))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorClassifier;

    #[test]
    fn test_failure_class_structured() {
        let e = ProviderError::Http { status: 503, message: "busy".into() };
        assert_eq!(e.failure_class(), FailureClass::ServerError);
        let e = ProviderError::Http { status: 404, message: "no model".into() };
        assert_eq!(e.failure_class(), FailureClass::NotFound);
        assert_eq!(
            ProviderError::SilentMode("x".into()).failure_class(),
            FailureClass::ImmediateDown
        );
    }

    #[test]
    fn test_failure_class_from_text() {
        assert_eq!(
            ProviderError::from_message("HTTP 429 Too Many Requests").failure_class(),
            FailureClass::RateLimited
        );
        assert_eq!(
            ProviderError::from_message("HTTP 500 Internal Server Error").failure_class(),
            FailureClass::ServerError
        );
        assert_eq!(
            ProviderError::from_message("zhipu down").failure_class(),
            FailureClass::Generic
        );
    }

    #[test]
    fn test_classify_provider_error() {
        let e = ProviderError::Http { status: 401, message: "bad key".into() };
        assert_eq!(ErrorClassifier::classify(&e).error_type, ErrorType::AuthRequired);
        let e = ProviderError::from_message("dns lookup failed");
        assert_eq!(
            ErrorClassifier::classify(&e).error_type,
            ErrorType::NetworkUnreachable
        );
    }
}
