//! OpenAI 兼容 Provider
//!
//! 请求体用 async_openai 的类型构建，经 reqwest 直接 POST 到 `{base_url}/chat/completions`，
//! 不做任何内部重试：429 / 5xx / 404 以 `ProviderError::Http { status }` 原样交给路由器计数与故障转移。
//! 智谱、Groq、OpenRouter、NVIDIA 都走这里。

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::llm::{ChatOptions, ChatResponse, Message, Provider, ProviderError, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 错误信息保留的最大字符数
const ERROR_BODY_CHARS: usize = 300;

/// OpenAI 兼容客户端：持有 HTTP Client、端点与默认模型名；ChatOptions.model 优先
pub struct OpenAiProvider {
    name: String,
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            name: name.into(),
            http: Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// 多模态内容在这里降级为占位文本
    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
        messages
            .iter()
            .map(|m| {
                let text = m.text().to_string();
                let msg = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(text)
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(text)
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(text)
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                msg.map_err(|e| ProviderError::Other(e.to_string()))
            })
            .collect()
    }
}

/// 传输层错误（未拿到 HTTP 响应）-> ProviderError
fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() {
        ProviderError::Connect(e.to_string())
    } else {
        ProviderError::from_message(e.to_string())
    }
}

/// 非 2xx 响应体里的错误说明：优先 `error.message`，否则截断原文
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
    });
    match message {
        Some(m) => m.to_string(),
        None => body.chars().take(ERROR_BODY_CHARS).collect(),
    }
}

/// 从响应 JSON 宽松提取内容与用量（各家兼容端点字段不完全一致）
fn parse_response(raw: Value, requested_model: String) -> ChatResponse {
    let content = raw
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or(requested_model);
    let tokens = |key: &str| {
        raw.pointer(&format!("/usage/{key}"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let usage = Usage {
        prompt_tokens: tokens("prompt_tokens"),
        completion_tokens: tokens("completion_tokens"),
        total_tokens: tokens("total_tokens"),
    };
    ChatResponse {
        content,
        model,
        usage,
        raw,
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let model = options.model.clone().unwrap_or_else(|| self.model.clone());

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model.clone())
            .messages(Self::to_openai_messages(messages)?);
        if let Some(max_tokens) = options.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }
        if !options.extra.is_empty() {
            tracing::debug!(
                "{}: ignoring {} extra option(s) not supported by the chat API",
                self.name,
                options.extra.len()
            );
        }
        let request = args
            .build()
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Other(format!("invalid chat response: {e}")))?;
        Ok(parse_response(raw, model))
    }
}
