//! 对话消息与请求 / 响应类型
//!
//! Message 的 content 既可以是纯文本，也可以是多模态分段（图片 URL 等原样 JSON），
//! 路由层只关心文本；多模态内容在摘要 / 截断时以占位符表示。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 消息内容：文本或多模态分段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

/// 多模态内容在文本化时的占位符
pub const MULTIMODAL_PLACEHOLDER: &str = "[multimodal content]";

impl MessageContent {
    /// 文本视图；多模态返回占位符
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text(s) => s,
            MessageContent::Parts(_) => MULTIMODAL_PLACEHOLDER,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn multimodal(role: Role, parts: Vec<Value>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_text()
    }
}

/// 调用参数（对应 Provider 的 kwargs）；链上每个条目可带覆盖项，覆盖项优先
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// 其余透传给 Provider 的参数
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// 合并：`overrides` 中已设置的字段覆盖 self
    pub fn merged_with(&self, overrides: &ChatOptions) -> ChatOptions {
        let mut extra = self.extra.clone();
        for (k, v) in &overrides.extra {
            extra.insert(k.clone(), v.clone());
        }
        ChatOptions {
            model: overrides.model.clone().or_else(|| self.model.clone()),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            temperature: overrides.temperature.or(self.temperature),
            extra,
        }
    }
}

/// Token 使用统计（单次响应）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Provider 响应
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub raw: Value,
}

impl ChatResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_override_wins() {
        let base = ChatOptions::new().with_model("a").with_max_tokens(20);
        let merged = base.merged_with(&ChatOptions::new().with_model("b"));
        assert_eq!(merged.model.as_deref(), Some("b"));
        assert_eq!(merged.max_tokens, Some(20));
    }

    #[test]
    fn test_multimodal_text_view() {
        let msg = Message::multimodal(
            Role::User,
            vec![json!({"type": "image_url", "image_url": {"url": "http://img"}})],
        );
        assert_eq!(msg.text(), MULTIMODAL_PLACEHOLDER);
        assert_eq!(Message::user("hi").text(), "hi");
    }

    #[test]
    fn test_message_serde() {
        let msg = Message::system("s");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"role": "system", "content": "s"}));
    }
}
