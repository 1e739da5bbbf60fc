//! 上下文桥接
//!
//! 故障转移到上下文窗口更小的备用模型时，保留最近 N 条原文，更早的部分替换为一条 system 摘要：
//! 优先请备用 Provider 生成 LLM 摘要，失败时退化为确定性的截断横幅。
//! 结果恒为 `keep_recent_turns + 1` 条，对已桥接过的消息再次桥接不会继续变长。

use crate::llm::{ChatOptions, Message, Provider};

/// 送入摘要模型的最大字符数（只保留尾部）
const SUMMARY_INPUT_MAX_CHARS: usize = 8000;
/// 截断横幅中保留的较早消息条数
const FALLBACK_LINES: usize = 10;
/// 截断横幅中每条消息的最大字符数
const FALLBACK_LINE_CHARS: usize = 200;
const SUMMARY_MAX_TOKENS: u32 = 512;

pub const SUMMARY_HEADER: &str = "[Earlier conversation summary]";
pub const FALLBACK_HEADER: &str = "[Context summary from earlier conversation]";

/// 桥接参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBridge {
    pub keep_recent_turns: usize,
    pub summary_max_chars: usize,
}

impl Default for ContextBridge {
    fn default() -> Self {
        Self {
            keep_recent_turns: 8,
            summary_max_chars: 500,
        }
    }
}

impl ContextBridge {
    pub fn new(keep_recent_turns: usize, summary_max_chars: usize) -> Self {
        Self {
            keep_recent_turns,
            summary_max_chars,
        }
    }

    /// 执行桥接；未超过 keep_recent_turns 时原样返回
    pub async fn bridge(
        &self,
        messages: Vec<Message>,
        summarizer: Option<&dyn Provider>,
    ) -> Vec<Message> {
        if messages.len() <= self.keep_recent_turns {
            return messages;
        }

        let mut older = messages;
        let recent = older.split_off(older.len() - self.keep_recent_turns);

        let summary = match summarizer {
            Some(p) => self.summarize(&older, p).await,
            None => None,
        };
        let summary = summary.unwrap_or_else(|| Self::truncation_fallback(&older));

        let mut bridged = Vec::with_capacity(recent.len() + 1);
        bridged.push(Message::system(summary));
        bridged.extend(recent);
        bridged
    }

    /// 请备用模型压缩较早对话；任何失败返回 None
    async fn summarize(&self, older: &[Message], provider: &dyn Provider) -> Option<String> {
        let transcript = older
            .iter()
            .map(|m| format!("[{}]: {}", m.role.as_str(), m.text()))
            .collect::<Vec<_>>()
            .join("\n");
        let transcript = tail_chars(&transcript, SUMMARY_INPUT_MAX_CHARS);

        let request = [
            Message::system(format!(
                "You are a conversation summarizer. Compress the following conversation into a \
                 concise summary under {} characters. Preserve key decisions, facts, and user \
                 preferences. Output only the summary in the same language.",
                self.summary_max_chars
            )),
            Message::user(transcript),
        ];
        let options = ChatOptions::new().with_max_tokens(SUMMARY_MAX_TOKENS);

        match provider.chat(&request, &options).await {
            Ok(resp) if !resp.content.trim().is_empty() => {
                let body = head_chars(resp.content.trim(), self.summary_max_chars);
                let summary = format!("{}\n{}", SUMMARY_HEADER, body);
                tracing::debug!("LLM summarization succeeded: {} chars", summary.chars().count());
                Some(summary)
            }
            Ok(_) => {
                tracing::warn!("LLM summarization returned empty content, using fallback");
                None
            }
            Err(e) => {
                tracing::warn!("LLM summarization failed, using fallback: {}", e);
                None
            }
        }
    }

    /// 确定性截断：最后 10 条较早消息，每条最多 200 字符
    pub fn truncation_fallback(older: &[Message]) -> String {
        let lines: Vec<String> = older
            .iter()
            .map(|m| {
                let text = m.text();
                let text = if text.chars().count() > FALLBACK_LINE_CHARS {
                    format!("{}...", head_chars(text, FALLBACK_LINE_CHARS))
                } else {
                    text.to_string()
                };
                format!("[{}]: {}", m.role.as_str(), text)
            })
            .collect();
        let start = lines.len().saturating_sub(FALLBACK_LINES);
        format!("{}\n{}", FALLBACK_HEADER, lines[start..].join("\n"))
    }
}

fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}
