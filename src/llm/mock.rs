//! Mock Provider（用于测试与演示，无需 API）
//!
//! 先按脚本队列依次返回，队列耗尽后返回固定行为；记录调用次数与最后一次请求，便于断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::llm::{ChatOptions, ChatResponse, Message, Provider, ProviderError};

type Outcome = Result<ChatResponse, ProviderError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 可编排的 Mock Provider
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    health_checks: AtomicUsize,
    last_options: Mutex<Option<ChatOptions>>,
    last_messages: Mutex<Vec<Message>>,
}

impl MockProvider {
    /// 始终回复 content
    pub fn replying(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let reply = ChatResponse::new(content, name.clone());
        Self::with_fallback(name, Ok(reply))
    }

    /// 始终失败
    pub fn failing(name: impl Into<String>, error: ProviderError) -> Self {
        Self::with_fallback(name.into(), Err(error))
    }

    fn with_fallback(name: String, fallback: Outcome) -> Self {
        Self {
            name,
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// 追加一次性结果（优先于固定行为）
    pub fn push(&self, outcome: Outcome) {
        lock(&self.script).push_back(outcome);
    }

    /// 改为始终回复 content
    pub fn set_reply(&self, content: impl Into<String>) {
        *lock(&self.fallback) = Ok(ChatResponse::new(content, self.name.clone()));
    }

    /// 改为始终失败
    pub fn set_error(&self, error: ProviderError) {
        *lock(&self.fallback) = Err(error);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ChatOptions> {
        lock(&self.last_options).clone()
    }

    pub fn last_messages(&self) -> Vec<Message> {
        lock(&self.last_messages).clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_options) = Some(options.clone());
        *lock(&self.last_messages) = messages.to_vec();

        let scripted = lock(&self.script).pop_front();
        let outcome = scripted.unwrap_or_else(|| lock(&self.fallback).clone());
        outcome.map(|mut resp| {
            if let Some(model) = &options.model {
                resp.model = model.clone();
            }
            resp
        })
    }

    async fn health_check(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let p = MockProvider::replying("m", "steady");
        p.push(Err(ProviderError::from_message("HTTP 429")));
        let msgs = [Message::user("hi")];
        assert!(p.chat(&msgs, &ChatOptions::new()).await.is_err());
        let resp = p.chat(&msgs, &ChatOptions::new().with_model("x")).await.unwrap();
        assert_eq!(resp.content, "steady");
        assert_eq!(resp.model, "x");
        assert_eq!(p.calls(), 2);
    }
}
