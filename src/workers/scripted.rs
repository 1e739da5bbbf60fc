//! 脚本化 Worker（用于测试与演示）
//!
//! 先按脚本队列依次返回，队列耗尽后返回固定结果；可选延迟；记录调用次数与每次的 kwargs。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::react::WorkerKind;
use crate::workers::Worker;

type Outcome = Result<Value, String>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct ScriptedWorker {
    kind: WorkerKind,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
    kwargs_log: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedWorker {
    fn with_fallback(kind: WorkerKind, fallback: Outcome) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            kwargs_log: Mutex::new(Vec::new()),
        }
    }

    /// 始终返回 value
    pub fn succeeding(kind: WorkerKind, value: Value) -> Self {
        Self::with_fallback(kind, Ok(value))
    }

    /// 始终返回失败负载 `{error, worker}`
    pub fn failing(kind: WorkerKind, error: impl Into<String>) -> Self {
        let payload = json!({ "error": error.into(), "worker": kind.as_str() });
        Self::with_fallback(kind, Ok(payload))
    }

    /// 始终返回 Err
    pub fn raising(kind: WorkerKind, error: impl Into<String>) -> Self {
        Self::with_fallback(kind, Err(error.into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加一次性结果（优先于固定结果）
    pub fn push(&self, outcome: Outcome) {
        lock(&self.script).push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_kwargs(&self) -> Option<Map<String, Value>> {
        lock(&self.kwargs_log).last().cloned()
    }

    pub fn kwargs_log(&self) -> Vec<Map<String, Value>> {
        lock(&self.kwargs_log).clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn kind(&self) -> WorkerKind {
        self.kind
    }

    async fn execute(&self, _task: &str, kwargs: Map<String, Value>) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.kwargs_log).push(kwargs);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
