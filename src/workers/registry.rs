//! Worker 注册表
//!
//! 所有 Worker 实现 Worker trait（kind / execute），由 WorkerRegistry 按 WorkerKind 注册与查找。
//! invoke 在调用时加超时，把 Err 与超时统一转成 `{"error": ...}` 负载；每次调用输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::{timeout, Instant};

use crate::react::WorkerKind;

/// 审计日志中任务预览的最大字符数
const TASK_PREVIEW_CHARS: usize = 80;

/// Worker trait：成功负载不含 `error` 键，失败负载为 `{error: string, ...}`；返回 Err 视同失败
#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    async fn execute(&self, task: &str, kwargs: Map<String, Value>) -> Result<Value, String>;
}

/// Worker 注册表
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: impl Worker + 'static) {
        self.register_arc(Arc::new(worker));
    }

    pub fn register_arc(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.kind(), worker);
    }

    pub fn with(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register_arc(worker);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: WorkerKind) -> bool {
        self.workers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<WorkerKind> {
        let mut kinds: Vec<_> = self.workers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// 在超时内调用 Worker；未注册、返回 Err 或超时都转为 `{"error": ...}`
    pub async fn invoke(
        &self,
        kind: WorkerKind,
        task: &str,
        kwargs: Map<String, Value>,
        limit: Duration,
    ) -> Value {
        let Some(worker) = self.get(kind) else {
            return json!({ "error": format!("Unknown worker: {kind}") });
        };

        let start = Instant::now();
        let result = timeout(limit, worker.execute(task, kwargs)).await;

        let outcome = match &result {
            Ok(Ok(v)) if v.get("error").map_or(true, Value::is_null) => "ok",
            Ok(Ok(_)) => "error",
            Ok(Err(_)) => "exception",
            Err(_) => "timeout",
        };
        let audit = json!({
            "event": "worker_audit",
            "worker": kind.as_str(),
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "task_preview": task_preview(task),
        });
        tracing::info!(audit = %audit.to_string(), "worker");

        match result {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => json!({ "error": e }),
            Err(_) => json!({ "error": format!("Worker '{kind}' timed out") }),
        }
    }
}

fn task_preview(task: &str) -> String {
    if task.chars().count() > TASK_PREVIEW_CHARS {
        format!("{}...", task.chars().take(TASK_PREVIEW_CHARS).collect::<String>())
    } else {
        task.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::ScriptedWorker;

    #[tokio::test]
    async fn test_invoke_ok() {
        let mut reg = WorkerRegistry::new();
        reg.register(ScriptedWorker::succeeding(WorkerKind::Search, json!({"content": "hit"})));
        let v = reg
            .invoke(WorkerKind::Search, "q", Map::new(), Duration::from_secs(5))
            .await;
        assert_eq!(v["content"], "hit");
        assert_eq!(reg.kinds(), vec![WorkerKind::Search]);
    }

    #[tokio::test]
    async fn test_invoke_converts_exception() {
        let mut reg = WorkerRegistry::new();
        reg.register(ScriptedWorker::raising(WorkerKind::Browser, "unexpected crash"));
        let v = reg
            .invoke(WorkerKind::Browser, "q", Map::new(), Duration::from_secs(5))
            .await;
        assert_eq!(v["error"], "unexpected crash");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_converts_timeout() {
        let mut reg = WorkerRegistry::new();
        reg.register(
            ScriptedWorker::succeeding(WorkerKind::Code, json!({"ok": true}))
                .with_delay(Duration::from_secs(60)),
        );
        let v = reg
            .invoke(WorkerKind::Code, "q", Map::new(), Duration::from_secs(5))
            .await;
        assert_eq!(v["error"], "Worker 'code' timed out");
    }

    #[tokio::test]
    async fn test_invoke_unknown() {
        let reg = WorkerRegistry::new();
        let v = reg
            .invoke(WorkerKind::Gog, "q", Map::new(), Duration::from_secs(5))
            .await;
        assert!(v["error"].as_str().unwrap().contains("gog"));
    }

    #[test]
    fn test_task_preview() {
        assert_eq!(task_preview("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(task_preview(&long).chars().count(), 83);
    }
}
