//! 去重与环路检测

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::react::WorkerKind;

/// 去重键中保留的任务前缀字符数
pub const TASK_PREFIX_CHARS: usize = 80;
pub const DEDUP_TTL: Duration = Duration::from_secs(30 * 60);

/// 相同 (worker, 任务前缀) 的错误在 TTL 内只处理一次，之后直接跳过该 Worker
#[derive(Debug)]
pub struct ErrorDeduplicator {
    ttl: Duration,
    seen: Mutex<HashMap<(WorkerKind, String), Instant>>,
}

impl ErrorDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(worker: WorkerKind, task: &str) -> (WorkerKind, String) {
        (worker, task.chars().take(TASK_PREFIX_CHARS).collect())
    }

    pub async fn is_duplicate(&self, worker: WorkerKind, task: &str) -> bool {
        let seen = self.seen.lock().await;
        seen.get(&Self::key(worker, task))
            .map(|t| t.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// 记录并顺带淘汰过期条目
    pub async fn record(&self, worker: WorkerKind, task: &str) {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.insert(Self::key(worker, task), now);
        let ttl = self.ttl;
        seen.retain(|_, t| now.duration_since(*t) < ttl);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for ErrorDeduplicator {
    fn default() -> Self {
        Self::new(DEDUP_TTL)
    }
}

/// 单次 execute 内的环路检测：A→A 或 A→B→A
#[derive(Debug, Default)]
pub struct LoopDetector {
    actions: Vec<WorkerKind>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 true 表示检测到环路（此时不记录）
    pub fn record(&mut self, worker: WorkerKind) -> bool {
        let n = self.actions.len();
        if n >= 1 && self.actions[n - 1] == worker {
            return true;
        }
        if n >= 2 && self.actions[n - 2] == worker {
            return true;
        }
        self.actions.push(worker);
        false
    }
}
