//! 回退链执行器（ReactExecutor）
//!
//! 按 ChainKind 的顺序依次尝试 Worker：每次失败经 ErrorClassifier 分类，
//! 可重试则原地重试（退避），否则记入去重表并换下一个 Worker。
//! FuseState 的轮数 / 时间 / 每日预算在每轮开头检查，任一越界即整体放弃并给出类型化原因。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::{ErrorClassifier, ErrorType};
use crate::react::{ChainKind, ErrorDeduplicator, FuseState, LoopDetector, WorkerKind};
use crate::workers::WorkerRegistry;

/// 一次失败尝试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub worker: WorkerKind,
    pub error: String,
    pub error_type: ErrorType,
    /// 同一 Worker 的第几次重试（首次为 0）
    #[serde(rename = "retry")]
    pub retry_index: u32,
}

/// 放弃原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaveUpReason {
    SlidingWindowExceeded,
    MaxRoundsExceeded,
    TimeLimitExceeded,
    DailyBudgetExceeded,
    LoopDetected(WorkerKind),
    AllWorkersExhausted { last: Option<(WorkerKind, ErrorType)> },
}

impl fmt::Display for GaveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GaveUpReason::SlidingWindowExceeded => f.write_str("sliding_window_exceeded"),
            GaveUpReason::MaxRoundsExceeded => f.write_str("max_rounds_exceeded"),
            GaveUpReason::TimeLimitExceeded => f.write_str("time_limit_exceeded"),
            GaveUpReason::DailyBudgetExceeded => f.write_str("daily_budget_exceeded"),
            GaveUpReason::LoopDetected(w) => write!(f, "loop_detected: {w}"),
            GaveUpReason::AllWorkersExhausted { last: None } => f.write_str("all_workers_exhausted"),
            GaveUpReason::AllWorkersExhausted { last: Some((w, t)) } => {
                write!(f, "all_workers_exhausted: last={w}({t})")
            }
        }
    }
}

impl Serialize for GaveUpReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 交给外部重试队列的原始请求（原样回放）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub chain_name: String,
    pub task: String,
    pub kwargs: Map<String, Value>,
}

/// 一次 execute 的结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub run_id: String,
    pub chain: ChainKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gave_up_reason: Option<GaveUpReason>,
    #[serde(skip)]
    request: ReplayRequest,
}

impl TaskResult {
    pub fn replay_request(&self) -> ReplayRequest {
        self.request.clone()
    }
}

/// 单次调用的累积状态
struct Run {
    run_id: String,
    chain: ChainKind,
    request: ReplayRequest,
    attempts: Vec<Attempt>,
    tokens_used: u64,
}

impl Run {
    fn finish(
        self,
        result: Option<Value>,
        error: Option<String>,
        gave_up_reason: Option<GaveUpReason>,
    ) -> TaskResult {
        TaskResult {
            run_id: self.run_id,
            chain: self.chain,
            success: result.is_some(),
            result,
            error,
            attempts: self.attempts,
            tokens_used: self.tokens_used,
            gave_up_reason,
            request: self.request,
        }
    }

    fn give_up(self, reason: GaveUpReason) -> TaskResult {
        tracing::warn!(run_id = %self.run_id, "ReactExecutor gave up: {}", reason);
        let error = self.attempts.last().map(|a| a.error.clone());
        self.finish(None, error, Some(reason))
    }
}

/// 回退链执行器；FuseState 与去重表可在多个执行器间共享
pub struct ReactExecutor {
    workers: WorkerRegistry,
    fuse: Arc<FuseState>,
    dedup: Arc<ErrorDeduplicator>,
}

impl ReactExecutor {
    pub fn new(workers: WorkerRegistry, fuse: Arc<FuseState>) -> Self {
        Self {
            workers,
            fuse,
            dedup: Arc::new(ErrorDeduplicator::default()),
        }
    }

    pub fn with_dedup(mut self, dedup: Arc<ErrorDeduplicator>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn fuse(&self) -> &Arc<FuseState> {
        &self.fuse
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// 按回退链执行任务；未知链名走 general
    pub async fn execute(&self, chain_name: &str, task: &str, kwargs: Map<String, Value>) -> TaskResult {
        let chain = ChainKind::resolve(chain_name);
        let mut run = Run {
            run_id: Uuid::new_v4().to_string(),
            chain,
            request: ReplayRequest {
                chain_name: chain_name.to_string(),
                task: task.to_string(),
                kwargs: kwargs.clone(),
            },
            attempts: Vec::new(),
            tokens_used: 0,
        };

        if !self.fuse.try_acquire_window().await {
            return run.give_up(GaveUpReason::SlidingWindowExceeded);
        }

        let limits = *self.fuse.limits();
        let start = Instant::now();
        let mut rounds = 0u32;
        let mut loops = LoopDetector::new();

        for &kind in chain.workers() {
            if !self.workers.contains(kind) {
                tracing::debug!("ReactExecutor: worker '{}' not registered, skipping", kind);
                continue;
            }
            if loops.record(kind) {
                return run.give_up(GaveUpReason::LoopDetected(kind));
            }
            if self.dedup.is_duplicate(kind, task).await {
                tracing::debug!("ReactExecutor: dedup skip '{}' for this task", kind);
                continue;
            }

            let mut retry_index = 0u32;
            loop {
                rounds += 1;
                if rounds > limits.max_rounds {
                    return run.give_up(GaveUpReason::MaxRoundsExceeded);
                }
                let elapsed = start.elapsed();
                if elapsed >= limits.max_time {
                    return run.give_up(GaveUpReason::TimeLimitExceeded);
                }
                if !self.fuse.check_daily(0).await {
                    return run.give_up(GaveUpReason::DailyBudgetExceeded);
                }

                let limit = (limits.max_time - elapsed)
                    .min(limits.worker_timeout_cap)
                    .max(limits.worker_timeout_floor);
                let exec_kwargs = self.worker_kwargs(kind, chain_name, &kwargs, &run.attempts);
                let payload = self.workers.invoke(kind, task, exec_kwargs, limit).await;

                let Some(strategy) = ErrorClassifier::classify_worker_result(&payload) else {
                    if kind.is_metered() {
                        run.tokens_used += limits.metered_token_estimate;
                        self.fuse.record_daily(limits.metered_token_estimate).await;
                    }
                    tracing::info!(
                        run_id = %run.run_id,
                        "ReactExecutor: '{}' succeeded for '{}'",
                        kind,
                        preview(task, 40)
                    );
                    return run.finish(Some(payload), None, None);
                };

                let error = error_text(&payload);
                tracing::info!(
                    run_id = %run.run_id,
                    "ReactExecutor: '{}' failed ({}): {}",
                    kind,
                    strategy.error_type,
                    preview(&error, 80)
                );
                run.attempts.push(Attempt {
                    worker: kind,
                    error,
                    error_type: strategy.error_type,
                    retry_index,
                });

                if strategy.retry && retry_index < strategy.max_retries {
                    retry_index += 1;
                    // 退避不超过剩余时间预算
                    let remaining = limits.max_time.saturating_sub(start.elapsed());
                    let delay = strategy.delay.min(remaining);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }

                self.dedup.record(kind, task).await;
                break;
            }
        }

        let last = run.attempts.last().map(|a| (a.worker, a.error_type));
        let error = run
            .attempts
            .last()
            .map(|a| a.error.clone())
            .unwrap_or_else(|| "no workers available".to_string());
        let reason = GaveUpReason::AllWorkersExhausted { last };
        tracing::warn!(run_id = %run.run_id, "ReactExecutor gave up on '{}': {}", chain, reason);
        run.finish(None, Some(error), Some(reason))
    }

    /// knowledge / assist 在有前序失败时拿到 failed_attempts；assist 还拿到 task_type（链名）
    fn worker_kwargs(
        &self,
        kind: WorkerKind,
        chain_name: &str,
        kwargs: &Map<String, Value>,
        attempts: &[Attempt],
    ) -> Map<String, Value> {
        let mut exec_kwargs = kwargs.clone();
        if kind.receives_failed_attempts() && !attempts.is_empty() {
            match serde_json::to_value(attempts) {
                Ok(v) => {
                    exec_kwargs.insert("failed_attempts".to_string(), v);
                }
                Err(e) => tracing::warn!("failed to serialize attempts: {}", e),
            }
        }
        if kind == WorkerKind::Assist {
            exec_kwargs.insert("task_type".to_string(), Value::String(chain_name.to_string()));
        }
        exec_kwargs
    }
}

fn error_text(payload: &Value) -> String {
    match payload.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

fn preview(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
