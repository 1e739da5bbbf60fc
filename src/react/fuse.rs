//! 熔断器（FuseState）
//!
//! 三层保护，防止 token 失控消耗：
//! - 单次调用：max_rounds、max_time（由 ReactExecutor 在每轮开头检查）
//! - 滑动窗口：window 内最多 N 个任务，过期时间戳惰性淘汰
//! - 每日预算：按自然日计数，跨日首次访问时清零
//!
//! 窗口与每日计数是所有并发 execute 共享的可变状态，统一由一把 tokio Mutex 保护；
//! 调用被取消时已记录的消耗不回滚。

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::FuseSection;
use crate::core::RelayError;

/// 熔断参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseLimits {
    pub max_rounds: u32,
    pub max_time: Duration,
    pub window_max_tasks: usize,
    pub window: Duration,
    pub daily_token_budget: u64,
    /// 计量 Worker 成功一次计入的估算 token
    pub metered_token_estimate: u64,
    pub worker_timeout_cap: Duration,
    pub worker_timeout_floor: Duration,
}

impl Default for FuseLimits {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_time: Duration::from_secs(60),
            window_max_tasks: 5,
            window: Duration::from_secs(300),
            daily_token_budget: 10_000,
            metered_token_estimate: 500,
            worker_timeout_cap: Duration::from_secs(30),
            worker_timeout_floor: Duration::from_secs(5),
        }
    }
}

/// 配置中的秒数 -> Duration；负数、NaN、溢出都视为配置错误
fn seconds(key: &str, value: f64) -> Result<Duration, RelayError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| RelayError::InvalidConfig(format!("fuse.{key} = {value}: {e}")))
}

impl TryFrom<&FuseSection> for FuseLimits {
    type Error = RelayError;

    fn try_from(s: &FuseSection) -> Result<Self, Self::Error> {
        Ok(Self {
            max_rounds: s.max_rounds,
            max_time: seconds("max_time_seconds", s.max_time_seconds)?,
            window_max_tasks: s.window_max_tasks,
            window: seconds("window_seconds", s.window_seconds)?,
            daily_token_budget: s.daily_token_budget,
            metered_token_estimate: s.metered_token_estimate,
            worker_timeout_cap: seconds("worker_timeout_cap_seconds", s.worker_timeout_cap_seconds)?,
            worker_timeout_floor: seconds(
                "worker_timeout_floor_seconds",
                s.worker_timeout_floor_seconds,
            )?,
        })
    }
}

#[derive(Debug)]
struct FuseInner {
    window: VecDeque<Instant>,
    daily_used: u64,
    budget_date: NaiveDate,
}

impl FuseInner {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.window.front() {
            if now.duration_since(front) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn roll_date(&mut self, today: NaiveDate) {
        if self.budget_date != today {
            tracing::info!("Daily token budget reset ({} -> {})", self.budget_date, today);
            self.daily_used = 0;
            self.budget_date = today;
        }
    }
}

/// 共享熔断状态（通过 Arc 在多个 ReactExecutor 调用间共享）
#[derive(Debug)]
pub struct FuseState {
    limits: FuseLimits,
    inner: Mutex<FuseInner>,
}

impl FuseState {
    pub fn new(limits: FuseLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(FuseInner {
                window: VecDeque::new(),
                daily_used: 0,
                budget_date: today(),
            }),
        }
    }

    pub fn limits(&self) -> &FuseLimits {
        &self.limits
    }

    /// 窗口内任务数未达上限
    pub async fn check_window(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.evict(Instant::now(), self.limits.window);
        inner.window.len() < self.limits.window_max_tasks
    }

    pub async fn record_window(&self) {
        self.inner.lock().await.window.push_back(Instant::now());
    }

    /// 检查并占用一个窗口名额（同一把锁内完成，并发调用不会超额）
    pub async fn try_acquire_window(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.evict(now, self.limits.window);
        if inner.window.len() >= self.limits.window_max_tasks {
            return false;
        }
        inner.window.push_back(now);
        true
    }

    /// `used + tokens <= budget`
    pub async fn check_daily(&self, tokens: u64) -> bool {
        self.check_daily_on(today(), tokens).await
    }

    pub async fn record_daily(&self, tokens: u64) {
        self.record_daily_on(today(), tokens).await
    }

    pub(crate) async fn check_daily_on(&self, date: NaiveDate, tokens: u64) -> bool {
        let mut inner = self.inner.lock().await;
        inner.roll_date(date);
        inner.daily_used + tokens <= self.limits.daily_token_budget
    }

    pub(crate) async fn record_daily_on(&self, date: NaiveDate, tokens: u64) {
        let mut inner = self.inner.lock().await;
        inner.roll_date(date);
        inner.daily_used += tokens;
    }

    pub async fn daily_used(&self) -> u64 {
        self.inner.lock().await.daily_used
    }
}

impl Default for FuseState {
    fn default() -> Self {
        Self::new(FuseLimits::default())
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
