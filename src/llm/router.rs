//! 多 Provider 路由器（故障转移）
//!
//! 所有上层代码只调用 ModelRouter，不直接调用 Provider：
//! - 按逻辑角色（CEO / Vision / Image）解析有序 Provider 链
//! - 跟踪每个 Provider 的健康状态（429 / 5xx 连续计数），达到阈值标记 DOWN，后续调用跳过
//! - 失败时沿链转移，并记录 FailoverEvent；转移到后续 Provider 时做上下文桥接
//! - probe_recovery 由外部调度器定期调用，连续 K 次健康检查通过后恢复 HEALTHY
//!
//! 状态变更都在同一把写锁内完成；status() 等读取可能短暂滞后。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::core::RouterError;
use crate::llm::{
    ChatOptions, ChatResponse, ContextBridge, FailureClass, Message, Provider, ProviderError,
    TokenPoolBalancer,
};

/// 逻辑角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Ceo,
    Vision,
    Image,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Ceo => "ceo",
            ModelRole::Vision => "vision",
            ModelRole::Image => "image",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务类型（决定 CEO 链首个 Provider 用哪个模型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskType {
    #[default]
    Ceo,
    Template,
    Format,
    CronMessage,
}

impl TaskType {
    /// 未知字符串按 CEO 处理
    pub fn parse(s: &str) -> Self {
        match s {
            "template" => TaskType::Template,
            "format" => TaskType::Format,
            "cron_message" => TaskType::CronMessage,
            _ => TaskType::Ceo,
        }
    }

    /// 轻量任务走便宜模型
    pub fn is_lightweight(&self) -> bool {
        matches!(self, TaskType::Template | TaskType::Format | TaskType::CronMessage)
    }
}

/// 实际的后端客户端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Zhipu,
    Groq,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Nvidia,
}

impl Backend {
    pub const ALL: [Backend; 4] = [Backend::Zhipu, Backend::Groq, Backend::OpenRouter, Backend::Nvidia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Zhipu => "zhipu",
            Backend::Groq => "groq",
            Backend::OpenRouter => "openrouter",
            Backend::Nvidia => "nvidia",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 健康状态的跟踪单位。同一个后端可对应多个 ProviderId（如 Zhipu 的 CEO 用途与视觉用途分开计数）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    ZhipuCeo,
    Zhipu,
    Groq,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Nvidia,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::ZhipuCeo,
        ProviderId::Zhipu,
        ProviderId::Groq,
        ProviderId::OpenRouter,
        ProviderId::Nvidia,
    ];

    pub fn backend(&self) -> Backend {
        match self {
            ProviderId::ZhipuCeo | ProviderId::Zhipu => Backend::Zhipu,
            ProviderId::Groq => Backend::Groq,
            ProviderId::OpenRouter => Backend::OpenRouter,
            ProviderId::Nvidia => Backend::Nvidia,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::ZhipuCeo => "zhipu_ceo",
            ProviderId::Zhipu => "zhipu",
            ProviderId::Groq => "groq",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Nvidia => "nvidia",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Healthy,
    /// 有连续失败但未到阈值，仍参与路由
    Degraded,
    Down,
}

/// 单个 Provider 的健康记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderHealth {
    pub status: ProviderStatus,
    pub consecutive_429: u32,
    pub consecutive_5xx: u32,
    pub last_recovery_check: Option<Instant>,
    pub recovery_healthy_count: u32,
}

/// 一次故障转移的审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    pub from: ProviderId,
    pub to: ProviderId,
    pub reason: String,
    pub role: ModelRole,
}

/// 恢复探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healing { streak: u32, required: u32 },
    Recovered,
    StillDown,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healing { streak, required } => write!(f, "healing ({streak}/{required})"),
            ProbeOutcome::Recovered => f.write_str("recovered"),
            ProbeOutcome::StillDown => f.write_str("still_down"),
        }
    }
}

/// 路由器配置
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// 连续 429 达到该值标记 DOWN
    pub consecutive_429: u32,
    /// 连续 5xx 达到该值标记 DOWN
    pub consecutive_5xx: u32,
    pub recovery_interval: Duration,
    pub healthy_checks_required: u32,
    pub bridge: ContextBridge,
    /// FailoverEvent 历史上限（超出丢弃最旧）
    pub max_events: usize,
    pub lite_model: String,
    /// "auto" 表示由 TokenPoolBalancer 选择
    pub ceo_model: String,
    pub vision_fallback_model: String,
    /// 上下文桥接时用于生成摘要的后端
    pub summarizer: Backend,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            consecutive_429: 2,
            consecutive_5xx: 1,
            recovery_interval: Duration::from_secs(1800),
            healthy_checks_required: 3,
            bridge: ContextBridge::default(),
            max_events: 256,
            lite_model: "glm-4.6v".to_string(),
            ceo_model: "auto".to_string(),
            vision_fallback_model: "google/gemini-2.0-flash-001".to_string(),
            summarizer: Backend::OpenRouter,
        }
    }
}

impl From<&AppConfig> for RouterConfig {
    fn from(cfg: &AppConfig) -> Self {
        let f = &cfg.failover;
        Self {
            consecutive_429: f.trigger.consecutive_429,
            consecutive_5xx: f.trigger.consecutive_5xx,
            recovery_interval: Duration::from_secs(f.recovery.check_interval_seconds),
            healthy_checks_required: f.recovery.healthy_checks_required,
            bridge: ContextBridge::new(
                f.context_bridging.keep_recent_turns,
                f.context_bridging.summary_max_chars,
            ),
            max_events: f.max_events,
            lite_model: cfg.models.lite_model.clone(),
            ceo_model: cfg.models.ceo_model.clone(),
            vision_fallback_model: cfg.models.vision_fallback_model.clone(),
            summarizer: cfg.models.summarizer,
        }
    }
}

/// 多 Provider 路由器
pub struct ModelRouter {
    providers: HashMap<Backend, Arc<dyn Provider>>,
    config: RouterConfig,
    balancer: Arc<TokenPoolBalancer>,
    health: RwLock<HashMap<ProviderId, ProviderHealth>>,
    events: RwLock<VecDeque<FailoverEvent>>,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        let health = ProviderId::ALL
            .into_iter()
            .map(|id| (id, ProviderHealth::default()))
            .collect();
        Self {
            providers: HashMap::new(),
            config,
            balancer: Arc::new(TokenPoolBalancer::default()),
            health: RwLock::new(health),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// 注册后端客户端
    pub fn register(&mut self, backend: Backend, provider: Arc<dyn Provider>) {
        self.providers.insert(backend, provider);
    }

    pub fn with_provider(mut self, backend: Backend, provider: Arc<dyn Provider>) -> Self {
        self.register(backend, provider);
        self
    }

    pub fn with_balancer(mut self, balancer: Arc<TokenPoolBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn balancer(&self) -> &TokenPoolBalancer {
        &self.balancer
    }

    fn client_for(&self, id: ProviderId) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&id.backend())
    }

    /// 按任务类型选择 CEO 链首个 Provider 的模型
    pub fn select_model(&self, task_type: TaskType) -> String {
        if task_type.is_lightweight() {
            return self.config.lite_model.clone();
        }
        if self.config.ceo_model == "auto" {
            return self.balancer.select();
        }
        self.config.ceo_model.clone()
    }

    /// 角色对应的有序 Provider 链，每项带覆盖参数
    pub fn chain_for_role(&self, role: ModelRole, task_type: TaskType) -> Vec<(ProviderId, ChatOptions)> {
        match role {
            ModelRole::Ceo => {
                let mut chain = vec![(
                    ProviderId::ZhipuCeo,
                    ChatOptions::new().with_model(self.select_model(task_type)),
                )];
                if self.providers.contains_key(&Backend::Groq) {
                    chain.push((ProviderId::Groq, ChatOptions::new()));
                }
                chain.push((ProviderId::OpenRouter, ChatOptions::new()));
                chain
            }
            ModelRole::Vision => vec![
                (ProviderId::Zhipu, ChatOptions::new()),
                (
                    ProviderId::OpenRouter,
                    ChatOptions::new().with_model(self.config.vision_fallback_model.clone()),
                ),
            ],
            ModelRole::Image => vec![(ProviderId::Zhipu, ChatOptions::new())],
        }
    }

    /// 以默认任务类型、默认参数发送
    pub async fn chat(&self, role: ModelRole, messages: Vec<Message>) -> Result<ChatResponse, RouterError> {
        self.chat_with(role, TaskType::default(), messages, &ChatOptions::new())
            .await
    }

    /// 沿角色链发送请求，失败自动转移；链耗尽返回 RouterError
    pub async fn chat_with(
        &self,
        role: ModelRole,
        task_type: TaskType,
        mut messages: Vec<Message>,
        options: &ChatOptions,
    ) -> Result<ChatResponse, RouterError> {
        let chain = self.chain_for_role(role, task_type);
        let mut tried: Vec<ProviderId> = Vec::new();
        let mut last_error: Option<String> = None;

        for (id, overrides) in &chain {
            let id = *id;
            if self.is_down(id).await {
                tracing::debug!("Provider {} is DOWN, skipping for role={}", id, role);
                continue;
            }
            let Some(client) = self.client_for(id) else {
                continue;
            };

            if !tried.is_empty() {
                let summarizer = self.providers.get(&self.config.summarizer).map(|p| p.as_ref());
                messages = self.config.bridge.bridge(messages, summarizer).await;
            }

            let merged = options.merged_with(overrides);
            match client.chat(&messages, &merged).await {
                Ok(resp) => {
                    self.on_success(id).await;
                    if resp.usage.total_tokens > 0 {
                        self.balancer
                            .record_usage(&resp.model, resp.usage.total_tokens)
                            .await;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed for role={}: {}", id, role, e);
                    self.handle_failure(id, &e).await;
                    last_error = Some(e.to_string());
                }
            }

            tried.push(id);
            if let Some(next) = self.next_live(&chain, &tried).await {
                tracing::info!("Failing over {} -> {} for role={}", id, next, role);
                self.record_event(FailoverEvent {
                    timestamp: Utc::now(),
                    from: id,
                    to: next,
                    reason: last_error.clone().unwrap_or_else(|| "unknown".to_string()),
                    role,
                })
                .await;
            }
        }

        match last_error {
            Some(last_error) => Err(RouterError::AllProvidersFailed { role, last_error }),
            None => Err(RouterError::NoProviderAvailable { role }),
        }
    }

    /// 链上下一个未尝试、未 DOWN 且已注册的 Provider
    async fn next_live(
        &self,
        chain: &[(ProviderId, ChatOptions)],
        tried: &[ProviderId],
    ) -> Option<ProviderId> {
        let health = self.health.read().await;
        chain
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !tried.contains(id))
            .filter(|id| self.client_for(*id).is_some())
            .find(|id| health.get(id).map(|h| h.status) != Some(ProviderStatus::Down))
    }

    async fn is_down(&self, id: ProviderId) -> bool {
        self.health.read().await.get(&id).map(|h| h.status) == Some(ProviderStatus::Down)
    }

    async fn on_success(&self, id: ProviderId) {
        let mut health = self.health.write().await;
        let h = health.entry(id).or_default();
        h.consecutive_429 = 0;
        h.consecutive_5xx = 0;
        if h.status == ProviderStatus::Degraded {
            h.status = ProviderStatus::Healthy;
        }
    }

    async fn handle_failure(&self, id: ProviderId, error: &ProviderError) {
        let mut health = self.health.write().await;
        let h = health.entry(id).or_default();
        match error.failure_class() {
            FailureClass::ImmediateDown | FailureClass::NotFound => mark_down(id, h),
            FailureClass::RateLimited => {
                h.consecutive_429 += 1;
                if h.consecutive_429 >= self.config.consecutive_429 {
                    mark_down(id, h);
                } else {
                    degrade(h);
                }
            }
            FailureClass::ServerError => {
                h.consecutive_5xx += 1;
                if h.consecutive_5xx >= self.config.consecutive_5xx {
                    mark_down(id, h);
                } else {
                    degrade(h);
                }
            }
            FailureClass::Generic => {}
        }
    }

    async fn record_event(&self, event: FailoverEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }

    /// 探测所有 DOWN 的 Provider；距上次探测不足 recovery_interval 的跳过（不出现在结果中）
    pub async fn probe_recovery(&self) -> BTreeMap<ProviderId, ProbeOutcome> {
        let now = Instant::now();
        let due: Vec<ProviderId> = {
            let mut health = self.health.write().await;
            let mut due = Vec::new();
            for (id, h) in health.iter_mut() {
                if h.status != ProviderStatus::Down {
                    continue;
                }
                let recently = h
                    .last_recovery_check
                    .map(|t| now.duration_since(t) < self.config.recovery_interval)
                    .unwrap_or(false);
                if recently {
                    continue;
                }
                h.last_recovery_check = Some(now);
                due.push(*id);
            }
            due
        };

        let mut results = BTreeMap::new();
        for id in due {
            let Some(client) = self.client_for(id) else {
                continue;
            };
            let healthy = client.health_check().await;

            let mut health = self.health.write().await;
            let h = health.entry(id).or_default();
            if h.status != ProviderStatus::Down {
                continue;
            }
            let outcome = if healthy {
                h.recovery_healthy_count += 1;
                let streak = h.recovery_healthy_count;
                let required = self.config.healthy_checks_required;
                if streak >= required {
                    *h = ProviderHealth::default();
                    tracing::info!("Provider {} recovered after {} healthy checks", id, streak);
                    ProbeOutcome::Recovered
                } else {
                    ProbeOutcome::Healing { streak, required }
                }
            } else {
                h.recovery_healthy_count = 0;
                ProbeOutcome::StillDown
            };
            results.insert(id, outcome);
        }
        results
    }

    /// 并发检查所有已注册后端
    pub async fn health_check_all(&self) -> BTreeMap<Backend, bool> {
        let checks = self.providers.iter().map(|(backend, client)| {
            let backend = *backend;
            let client = Arc::clone(client);
            async move { (backend, client.health_check().await) }
        });
        join_all(checks).await.into_iter().collect()
    }

    /// 状态快照
    pub async fn status(&self) -> BTreeMap<ProviderId, ProviderStatus> {
        self.health
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.status))
            .collect()
    }

    pub async fn health(&self, id: ProviderId) -> ProviderHealth {
        self.health.read().await.get(&id).cloned().unwrap_or_default()
    }

    /// 手动设置状态（运维介入）；设为 DOWN 时清零恢复计数
    pub async fn force_status(&self, id: ProviderId, status: ProviderStatus) {
        let mut health = self.health.write().await;
        let h = health.entry(id).or_default();
        match status {
            ProviderStatus::Down => mark_down(id, h),
            other => {
                h.status = other;
                h.consecutive_429 = 0;
                h.consecutive_5xx = 0;
            }
        }
    }

    pub async fn failover_history(&self) -> Vec<FailoverEvent> {
        self.events.read().await.iter().cloned().collect()
    }
}

/// 调用方须持有 health 写锁
fn mark_down(id: ProviderId, h: &mut ProviderHealth) {
    if h.status != ProviderStatus::Down {
        h.status = ProviderStatus::Down;
        h.recovery_healthy_count = 0;
        tracing::warn!("Provider {} marked DOWN, failover activated", id);
    }
}

fn degrade(h: &mut ProviderHealth) {
    if h.status == ProviderStatus::Healthy {
        h.status = ProviderStatus::Degraded;
    }
}
