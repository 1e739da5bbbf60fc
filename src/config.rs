//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__FUSE__MAX_ROUNDS=5`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::Backend;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub failover: FailoverSection,
    pub models: ModelsSection,
    pub fuse: FuseSection,
    /// [providers.<backend>]：OpenAI 兼容端点；未配置或缺少 API Key 的后端不注册
    pub providers: BTreeMap<Backend, ProviderSection>,
}

/// [failover] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    pub trigger: TriggerSection,
    pub recovery: RecoverySection,
    pub context_bridging: ContextBridgingSection,
    /// FailoverEvent 历史上限
    pub max_events: usize,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            trigger: TriggerSection::default(),
            recovery: RecoverySection::default(),
            context_bridging: ContextBridgingSection::default(),
            max_events: 256,
        }
    }
}

/// [failover.trigger] 段：连续失败多少次标记 DOWN
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriggerSection {
    pub consecutive_429: u32,
    pub consecutive_5xx: u32,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            consecutive_429: 2,
            consecutive_5xx: 1,
        }
    }
}

/// [failover.recovery] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    /// 两次探测的最小间隔（秒）
    pub check_interval_seconds: u64,
    pub healthy_checks_required: u32,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            check_interval_seconds: 1800,
            healthy_checks_required: 3,
        }
    }
}

/// [failover.context_bridging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextBridgingSection {
    pub keep_recent_turns: usize,
    pub summary_max_chars: usize,
}

impl Default for ContextBridgingSection {
    fn default() -> Self {
        Self {
            keep_recent_turns: 8,
            summary_max_chars: 500,
        }
    }
}

/// [models] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    /// template / format / cron_message 用的便宜模型
    pub lite_model: String,
    /// "auto" 表示由 Token 池均衡器选择
    pub ceo_model: String,
    /// 所有池耗尽时使用
    pub fallback_model: String,
    pub vision_fallback_model: String,
    pub summarizer: Backend,
    /// Token 池用量持久化文件；不设置则只在内存中计数
    pub pool_file: Option<PathBuf>,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            lite_model: "glm-4.6v".to_string(),
            ceo_model: "auto".to_string(),
            fallback_model: "glm-4.6v".to_string(),
            vision_fallback_model: "google/gemini-2.0-flash-001".to_string(),
            summarizer: Backend::OpenRouter,
            pool_file: None,
        }
    }
}

/// [fuse] 段：熔断参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FuseSection {
    pub max_rounds: u32,
    pub max_time_seconds: f64,
    pub window_max_tasks: usize,
    pub window_seconds: f64,
    pub daily_token_budget: u64,
    pub metered_token_estimate: u64,
    pub worker_timeout_cap_seconds: f64,
    pub worker_timeout_floor_seconds: f64,
}

impl Default for FuseSection {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_time_seconds: 60.0,
            window_max_tasks: 5,
            window_seconds: 300.0,
            daily_token_budget: 10_000,
            metered_token_estimate: 500,
            worker_timeout_cap_seconds: 30.0,
            worker_timeout_floor_seconds: 5.0,
        }
    }
}

/// [providers.<backend>] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub base_url: Option<String>,
    pub model: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
}

impl ProviderSection {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// 从 config 目录加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
