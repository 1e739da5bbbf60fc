//! Bee Relay - 多后端故障转移与回退链执行
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、错误分类器、组件构建
//! - **llm**: Provider 抽象与实现、多 Provider 路由（健康跟踪 / 故障转移 / 恢复探测）、上下文桥接、Token 池均衡
//! - **observability**: tracing 初始化
//! - **react**: 回退链、熔断器、去重与环路检测、ReactExecutor
//! - **workers**: Worker trait、注册表（超时 + 审计日志）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod workers;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{ErrorClassifier, ErrorStrategy, ErrorType, RelayBuilder, RelayError, RouterError};
pub use crate::llm::{ModelRole, ModelRouter, Provider, ProviderError, TaskType};
pub use crate::react::{FuseState, ReactExecutor, TaskResult, WorkerKind};
pub use crate::workers::{Worker, WorkerRegistry};
