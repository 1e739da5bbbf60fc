//! 组件构建器：从 AppConfig 组装 ModelRouter 与 ReactExecutor
//!
//! 配置了 `[providers.<backend>]` 且能取到 API Key 的后端注册为 OpenAiProvider；
//! 显式传入的 Provider 覆盖同名后端（测试与演示用）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, AppConfig};
use crate::core::RelayError;
use crate::llm::{
    default_pools, Backend, ModelRouter, OpenAiProvider, Provider, RouterConfig, TokenPoolBalancer,
};
use crate::react::{FuseLimits, FuseState, ReactExecutor};
use crate::workers::WorkerRegistry;

pub struct RelayBuilder {
    config: AppConfig,
    overrides: HashMap<Backend, Arc<dyn Provider>>,
}

impl RelayBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
        }
    }

    /// 加载配置（默认文件 + 指定文件 + RELAY__* 环境变量）后构建
    pub fn from_config_path(path: Option<PathBuf>) -> Result<Self, RelayError> {
        Ok(Self::new(load_config(path)?))
    }

    pub fn with_provider(mut self, backend: Backend, provider: Arc<dyn Provider>) -> Self {
        self.overrides.insert(backend, provider);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_balancer(&self) -> TokenPoolBalancer {
        let models = &self.config.models;
        match &models.pool_file {
            Some(path) => TokenPoolBalancer::with_file(path, models.fallback_model.clone()),
            None => TokenPoolBalancer::new(default_pools(), models.fallback_model.clone()),
        }
    }

    /// 构建路由器：配置中的端点 + 显式覆盖
    pub fn build_router(&self) -> ModelRouter {
        let mut router = ModelRouter::new(RouterConfig::from(&self.config))
            .with_balancer(Arc::new(self.build_balancer()));

        for (backend, section) in &self.config.providers {
            if self.overrides.contains_key(backend) {
                continue;
            }
            let Some(api_key) = section.api_key() else {
                tracing::warn!(
                    "Provider {} configured but {} is not set, skipping",
                    backend,
                    section.api_key_env
                );
                continue;
            };
            let provider = OpenAiProvider::new(
                backend.as_str(),
                section.base_url.as_deref(),
                &section.model,
                &api_key,
            );
            router.register(*backend, Arc::new(provider));
            tracing::info!("Registered provider {} (model={})", backend, section.model);
        }
        for (backend, provider) in &self.overrides {
            router.register(*backend, Arc::clone(provider));
        }
        router
    }

    /// `[fuse]` 中的秒数非法（负数、NaN、溢出）时返回 InvalidConfig
    pub fn build_fuse(&self) -> Result<Arc<FuseState>, RelayError> {
        let limits = FuseLimits::try_from(&self.config.fuse)?;
        Ok(Arc::new(FuseState::new(limits)))
    }

    pub fn build_executor(&self, workers: WorkerRegistry) -> Result<ReactExecutor, RelayError> {
        Ok(ReactExecutor::new(workers, self.build_fuse()?))
    }
}
