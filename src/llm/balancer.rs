//! Token 池均衡
//!
//! 主模型有多个能力相近、各自带额度的池子（如 glm-4.6v / glm-4.7），
//! select 选剩余额度最多的池，使各池被均匀消耗；全部耗尽时退回默认模型（按量付费）。
//! 可选 JSON 文件持久化已用量，跨进程保留。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// 低于该剩余比例时发出预警
const ALERT_RATIO: f64 = 0.2;

/// 单个额度池
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPool {
    pub initial: u64,
    #[serde(default)]
    pub estimated_used: u64,
}

impl TokenPool {
    pub fn new(initial: u64) -> Self {
        Self { initial, estimated_used: 0 }
    }

    pub fn remaining(&self) -> i64 {
        self.initial as i64 - self.estimated_used as i64
    }

    fn remaining_ratio(&self) -> f64 {
        if self.initial == 0 {
            return 0.0;
        }
        self.remaining() as f64 / self.initial as f64
    }
}

/// 默认池（模型名 -> 初始额度）
pub fn default_pools() -> BTreeMap<String, TokenPool> {
    BTreeMap::from([
        ("glm-4.6v".to_string(), TokenPool::new(5_950_978)),
        ("glm-4.7".to_string(), TokenPool::new(3_990_469)),
    ])
}

/// Token 池均衡器
#[derive(Debug)]
pub struct TokenPoolBalancer {
    pools: Mutex<BTreeMap<String, TokenPool>>,
    fallback_model: String,
    path: Option<PathBuf>,
    save_lock: tokio::sync::Mutex<()>,
}

impl TokenPoolBalancer {
    pub fn new(pools: BTreeMap<String, TokenPool>, fallback_model: impl Into<String>) -> Self {
        Self {
            pools: Mutex::new(pools),
            fallback_model: fallback_model.into(),
            path: None,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 从 JSON 文件加载；文件不存在或损坏时使用默认池（不报错，仅告警）
    pub fn with_file(path: impl AsRef<Path>, fallback_model: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let pools = match load_pools(&path) {
            Ok(Some(pools)) => pools,
            Ok(None) => default_pools(),
            Err(e) => {
                tracing::warn!("Failed to load token pools from {:?}: {}", path, e);
                default_pools()
            }
        };
        Self {
            pools: Mutex::new(pools),
            fallback_model: fallback_model.into(),
            path: Some(path),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn pools(&self) -> MutexGuard<'_, BTreeMap<String, TokenPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 选剩余额度最多的模型；并列时取先出现者；全部耗尽返回默认模型
    pub fn select(&self) -> String {
        let pools = self.pools();
        let mut best: Option<(&String, i64)> = None;
        for (model, pool) in pools.iter() {
            let remaining = pool.remaining();
            if best.map_or(true, |(_, r)| remaining > r) {
                best = Some((model, remaining));
            }
        }
        match best {
            Some((model, remaining)) if remaining > 0 => model.clone(),
            _ => self.fallback_model.clone(),
        }
    }

    /// 记录用量；不在池中的模型忽略。设置了文件路径时异步落盘。
    pub async fn record_usage(&self, model: &str, tokens: u64) {
        {
            let mut pools = self.pools();
            let Some(pool) = pools.get_mut(model) else {
                return;
            };
            pool.estimated_used += tokens;
        }
        let Some(path) = &self.path else {
            return;
        };
        // 写盘串行化，且在锁内取最新快照，旧快照不会覆盖新快照
        let _saving = self.save_lock.lock().await;
        let snapshot = self.pools().clone();
        if let Err(e) = save_pools(path, &snapshot).await {
            tracing::warn!("Failed to save token pools to {:?}: {}", path, e);
        }
    }

    pub fn pool(&self, model: &str) -> Option<TokenPool> {
        self.pools().get(model).cloned()
    }

    /// 一行状态：`glm-4.6v: 5950978 (100%) | glm-4.7: ...`
    pub fn status_line(&self) -> String {
        self.pools()
            .iter()
            .map(|(model, pool)| {
                format!(
                    "{}: {} ({:.0}%)",
                    model,
                    pool.remaining(),
                    pool.remaining_ratio() * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// 任一池剩余低于 20% 时返回预警文本
    pub fn check_alert(&self) -> Option<String> {
        let low: Vec<String> = self
            .pools()
            .iter()
            .filter(|(_, pool)| pool.remaining_ratio() < ALERT_RATIO)
            .map(|(model, pool)| {
                format!(
                    "{} remaining {} ({:.0}%)",
                    model,
                    pool.remaining(),
                    pool.remaining_ratio() * 100.0
                )
            })
            .collect();
        if low.is_empty() {
            None
        } else {
            Some(format!("token pool low: {}", low.join(", ")))
        }
    }
}

impl Default for TokenPoolBalancer {
    fn default() -> Self {
        Self::new(default_pools(), "glm-4.6v")
    }
}

fn load_pools(path: &Path) -> anyhow::Result<Option<BTreeMap<String, TokenPool>>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

async fn save_pools(path: &Path, pools: &BTreeMap<String, TokenPool>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(pools)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_most_remaining() {
        let b = TokenPoolBalancer::default();
        assert_eq!(b.select(), "glm-4.6v");
        b.record_usage("glm-4.6v", 5_000_000).await;
        assert_eq!(b.select(), "glm-4.7");
    }

    #[tokio::test]
    async fn test_all_exhausted_falls_back() {
        let pools = BTreeMap::from([("a".to_string(), TokenPool::new(10))]);
        let b = TokenPoolBalancer::new(pools, "payg");
        b.record_usage("a", 10).await;
        assert_eq!(b.select(), "payg");
    }

    #[tokio::test]
    async fn test_unknown_model_ignored() {
        let b = TokenPoolBalancer::default();
        b.record_usage("llama", 1_000).await;
        assert!(b.pool("llama").is_none());
        assert_eq!(b.pool("glm-4.7").unwrap().estimated_used, 0);
    }

    #[tokio::test]
    async fn test_alert_below_threshold() {
        let pools = BTreeMap::from([("a".to_string(), TokenPool::new(100))]);
        let b = TokenPoolBalancer::new(pools, "a");
        assert!(b.check_alert().is_none());
        b.record_usage("a", 90).await;
        let alert = b.check_alert().unwrap();
        assert!(alert.contains("a remaining 10"));
        assert!(b.status_line().contains("a: 10 (10%)"));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/token_pools.json");
        let b = TokenPoolBalancer::with_file(&path, "glm-4.6v");
        b.record_usage("glm-4.7", 42).await;
        assert!(path.exists());

        let reloaded = TokenPoolBalancer::with_file(&path, "glm-4.6v");
        assert_eq!(reloaded.pool("glm-4.7").unwrap().estimated_used, 42);
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_latest_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_pools.json");
        let b = std::sync::Arc::new(TokenPoolBalancer::with_file(&path, "glm-4.6v"));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let b = b.clone();
                tokio::spawn(async move { b.record_usage("glm-4.6v", 10).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let reloaded = TokenPoolBalancer::with_file(&path, "glm-4.6v");
        assert_eq!(reloaded.pool("glm-4.6v").unwrap().estimated_used, 200);
    }
}
