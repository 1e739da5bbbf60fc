//! Bee Relay 演示入口
//!
//! 用法：`bee-relay [--config <path>] <chain> <task...>`
//! 加载配置、初始化日志，组装路由器与执行器（未配置真实端点的后端用 Mock 代替），
//! 先经路由器问一次 CEO 模型，再按回退链执行任务，最后以 JSON 打印 TaskResult 与路由状态。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_relay::llm::{Backend, Message, MockProvider, ModelRole, ProviderError};
use bee_relay::react::WorkerKind;
use bee_relay::workers::{ScriptedWorker, WorkerRegistry};
use bee_relay::{observability, RelayBuilder};
use serde_json::{json, Map};

struct Args {
    config: Option<PathBuf>,
    chain: String,
    task: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(it.next().context("--config requires a path")?));
        } else {
            rest.push(arg);
        }
    }
    let mut rest = rest.into_iter();
    let chain = rest.next().unwrap_or_else(|| "web_search".to_string());
    let task = rest.collect::<Vec<_>>().join(" ");
    let task = if task.is_empty() {
        "明天东京的天气".to_string()
    } else {
        task
    };
    Ok(Args { config, chain, task })
}

/// 演示用 Worker：浏览器被人机验证拦截，搜索超时，知识库兜底
fn demo_workers() -> WorkerRegistry {
    WorkerRegistry::new()
        .with(Arc::new(ScriptedWorker::failing(
            WorkerKind::Browser,
            "Page requires CAPTCHA verification",
        )))
        .with(Arc::new(ScriptedWorker::failing(WorkerKind::Search, "Request timed out")))
        .with(Arc::new(ScriptedWorker::succeeding(
            WorkerKind::Knowledge,
            json!({ "result": "根据已有知识给出的回答", "source": "knowledge" }),
        )))
        .with(Arc::new(ScriptedWorker::succeeding(
            WorkerKind::Assist,
            json!({ "result": "已完成大部分步骤，请确认选项", "source": "assist" }),
        )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = parse_args()?;

    let mut builder =
        RelayBuilder::from_config_path(args.config).context("Failed to load config")?;
    for backend in Backend::ALL {
        if backend != Backend::Zhipu && !builder.config().providers.contains_key(&backend) {
            let mock = MockProvider::replying(backend.as_str(), format!("[{backend}] ok"));
            builder = builder.with_provider(backend, Arc::new(mock));
        }
    }
    // 演示故障转移：Mock 智谱首次返回 5xx
    if !builder.config().providers.contains_key(&Backend::Zhipu) {
        let zhipu = MockProvider::replying("zhipu", "[zhipu] ok");
        zhipu.push(Err(ProviderError::Http {
            status: 503,
            message: "Service Unavailable".into(),
        }));
        builder = builder.with_provider(Backend::Zhipu, Arc::new(zhipu));
    }

    let router = builder.build_router();
    let reply = router
        .chat(ModelRole::Ceo, vec![Message::user(args.task.clone())])
        .await
        .context("CEO routing failed")?;
    tracing::info!("CEO reply via {}: {}", reply.model, reply.content);

    let executor = builder
        .build_executor(demo_workers())
        .context("Invalid [fuse] config")?;
    let result = executor.execute(&args.chain, &args.task, Map::new()).await;
    let replay = result.replay_request();
    let history = router.failover_history().await;

    let status: Map<String, serde_json::Value> = router
        .status()
        .await
        .into_iter()
        .map(|(id, s)| (id.to_string(), json!(s)))
        .collect();
    let report = json!({
        "task_result": result,
        "replay_request": replay,
        "provider_status": status,
        "failover_history": history,
        "token_pools": router.balancer().status_line(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
