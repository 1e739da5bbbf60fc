//! 多 Provider 故障转移集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bee_relay::core::{ErrorClassifier, ErrorType, RouterError};
    use bee_relay::llm::{
        Backend, ContextBridge, Message, MockProvider, ModelRole, ModelRouter, ProbeOutcome,
        Provider, ProviderError, ProviderId, ProviderStatus, RouterConfig, TaskType,
    };

    struct Backends {
        zhipu: Arc<MockProvider>,
        groq: Arc<MockProvider>,
        openrouter: Arc<MockProvider>,
    }

    fn setup(config: RouterConfig) -> (ModelRouter, Backends) {
        let b = Backends {
            zhipu: Arc::new(MockProvider::replying("zhipu", "zhipu ok")),
            groq: Arc::new(MockProvider::replying("groq", "groq ok")),
            openrouter: Arc::new(MockProvider::replying("openrouter", "openrouter ok")),
        };
        let router = ModelRouter::new(config)
            .with_provider(Backend::Zhipu, b.zhipu.clone())
            .with_provider(Backend::Groq, b.groq.clone())
            .with_provider(Backend::OpenRouter, b.openrouter.clone());
        (router, b)
    }

    fn hi() -> Vec<Message> {
        vec![Message::user("你好")]
    }

    #[tokio::test]
    async fn test_threshold_reached_then_skipped() {
        let (router, b) = setup(RouterConfig {
            consecutive_429: 3,
            ..Default::default()
        });
        b.zhipu.set_error(ProviderError::RateLimited("quota".into()));

        for _ in 0..2 {
            router.chat(ModelRole::Ceo, hi()).await.unwrap();
            assert_ne!(router.status().await[&ProviderId::ZhipuCeo], ProviderStatus::Down);
        }
        router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(router.status().await[&ProviderId::ZhipuCeo], ProviderStatus::Down);
        assert_eq!(b.zhipu.calls(), 3);

        let resp = router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(resp.content, "groq ok");
        assert_eq!(b.zhipu.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_both_counters() {
        let (router, b) = setup(RouterConfig {
            consecutive_5xx: 2,
            ..Default::default()
        });
        b.zhipu.push(Err(ProviderError::Http { status: 429, message: "slow".into() }));
        router.chat(ModelRole::Ceo, hi()).await.unwrap();
        b.zhipu.push(Err(ProviderError::Http { status: 502, message: "bad gw".into() }));
        router.chat(ModelRole::Ceo, hi()).await.unwrap();

        let h = router.health(ProviderId::ZhipuCeo).await;
        assert_eq!((h.consecutive_429, h.consecutive_5xx), (1, 1));
        assert_eq!(h.status, ProviderStatus::Degraded);

        let resp = router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(resp.content, "zhipu ok");
        let h = router.health(ProviderId::ZhipuCeo).await;
        assert_eq!((h.consecutive_429, h.consecutive_5xx), (0, 0));
        assert_eq!(h.status, ProviderStatus::Healthy);
    }

    #[tokio::test]
    async fn test_failover_event_names_next_live_candidate() {
        let (router, b) = setup(RouterConfig::default());
        router.force_status(ProviderId::Groq, ProviderStatus::Down).await;
        b.zhipu.set_error(ProviderError::from_message("zhipu exploded"));

        let resp = router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(resp.content, "openrouter ok");

        let events = router.failover_history().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ProviderId::ZhipuCeo);
        assert_eq!(events[0].to, ProviderId::OpenRouter);
        assert_eq!(events[0].reason, "zhipu exploded");
        assert_eq!(b.groq.calls(), 0);
    }

    #[tokio::test]
    async fn test_router_error_is_terminal_and_classified() {
        let (router, b) = setup(RouterConfig::default());
        b.zhipu.set_error(ProviderError::from_message("HTTP 500"));
        b.openrouter.set_error(ProviderError::from_message("HTTP 503"));

        let err = router.chat(ModelRole::Vision, hi()).await.unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersFailed { role: ModelRole::Vision, .. }));
        assert!(err.to_string().starts_with("RouterError"));

        let strategy = ErrorClassifier::classify(&err);
        assert_eq!(strategy.error_type, ErrorType::UpstreamExhausted);
        assert!(!strategy.retry);
        assert!(strategy.fallback_worker.is_none());

        // 文本路径同样识别
        let strategy = ErrorClassifier::classify(err.to_string().as_str());
        assert_eq!(strategy.error_type, ErrorType::UpstreamExhausted);
    }

    #[tokio::test]
    async fn test_router_error_text_terminal_whatever_last_error() {
        let (router, b) = setup(RouterConfig::default());
        b.zhipu.set_error(ProviderError::Timeout("zhipu request timed out".into()));
        b.openrouter
            .set_error(ProviderError::Connect("tcp connect error: Connection refused".into()));

        let err = router.chat(ModelRole::Vision, hi()).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Connection refused"));

        // Worker 把路由失败原样塞进 {"error": ...} 时仍然是终态
        let payload = serde_json::json!({ "error": text });
        let strategy = ErrorClassifier::classify_worker_result(&payload).unwrap();
        assert_eq!(strategy.error_type, ErrorType::UpstreamExhausted);
        assert!(!strategy.retry);
        assert_eq!(strategy.max_retries, 0);
    }

    #[tokio::test]
    async fn test_vision_fallback_model_override() {
        let (router, b) = setup(RouterConfig::default());
        b.zhipu.set_error(ProviderError::Http { status: 404, message: "no vision".into() });

        let resp = router.chat(ModelRole::Vision, hi()).await.unwrap();
        assert_eq!(resp.model, "google/gemini-2.0-flash-001");
        assert_eq!(router.status().await[&ProviderId::Zhipu], ProviderStatus::Down);
        assert_eq!(router.status().await[&ProviderId::ZhipuCeo], ProviderStatus::Healthy);
    }

    #[tokio::test]
    async fn test_lightweight_task_uses_lite_model() {
        let (router, b) = setup(RouterConfig {
            lite_model: "glm-4.5-flash".into(),
            ..Default::default()
        });
        let resp = router
            .chat_with(ModelRole::Ceo, TaskType::parse("cron_message"), hi(), &Default::default())
            .await
            .unwrap();
        assert_eq!(resp.model, "glm-4.5-flash");
        assert_eq!(b.zhipu.last_options().unwrap().model.as_deref(), Some("glm-4.5-flash"));
    }

    #[tokio::test]
    async fn test_bridging_size_for_any_length() {
        let keep = 8;
        for n in [9usize, 10, 17, 40, 120] {
            let (router, b) = setup(RouterConfig {
                bridge: ContextBridge::new(keep, 500),
                ..Default::default()
            });
            b.zhipu.push(Err(ProviderError::from_message("first provider failed")));
            let messages: Vec<Message> = (0..n).map(|i| Message::user(format!("turn {i}"))).collect();

            router.chat(ModelRole::Ceo, messages).await.unwrap();
            let sent = b.groq.last_messages();
            assert_eq!(sent.len(), keep + 1, "n={n}");
            assert_eq!(sent.last().unwrap().text(), format!("turn {}", n - 1));
        }
    }

    #[tokio::test]
    async fn test_bridging_falls_back_to_banner_when_summarizer_fails() {
        let (router, b) = setup(RouterConfig {
            bridge: ContextBridge::new(2, 500),
            summarizer: Backend::Groq,
            ..Default::default()
        });
        b.zhipu.push(Err(ProviderError::from_message("zhipu failed")));
        // 第一次调用 Groq 是摘要请求，失败后走截断横幅；第二次是真正的对话
        b.groq.push(Err(ProviderError::from_message("summary failed")));
        let messages: Vec<Message> = (0..5).map(|i| Message::user(format!("turn {i}"))).collect();

        let resp = router.chat(ModelRole::Ceo, messages).await.unwrap();
        assert_eq!(resp.content, "groq ok");
        let sent = b.groq.last_messages();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].text().contains("turn 2"));
        assert!(sent[0].text().contains("Context summary"));
    }

    #[tokio::test]
    async fn test_short_history_not_bridged() {
        let (router, b) = setup(RouterConfig::default());
        b.zhipu.push(Err(ProviderError::from_message("zhipu failed")));
        router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(b.groq.last_messages(), hi());
        assert_eq!(b.openrouter.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_requires_k_checks_at_interval() {
        let interval = Duration::from_secs(1800);
        let (router, b) = setup(RouterConfig {
            recovery_interval: interval,
            healthy_checks_required: 3,
            ..Default::default()
        });
        b.groq.set_error(ProviderError::Http { status: 503, message: "down".into() });
        b.zhipu.set_error(ProviderError::Http { status: 503, message: "down".into() });
        router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(router.status().await[&ProviderId::Groq], ProviderStatus::Down);

        let r = router.probe_recovery().await;
        assert_eq!(r[&ProviderId::Groq].to_string(), "healing (1/3)");

        // 间隔内再次探测被跳过
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(router.probe_recovery().await.is_empty());

        tokio::time::advance(interval).await;
        let r = router.probe_recovery().await;
        assert_eq!(r[&ProviderId::Groq].to_string(), "healing (2/3)");

        // 一次失败清零
        b.groq.set_healthy(false);
        tokio::time::advance(interval).await;
        let r = router.probe_recovery().await;
        assert_eq!(r[&ProviderId::Groq], ProbeOutcome::StillDown);
        assert_eq!(r[&ProviderId::Groq].to_string(), "still_down");

        b.groq.set_healthy(true);
        for expected in ["healing (1/3)", "healing (2/3)", "recovered"] {
            tokio::time::advance(interval).await;
            let r = router.probe_recovery().await;
            assert_eq!(r[&ProviderId::Groq].to_string(), expected);
        }
        assert_eq!(router.status().await[&ProviderId::Groq], ProviderStatus::Healthy);
        assert_eq!(router.status().await[&ProviderId::ZhipuCeo], ProviderStatus::Healthy);

        // 恢复后重新参与路由
        b.zhipu.set_error(ProviderError::from_message("zhipu error"));
        b.groq.set_reply("groq is back");
        let resp = router.chat(ModelRole::Ceo, hi()).await.unwrap();
        assert_eq!(resp.content, "groq is back");
    }

    #[tokio::test]
    async fn test_concurrent_failures_counted_under_lock() {
        let (router, b) = setup(RouterConfig {
            consecutive_429: 1000,
            ..Default::default()
        });
        b.zhipu.set_error(ProviderError::RateLimited("busy".into()));
        let router = Arc::new(router);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { router.chat(ModelRole::Ceo, hi()).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(router.health(ProviderId::ZhipuCeo).await.consecutive_429, 50);
    }

    #[tokio::test]
    async fn test_health_check_all_reports_every_backend() {
        let (router, b) = setup(RouterConfig::default());
        b.openrouter.set_healthy(false);
        let all = router.health_check_all().await;
        assert_eq!(all.len(), 3);
        assert!(!all[&Backend::OpenRouter]);
        assert!(all[&Backend::Groq]);
        assert_eq!(b.groq.health_checks(), 1);
        assert_eq!(b.groq.name(), "groq");
    }
}
