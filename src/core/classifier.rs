//! 错误分类器
//!
//! 将 Worker / Provider 的失败映射为 ErrorStrategy（是否重试、重试次数、退避、回退 Worker），
//! 供 ReactExecutor 决定「原地重试 / 换下一个 Worker / 放弃」。
//!
//! 分类顺序：结构化错误码优先（实现 [`Classify`] 且给出 [`ErrorType`] 的错误、payload 中的 `error_type` 字段），
//! 文本正则表只作为没有结构化错误码时的兜底路径，首个命中即返回，均未命中为 Unknown。

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::react::WorkerKind;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    NetworkUnreachable,
    Timeout,
    /// 人机验证 / 反爬
    AntiBot,
    /// 401 / 403 / 需要登录
    AuthRequired,
    RateLimited,
    /// 404 / 页面元素缺失
    NotFound,
    /// 链上所有 Provider / Worker 都失败
    UpstreamExhausted,
    /// 被安全闸门拦截
    PolicyBlocked,
    DependencyMissing,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::NetworkUnreachable => "network_unreachable",
            ErrorType::Timeout => "timeout",
            ErrorType::AntiBot => "anti_bot",
            ErrorType::AuthRequired => "auth_required",
            ErrorType::RateLimited => "rate_limited",
            ErrorType::NotFound => "not_found",
            ErrorType::UpstreamExhausted => "upstream_exhausted",
            ErrorType::PolicyBlocked => "policy_blocked",
            ErrorType::DependencyMissing => "dependency_missing",
            ErrorType::Unknown => "unknown",
        }
    }

    /// 解析结构化错误码（payload 中的 `error_type` 字段），未知码返回 None
    pub fn from_code(code: &str) -> Option<Self> {
        let t = match code.trim().to_ascii_lowercase().as_str() {
            "network_unreachable" => ErrorType::NetworkUnreachable,
            "timeout" => ErrorType::Timeout,
            "anti_bot" | "captcha_detected" => ErrorType::AntiBot,
            "auth_required" | "login_required" => ErrorType::AuthRequired,
            "rate_limited" => ErrorType::RateLimited,
            "not_found" | "element_not_found" => ErrorType::NotFound,
            "upstream_exhausted" | "provider_down" => ErrorType::UpstreamExhausted,
            "policy_blocked" | "security_blocked" => ErrorType::PolicyBlocked,
            "dependency_missing" => ErrorType::DependencyMissing,
            "unknown" => ErrorType::Unknown,
            _ => return None,
        };
        Some(t)
    }

    /// 该类别对应的处理策略（穷尽匹配，新增类别时编译期强制补齐）
    pub fn strategy(self) -> ErrorStrategy {
        use ErrorType::*;
        let knowledge = Some(WorkerKind::Knowledge);
        let (retry, max_retries, delay_secs, fallback_worker, user_message) = match self {
            NetworkUnreachable => (true, 2, 3, knowledge, "网络连接失败，正在尝试其他方式"),
            Timeout => (true, 1, 5, knowledge, "连接超时，正在重试"),
            AntiBot => (false, 0, 0, knowledge, "网站需要人机验证，改用其他方式回答"),
            AuthRequired => (false, 0, 0, knowledge, "需要登录才能访问，改用其他方式回答"),
            RateLimited => (true, 1, 10, knowledge, "请求频率过高，稍后重试"),
            NotFound => (false, 0, 0, knowledge, "找不到页面或元素，改用其他方式回答"),
            UpstreamExhausted => (false, 0, 0, None, "所有模型服务暂时无法使用"),
            PolicyBlocked => (false, 0, 0, None, "操作被安全闸门拦截"),
            DependencyMissing => (false, 0, 0, knowledge, "所需组件未安装，改用其他方式"),
            Unknown => (true, 1, 2, knowledge, "发生未知错误，尝试其他方式"),
        };
        ErrorStrategy {
            error_type: self,
            retry,
            max_retries,
            delay: Duration::from_secs(delay_secs),
            fallback_worker,
            user_message,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次分类的结论（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStrategy {
    pub error_type: ErrorType,
    pub retry: bool,
    pub max_retries: u32,
    pub delay: Duration,
    /// 建议回退的 Worker；上游耗尽 / 安全拦截时为 None（回退没有意义）
    pub fallback_worker: Option<WorkerKind>,
    /// 本地化说明，供上层渲染，核心本身不输出给终端用户
    pub user_message: &'static str,
}

/// 可被分类的错误：能给出结构化类别的错误实现 `error_type`，否则走文本匹配
pub trait Classify: fmt::Display {
    fn error_type(&self) -> Option<ErrorType> {
        None
    }
}

impl Classify for str {}
impl Classify for String {}

/// RouterError 的 Display 前缀
const ROUTER_ERROR_PREFIX: &str = "RouterError";

/// 文本兜底规则：按顺序匹配，首个命中生效
fn patterns() -> &'static [(Regex, ErrorType)] {
    static PATTERNS: OnceLock<Vec<(Regex, ErrorType)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)connect|dns|refused|unreachable|no route", ErrorType::NetworkUnreachable),
            (r"(?i)timeout|timed?\s*out", ErrorType::Timeout),
            (r"(?i)captcha|recaptcha|hcaptcha", ErrorType::AntiBot),
            (r"(?i)401|403|login|unauthorized|forbidden", ErrorType::AuthRequired),
            (r"(?i)429|rate.?limit|too many requests", ErrorType::RateLimited),
            (r"(?i)404|not found|element not found", ErrorType::NotFound),
            (r"(?i)RouterError|all providers (down|failed)", ErrorType::UpstreamExhausted),
            (r"(?i)blocked by security|security gate", ErrorType::PolicyBlocked),
            (r"(?i)playwright.*(not installed|missing)|not installed|missing dependency", ErrorType::DependencyMissing),
            (r"(?i)selector.*not found|waiting for selector", ErrorType::NotFound),
        ]
        .into_iter()
        .filter_map(|(re, t)| Regex::new(re).ok().map(|re| (re, t)))
        .collect()
    })
}

/// 错误分类器（无状态）
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// 分类一个错误：结构化类别优先，否则按文本匹配
    pub fn classify<E: Classify + ?Sized>(error: &E) -> ErrorStrategy {
        match error.error_type() {
            Some(t) => t.strategy(),
            None => Self::classify_text(&error.to_string()),
        }
    }

    /// 纯文本分类（没有结构化错误码的 Provider / Worker）
    ///
    /// 以 `RouterError` 开头的文本是路由失败原样透传，无论末尾的 last_error 是什么都为终态。
    pub fn classify_text(text: &str) -> ErrorStrategy {
        if text.trim_start().starts_with(ROUTER_ERROR_PREFIX) {
            return ErrorType::UpstreamExhausted.strategy();
        }
        patterns()
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, t)| t.strategy())
            .unwrap_or_else(|| ErrorType::Unknown.strategy())
    }

    /// 分类 Worker 返回的 payload；没有 `error` 字段（或为 null）视为成功，返回 None。
    /// payload 中若带 `error_type` 且可识别，则直接采用。
    pub fn classify_worker_result(payload: &Value) -> Option<ErrorStrategy> {
        let error = payload.get("error").filter(|e| !e.is_null())?;
        if let Some(t) = payload
            .get("error_type")
            .and_then(Value::as_str)
            .and_then(ErrorType::from_code)
        {
            return Some(t.strategy());
        }
        let text = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(Self::classify_text(&text))
    }
}
