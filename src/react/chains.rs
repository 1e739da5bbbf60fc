//! 回退链定义
//!
//! ChainKind -> 有序 WorkerKind 列表。未知链名解析为 General（只含 knowledge）。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Worker 身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Browser,
    Search,
    Knowledge,
    Interpreter,
    Code,
    Gog,
    Assist,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Browser => "browser",
            WorkerKind::Search => "search",
            WorkerKind::Knowledge => "knowledge",
            WorkerKind::Interpreter => "interpreter",
            WorkerKind::Code => "code",
            WorkerKind::Gog => "gog",
            WorkerKind::Assist => "assist",
        }
    }

    /// 有前序失败时注入 failed_attempts
    pub fn receives_failed_attempts(&self) -> bool {
        matches!(self, WorkerKind::Knowledge | WorkerKind::Assist)
    }

    /// 成功时按固定估算计入每日预算
    pub fn is_metered(&self) -> bool {
        matches!(self, WorkerKind::Knowledge)
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 回退链
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    WebBrowse,
    WebSearch,
    MapsSearch,
    FileOperation,
    CodeTask,
    Calendar,
    Email,
    Booking,
    Ticket,
    General,
}

impl ChainKind {
    pub const ALL: [ChainKind; 10] = [
        ChainKind::WebBrowse,
        ChainKind::WebSearch,
        ChainKind::MapsSearch,
        ChainKind::FileOperation,
        ChainKind::CodeTask,
        ChainKind::Calendar,
        ChainKind::Email,
        ChainKind::Booking,
        ChainKind::Ticket,
        ChainKind::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::WebBrowse => "web_browse",
            ChainKind::WebSearch => "web_search",
            ChainKind::MapsSearch => "maps_search",
            ChainKind::FileOperation => "file_operation",
            ChainKind::CodeTask => "code_task",
            ChainKind::Calendar => "calendar",
            ChainKind::Email => "email",
            ChainKind::Booking => "booking",
            ChainKind::Ticket => "ticket",
            ChainKind::General => "general",
        }
    }

    /// 链名解析；未知名称退回 General
    pub fn resolve(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .unwrap_or(ChainKind::General)
    }

    pub fn workers(&self) -> &'static [WorkerKind] {
        use WorkerKind::*;
        match self {
            ChainKind::WebBrowse => &[Browser, Knowledge],
            ChainKind::WebSearch => &[Browser, Search, Knowledge],
            ChainKind::MapsSearch => &[Browser, Knowledge],
            ChainKind::FileOperation => &[Interpreter, Code, Knowledge],
            ChainKind::CodeTask => &[Code, Knowledge],
            // 日历 / 邮件优先走 gog CLI
            ChainKind::Calendar => &[Gog, Knowledge],
            ChainKind::Email => &[Gog, Knowledge],
            ChainKind::Booking => &[Browser, Assist],
            ChainKind::Ticket => &[Browser, Assist],
            ChainKind::General => &[Knowledge],
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
