//! Worker 层：Worker trait、注册表（带超时与审计日志）、脚本化 Worker

pub mod registry;
pub mod scripted;

pub use registry::{Worker, WorkerRegistry};
pub use scripted::ScriptedWorker;
