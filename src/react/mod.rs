//! 执行层：回退链、熔断器、去重 / 环路检测、ReactExecutor

pub mod chains;
pub mod executor;
pub mod fuse;
pub mod guard;

pub use chains::{ChainKind, WorkerKind};
pub use executor::{Attempt, GaveUpReason, ReactExecutor, ReplayRequest, TaskResult};
pub use fuse::{FuseLimits, FuseState};
pub use guard::{ErrorDeduplicator, LoopDetector};
