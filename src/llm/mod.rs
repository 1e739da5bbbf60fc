//! LLM 层：Provider 抽象与实现（OpenAI 兼容 / Mock）、多 Provider 路由、上下文桥接、Token 池均衡

pub mod balancer;
pub mod bridge;
pub mod message;
pub mod mock;
pub mod openai;
pub mod router;
pub mod traits;

pub use balancer::{default_pools, TokenPool, TokenPoolBalancer};
pub use bridge::ContextBridge;
pub use message::{ChatOptions, ChatResponse, Message, MessageContent, Role, Usage};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use router::{
    Backend, FailoverEvent, ModelRole, ModelRouter, ProbeOutcome, ProviderHealth, ProviderId,
    ProviderStatus, RouterConfig, TaskType,
};
pub use traits::{FailureClass, Provider, ProviderError};
