//! 核心层：错误类型、错误分类、组件构建

pub mod builder;
pub mod classifier;
pub mod error;

pub use builder::RelayBuilder;
pub use classifier::{Classify, ErrorClassifier, ErrorStrategy, ErrorType};
pub use error::{RelayError, RouterError};
