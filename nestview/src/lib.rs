pub mod token;
pub mod view;
pub mod config;
pub mod guard;
pub mod aggregate;
pub mod embed;
pub mod engine;
pub mod error;

pub use aggregate::AggregationState;
pub use config::ChildEmbedConfig;
pub use embed::{ViewField, RECURSION_NOTICE};
pub use engine::SqlViewEngine;
pub use error::{NestViewError, Result};
pub use guard::RecursionGuard;
pub use view::{PagerConfig, ParentContext, Row, RowKey};
