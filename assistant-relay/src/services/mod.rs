pub mod assistant;
pub mod markdown;
pub mod metrics;
pub mod relay;

pub use assistant::{AssistantApi, AssistantError};
pub use relay::{ChatRelay, RelayConfig, RelayError, RelayReply, ReplyKind};
