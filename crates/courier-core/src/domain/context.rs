//! TaskContext - handler に渡される実行コンテキスト
//!
//! Go の `context.Context` に相当するもの。キャンセルは cooperative で、
//! handler 側が `is_cancelled()` / `cancelled()` を見て早めに return する。

use tokio_util::sync::CancellationToken;

use super::ids::MessageId;

#[derive(Debug, Clone)]
pub struct TaskContext {
    message_id: MessageId,
    queue: String,
    token: CancellationToken,
}

impl TaskContext {
    pub fn new(message_id: MessageId, queue: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            message_id,
            queue: queue.into(),
            token,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owning consumer is shutting down.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
