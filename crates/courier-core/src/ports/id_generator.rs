//! IdGenerator port - message id 採番の抽象化
//!
//! consumer 自体は delivery に付いている id をそのまま使うので、
//! これを使うのは producer 側（`Envelope::generate`, `InMemoryChannel::publish`）。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（時刻でソート可能、調整不要で分散生成できる）

use crate::domain::MessageId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;
}

/// Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時に FixedClock を渡せば timestamp 部分が固定されます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        MessageId::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
