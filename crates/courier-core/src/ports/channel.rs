//! Channel port - broker の配送チャネル
//!
//! 接続や exchange/queue の topology は broker 側の責務で、ここでは
//! 「queue を指定して delivery の stream を開く」境界だけを定義します。
//!
//! # 設計原則
//! - `Delivery::ack` / `Delivery::reject` は `self: Box<Self>` を取る
//!   （1 つの delivery に対して終端処理は型の上でも 1 回だけ）
//! - stream が `None` を返したら channel 側が閉じたとみなす

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("consume failed: {0}")]
    Consume(String),

    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("channel closed")]
    Closed,
}

/// Flags passed to the broker when opening a delivery stream.
///
/// The consumer always opens with every flag off: manual acks, shared queue,
/// local deliveries allowed, wait for the broker's reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Extra consume arguments (`x-*` style broker arguments).
pub type ConsumeArgs = HashMap<String, String>;

pub type DeliveryStream = BoxStream<'static, Box<dyn Delivery>>;

/// One in-flight message handed out by the broker.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn delivery_tag(&self) -> u64;

    /// Producer assigned message id, if any.
    fn message_id(&self) -> Option<&str>;

    fn body(&self) -> &[u8];

    /// Acknowledge this delivery. `multiple = true` would also ack every
    /// earlier unacked delivery on the channel.
    async fn ack(self: Box<Self>, multiple: bool) -> Result<(), TransportError>;

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
        args: ConsumeArgs,
    ) -> Result<DeliveryStream, TransportError>;
}
