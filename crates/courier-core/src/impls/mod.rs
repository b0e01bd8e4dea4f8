//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryChannel**: 開発用・テスト用の broker channel
//! - **DefaultValidator**: TaskParam の構造チェック
//! - **AmqpChannel** (`amqp` feature): lapin による RabbitMQ channel

pub mod inmem_channel;
pub mod validate;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use self::inmem_channel::{AckLog, InMemoryChannel, InMemoryDelivery, Termination};
pub use self::validate::DefaultValidator;

#[cfg(feature = "amqp")]
pub use self::amqp::{AmqpChannel, AmqpDelivery};
