//! courier-core
//!
//! Broker から task message を受け取り、名前で handler に振り分けて
//! ack / reject する consumer engine。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, param, context, errors）
//! - **ports**: 抽象化レイヤー（Channel, Delivery, Validator, IdGenerator, Clock）
//! - **app**: consumer の構築と consume loop（builder, config, consumer, status）
//! - **typed**: handler 登録と codec（Task, Handler, HandlerRegistry, Marshal）
//! - **impls**: 実装（InMemoryChannel, DefaultValidator, `amqp` feature の AmqpChannel）
//! - **runtime**: task_name で handler を引いて実行する Manager
//! - **worker**: panic を境界で止める WorkerPool
//! - **payload_pool**: デコード先 TaskParam の再利用

pub mod app;
pub mod domain;
pub mod impls;
pub mod payload_pool;
pub mod ports;
pub mod runtime;
pub mod typed;
pub mod worker;

pub use app::{BuildError, ConsumerBuilder, ConsumerConfig, ConsumerStats, TaskConsumer};
pub use domain::{CourierError, Envelope, ErrorKind, MessageId, TaskContext, TaskParam};
pub use ports::{Channel, Delivery, TransportError};
pub use runtime::Manager;
pub use typed::{Callback, Handler, HandlerRegistry, Task, callback_fn};
pub use worker::WorkerPool;
