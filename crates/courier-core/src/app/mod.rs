//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて consumer を組み立てます。
//!
//! # 主要コンポーネント
//! - **ConsumerBuilder**: consumer の構築とワイヤリング
//! - **TaskConsumer**: consume loop と ack/reject の判断
//! - **ConsumerConfig**: 同時実行数・timeout・再接続の設定
//! - **ConsumerStats**: 処理件数

pub mod builder;
pub mod config;
pub mod consumer;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ConsumerBuilder};
pub use self::config::ConsumerConfig;
pub use self::consumer::TaskConsumer;
pub use self::status::ConsumerStats;
