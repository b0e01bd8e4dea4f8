//! Ports - 抽象化レイヤー
//!
//! consumer が外部に依存する境界（broker channel, validator, 採番, 時刻）を
//! trait として定義します。実装は `impls` に置きます。

pub mod channel;
pub mod clock;
pub mod id_generator;
pub mod validator;

pub use self::channel::{
    Channel, ConsumeArgs, ConsumeOptions, Delivery, DeliveryStream, TransportError,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::validator::Validator;
