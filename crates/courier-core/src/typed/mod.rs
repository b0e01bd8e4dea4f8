//! Typed - handler 登録と codec
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `Callback` trait - object-safe, registry に格納される

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{DefaultMarshal, JsonFormat, Marshal, OutboundMessage, PayloadFormat};
pub use self::handler::{Callback, FnCallback, Handler, TypedHandler, callback_fn};
pub use self::registry::HandlerRegistry;
pub use self::task::Task;
