//! Callback / Handler - task を実行する関数の定義
//!
//! # 二層構造
//! - **内部（Dyn）**: `Callback` trait - object-safe。registry は
//!   `Arc<dyn Callback>` を name で引く
//! - **表層（Typed）**: `Handler<T>` trait - `TaskParam::params` を `T` に
//!   デコードしてから呼ぶ。`TypedHandler<T, H>` が Callback への型消去を担当

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{CourierError, TaskContext, TaskParam};

/// Business logic for one task name.
///
/// `param` is borrowed from the payload pool and is reused for the next
/// message as soon as this call returns; clone what must outlive it.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn call(&self, ctx: &TaskContext, param: &TaskParam) -> Result<(), CourierError>;
}

/// Closure adapter. The closure receives owned copies of the context and
/// parameter so it can return a `'static` future.
pub struct FnCallback<F> {
    f: F,
}

pub fn callback_fn<F, Fut>(f: F) -> FnCallback<F>
where
    F: Fn(TaskContext, TaskParam) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CourierError>> + Send + 'static,
{
    FnCallback { f }
}

#[async_trait]
impl<F, Fut> Callback for FnCallback<F>
where
    F: Fn(TaskContext, TaskParam) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CourierError>> + Send + 'static,
{
    async fn call(&self, ctx: &TaskContext, param: &TaskParam) -> Result<(), CourierError> {
        (self.f)(ctx.clone(), param.clone()).await
    }
}

/// Handler は型付き Task を実行する
///
/// # 使用例
/// ```ignore
/// struct SendMailHandler;
///
/// #[async_trait]
/// impl Handler<SendMail> for SendMailHandler {
///     async fn handle(&self, ctx: &TaskContext, task: SendMail) -> Result<(), CourierError> {
///         mailer.send(&task.to).await.map_err(|e| CourierError::handler(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: T) -> Result<(), CourierError>;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> Callback for TypedHandler<T, H> {
    async fn call(&self, ctx: &TaskContext, param: &TaskParam) -> Result<(), CourierError> {
        let task = T::deserialize(&param.params)
            .map_err(|e| CourierError::Decode(format!("params of {}: {e}", T::TYPE)))?;
        self.handler.handle(ctx, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::typed::task::fixtures::Greet;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct GreetHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Handler<Greet> for GreetHandler {
        async fn handle(&self, _ctx: &TaskContext, task: Greet) -> Result<(), CourierError> {
            self.seen.lock().push(task.name);
            Ok(())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(MessageId::new("m-1"), "tasks", CancellationToken::new())
    }

    #[tokio::test]
    async fn typed_handler_decodes_params() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let typed = TypedHandler::<Greet, _>::new(GreetHandler { seen: Arc::clone(&seen) });

        let param = TaskParam::new(Greet::TYPE, json!({ "name": "courier" }));
        typed.call(&ctx(), &param).await.unwrap();

        assert_eq!(*seen.lock(), vec!["courier".to_string()]);
    }

    #[tokio::test]
    async fn typed_handler_rejects_mismatched_params() {
        let typed = TypedHandler::<Greet, _>::new(GreetHandler {
            seen: Arc::new(Mutex::new(Vec::new())),
        });

        let param = TaskParam::new(Greet::TYPE, json!({ "nom": 3 }));
        let err = typed.call(&ctx(), &param).await.unwrap_err();

        assert!(matches!(err, CourierError::Decode(msg) if msg.contains(Greet::TYPE)));
    }

    #[tokio::test]
    async fn closures_receive_context_and_param() {
        let cb = callback_fn(|ctx: TaskContext, param: TaskParam| async move {
            if ctx.message_id().as_str() == "m-1" && param.task_name == "ping" {
                Ok(())
            } else {
                Err(CourierError::handler("unexpected input"))
            }
        });

        cb.call(&ctx(), &TaskParam::new("ping", json!(null))).await.unwrap();
    }
}
