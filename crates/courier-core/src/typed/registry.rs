//! HandlerRegistry - task_name -> Callback の対応表
//!
//! # 学習ポイント
//! - consumer が所有する明示的なオブジェクト（グローバル変数にしない）
//! - `parking_lot::RwLock<HashMap<..>>` で保護。lookup は read lock で
//!   `Arc` を clone してすぐ lock を手放す（lock を跨いで await しない）
//! - 登録は「後勝ち」（同じ name は上書き）

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::handler::{Callback, Handler, TypedHandler};
use super::task::Task;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Callback>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the callback for `name`. Returns the one replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        callback: Arc<dyn Callback>,
    ) -> Option<Arc<dyn Callback>> {
        self.handlers.write().insert(name.into(), callback)
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: Task, H: Handler<T> + 'static>(
        &self,
        handler: H,
    ) -> Option<Arc<dyn Callback>> {
        self.register(T::TYPE, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Remove the callback for `name`; no-op when absent.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Callback>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CourierError, MessageId, TaskContext, TaskParam};
    use crate::typed::handler::callback_fn;
    use crate::typed::task::fixtures::Greet;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Named(&'static str);

    #[async_trait]
    impl Callback for Named {
        async fn call(&self, _ctx: &TaskContext, _param: &TaskParam) -> Result<(), CourierError> {
            Err(CourierError::handler(self.0))
        }
    }

    struct GreetHandler;

    #[async_trait]
    impl Handler<Greet> for GreetHandler {
        async fn handle(&self, _ctx: &TaskContext, _task: Greet) -> Result<(), CourierError> {
            Ok(())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(MessageId::new("m-1"), "q", CancellationToken::new())
    }

    #[test]
    fn register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(registry.register("ping", Arc::new(Named("first"))).is_none());

        assert!(registry.lookup("ping").is_some());
        assert!(registry.lookup("pong").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register("ping", Arc::new(Named("first")));
        let replaced = registry.register("ping", Arc::new(Named("second")));
        assert!(replaced.is_some());

        let cb = registry.lookup("ping").unwrap();
        let err = cb.call(&ctx(), &TaskParam::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_a_noop_when_absent() {
        let registry = HandlerRegistry::new();
        registry.register("ping", Arc::new(Named("first")));

        assert!(!registry.unregister("pong"));
        assert!(registry.unregister("ping"));
        assert!(!registry.unregister("ping"));
        assert!(registry.is_empty());
    }

    #[test]
    fn typed_handlers_register_under_their_type() {
        let registry = HandlerRegistry::new();
        registry.register_typed::<Greet, _>(GreetHandler);
        registry.register("ping", Arc::new(callback_fn(|_ctx, _param| async { Ok(()) })));

        assert!(registry.contains(Greet::TYPE));
        assert_eq!(registry.names(), vec!["ping".to_string(), Greet::TYPE.to_string()]);
    }

    #[test]
    fn concurrent_mutation_keeps_lookups_consistent() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("stable", Arc::new(Named("stable")));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let name = format!("dyn-{i}");
                    for _ in 0..500 {
                        registry.register(name.clone(), Arc::new(Named("dyn")));
                        registry.unregister(&name);
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            assert!(registry.lookup("stable").is_some());
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(registry.names(), vec!["stable".to_string()]);
    }
}
