use std::sync::Arc;

use tracing::debug;

use crate::domain::{CourierError, TaskContext, TaskParam};
use crate::typed::HandlerRegistry;

/// Manager resolves `param.task_name` in the registry and runs the handler.
///
/// Stateless beyond the registry it wraps; every side effect belongs to the
/// invoked handler.
#[derive(Clone)]
pub struct Manager {
    registry: Arc<HandlerRegistry>,
}

impl Manager {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Run one decoded parameter. The handler's error is returned verbatim.
    pub async fn run(&self, ctx: &TaskContext, param: &TaskParam) -> Result<(), CourierError> {
        // lookup は Arc を clone して read lock をすぐ手放す
        let handler = self
            .registry
            .lookup(&param.task_name)
            .ok_or_else(|| CourierError::HandlerNotFound(param.task_name.clone()))?;

        debug!(task_name = %param.task_name, "invoking handler");
        handler.call(ctx, param).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::typed::callback_fn;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> TaskContext {
        TaskContext::new(MessageId::new("m-1"), "tasks", CancellationToken::new())
    }

    #[tokio::test]
    async fn manager_runs_registered_handler() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("ok", Arc::new(callback_fn(|_ctx, _param| async { Ok(()) })));

        let manager = Manager::new(registry);
        manager.run(&ctx(), &TaskParam::new("ok", json!({}))).await.unwrap();
    }

    #[tokio::test]
    async fn manager_returns_handler_error_verbatim() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "x",
            Arc::new(callback_fn(|_ctx, _param| async {
                Err(CourierError::handler("boom"))
            })),
        );

        let err = Manager::new(registry)
            .run(&ctx(), &TaskParam::new("x", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Handler(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn unregistered_name_is_not_found_while_others_remain() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("a", Arc::new(callback_fn(|_ctx, _param| async { Ok(()) })));
        registry.register("b", Arc::new(callback_fn(|_ctx, _param| async { Ok(()) })));
        let manager = Manager::new(Arc::clone(&registry));

        registry.unregister("a");

        let err = manager
            .run(&ctx(), &TaskParam::new("a", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::HandlerNotFound(name) if name == "a"));
        manager.run(&ctx(), &TaskParam::new("b", json!({}))).await.unwrap();
    }
}
