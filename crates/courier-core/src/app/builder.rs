//! ConsumerBuilder - consumer の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装（各 collaborator を個別に差し替え可能）
//! - 起動時検証（Fail-fast 設計）: 設定値と期待される task_name を build() で検証

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::ConsumerConfig;
use super::consumer::TaskConsumer;
use crate::impls::DefaultValidator;
use crate::ports::Validator;
use crate::typed::{
    Callback, DefaultMarshal, Handler, HandlerRegistry, JsonFormat, Marshal, PayloadFormat, Task,
};
use crate::worker::RecoverFn;

/// # 使用例
/// ```ignore
/// let consumer = ConsumerBuilder::new(token.clone())
///     .config(ConsumerConfig::from_env()?)
///     .register("ping", Arc::new(PingHandler))
///     .expect_tasks(&["ping"])
///     .build()?;
/// consumer.subscribe(channel, "tasks").await?;
/// ```
pub struct ConsumerBuilder {
    token: CancellationToken,
    registry: Arc<HandlerRegistry>,
    marshal: Arc<dyn Marshal>,
    format: Arc<dyn PayloadFormat>,
    validator: Arc<dyn Validator>,
    config: ConsumerConfig,
    recover: Option<RecoverFn>,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("max_concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("message_timeout_ms must be greater than zero")]
    InvalidTimeout,

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}

impl ConsumerBuilder {
    /// `token` is the root cancellation token; cancelling it stops every
    /// `subscribe` loop of the built consumer.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            registry: Arc::new(HandlerRegistry::new()),
            marshal: Arc::new(DefaultMarshal),
            format: Arc::new(JsonFormat),
            validator: Arc::new(DefaultValidator::new()),
            config: ConsumerConfig::default(),
            recover: None,
            expected_tasks: None,
        }
    }

    /// Use a shared registry. Replaces the builder's own registry, so call it
    /// before `register`.
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn marshal(mut self, marshal: impl Marshal + 'static) -> Self {
        self.marshal = Arc::new(marshal);
        self
    }

    pub fn payload_format(mut self, format: impl PayloadFormat + 'static) -> Self {
        self.format = Arc::new(format);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default recovery callback (an `error!` log line).
    pub fn recover(mut self, recover: RecoverFn) -> Self {
        self.recover = Some(recover);
        self
    }

    pub fn register(self, name: impl Into<String>, callback: Arc<dyn Callback>) -> Self {
        self.registry.register(name, callback);
        self
    }

    pub fn register_typed<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Self {
        self.registry.register_typed::<T, H>(handler);
        self
    }

    /// 期待される task_name のリストを設定（build() 時に登録済みかチェック）
    pub fn expect_tasks(mut self, task_names: &[&str]) -> Self {
        self.expected_tasks = Some(task_names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<TaskConsumer, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        Ok(TaskConsumer::from_parts(
            &self.token,
            self.registry,
            self.marshal,
            self.format,
            self.validator,
            self.config,
            self.recover,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::callback_fn;

    fn ping() -> Arc<dyn Callback> {
        Arc::new(callback_fn(|_ctx, _param| async { Ok(()) }))
    }

    #[test]
    fn build_success() {
        let consumer = ConsumerBuilder::new(CancellationToken::new())
            .register("ping", ping())
            .expect_tasks(&["ping"])
            .build();
        assert!(consumer.is_ok());
    }

    #[test]
    fn build_missing_task_types() {
        let consumer = ConsumerBuilder::new(CancellationToken::new())
            .register("ping", ping())
            .expect_tasks(&["ping", "pong"])
            .build();
        assert!(matches!(
            consumer,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["pong".to_string()]
        ));
    }

    #[test]
    fn build_rejects_zero_concurrency() {
        let consumer = ConsumerBuilder::new(CancellationToken::new())
            .config(ConsumerConfig::default().with_max_concurrency(0))
            .build();
        assert!(matches!(consumer, Err(BuildError::InvalidConcurrency)));
    }

    #[test]
    fn shared_registry_is_used_by_the_consumer() {
        let registry = Arc::new(HandlerRegistry::new());
        let consumer = ConsumerBuilder::new(CancellationToken::new())
            .registry(Arc::clone(&registry))
            .build()
            .unwrap();

        consumer.register("late", ping());
        assert!(registry.contains("late"));

        consumer.unregister("late");
        assert!(registry.is_empty());
    }
}
