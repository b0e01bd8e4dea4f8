//! TaskConsumer - broker から task を受け取り、handler に渡して ack/reject する
//!
//! # フロー（1 delivery あたり）
//! 1. `Marshal::unmarshal` で (message_id, body) を取り出す
//! 2. pool から `TaskParam` を借りて body をデコード
//! 3. `Validator::validate_struct`
//! 4. `Manager::run` で handler を実行（`TaskParam` はここで pool に返す）
//! 5. 成功なら `ack(false)`、それ以外はすべて `reject(false)`
//!
//! # 学習ポイント
//! - ack / reject は `Box<dyn Delivery>` を消費するので、1 delivery に
//!   2 回呼ぶことは型で防がれる
//! - 判定（Verdict）を先に決めてから終端処理をするので、途中で panic しても
//!   必ず reject になる
//! - 同時実行数の制限は consume loop 側で permit を取ってから spawn する
//!   （pool 内で待つと loop 自身が permit を握って詰まる）

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

use super::builder::ConsumerBuilder;
use super::config::ConsumerConfig;
use super::status::{ConsumerStats, StatsCounters};
use crate::domain::{CourierError, Envelope, TaskContext, TaskParam};
use crate::payload_pool::ObjectPool;
use crate::ports::{Channel, ConsumeArgs, ConsumeOptions, Delivery, TransportError, Validator};
use crate::runtime::Manager;
use crate::typed::{Callback, Handler, HandlerRegistry, Marshal, PayloadFormat, Task};
use crate::worker::{RecoverFn, WorkerPool, panic_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ack,
    Reject,
}

struct Inner {
    pool: WorkerPool,
    manager: Manager,
    marshal: Arc<dyn Marshal>,
    format: Arc<dyn PayloadFormat>,
    validator: Arc<dyn Validator>,
    config: ConsumerConfig,
    payloads: Arc<ObjectPool<TaskParam>>,
    limiter: Option<Arc<Semaphore>>,
    stats: StatsCounters,
}

#[derive(Clone)]
pub struct TaskConsumer {
    inner: Arc<Inner>,
}

impl TaskConsumer {
    pub fn builder(token: CancellationToken) -> ConsumerBuilder {
        ConsumerBuilder::new(token)
    }

    pub(crate) fn from_parts(
        root: &CancellationToken,
        registry: Arc<HandlerRegistry>,
        marshal: Arc<dyn Marshal>,
        format: Arc<dyn PayloadFormat>,
        validator: Arc<dyn Validator>,
        config: ConsumerConfig,
        recover: Option<RecoverFn>,
    ) -> Self {
        let mut pool = WorkerPool::new(root);
        if let Some(recover) = recover {
            pool = pool.with_recover(recover);
        }
        let limiter = config
            .max_concurrency
            .map(|max| Arc::new(Semaphore::new(max)));
        let payloads = Arc::new(ObjectPool::new(config.payload_pool_capacity));

        Self {
            inner: Arc::new(Inner {
                pool,
                manager: Manager::new(registry),
                marshal,
                format,
                validator,
                config,
                payloads,
                limiter,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Register (or overwrite) a handler. Safe while `subscribe` is running.
    pub fn register(&self, name: impl Into<String>, callback: Arc<dyn Callback>) {
        self.inner.manager.registry().register(name, callback);
    }

    pub fn register_typed<T: Task, H: Handler<T> + 'static>(&self, handler: H) {
        self.inner.manager.registry().register_typed::<T, H>(handler);
    }

    /// Remove a handler; later deliveries naming it are rejected.
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.manager.registry().unregister(name)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.inner.manager.registry()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ConsumerStats {
        self.inner.stats.snapshot()
    }

    /// Child of the token the consumer was built with.
    pub fn token(&self) -> &CancellationToken {
        self.inner.pool.token()
    }

    /// Stop every `subscribe` loop of this consumer. In-flight messages still
    /// finish.
    pub fn shutdown(&self) {
        self.inner.pool.token().cancel();
    }

    /// Consume `queue` until the consumer is cancelled, then wait for every
    /// in-flight message to be acked or rejected.
    ///
    /// Per-message failures never surface here; they end as a reject and a
    /// log line.
    pub async fn subscribe(&self, channel: Arc<dyn Channel>, queue: &str) -> Result<(), CourierError> {
        let queue: Arc<str> = Arc::from(queue);
        info!(queue = %queue, consumer_tag = %self.inner.config.consumer_tag(&queue), "subscribe");

        let inner = Arc::clone(&self.inner);
        self.inner
            .pool
            .go(move |token| consume_loop(inner, channel, queue, token));

        self.inner.pool.wait().await;
        Ok(())
    }
}

async fn consume_loop(
    inner: Arc<Inner>,
    channel: Arc<dyn Channel>,
    queue: Arc<str>,
    token: CancellationToken,
) {
    let consumer_tag = inner.config.consumer_tag(&queue);

    loop {
        if token.is_cancelled() {
            break;
        }

        let opened = tokio::select! {
            _ = token.cancelled() => break,
            opened = channel.consume(&queue, &consumer_tag, ConsumeOptions::default(), ConsumeArgs::new()) => opened,
        };
        let mut deliveries = match opened {
            Ok(stream) => stream,
            Err(err) => {
                error!(queue = %queue, error = %err, "consumer failed");
                inner.stats.stream_failed();
                if !pause(&token, inner.config.reconnect_backoff()).await {
                    break;
                }
                continue;
            }
        };

        loop {
            let delivery = tokio::select! {
                _ = token.cancelled() => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        warn!(queue = %queue, "delivery stream closed, re-opening");
                        break;
                    }
                },
            };
            inner.stats.received();

            // 取り出した delivery は必ず終端させるので、ここの待ちはキャンセルしない
            let permit = match &inner.limiter {
                Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                None => None,
            };

            let task_inner = Arc::clone(&inner);
            let task_queue = Arc::clone(&queue);
            inner.pool.go(move |token| async move {
                let _permit = permit;
                let tag = delivery.delivery_tag();
                if let Err(err) = handle(&task_inner, &token, &task_queue, delivery).await {
                    error!(queue = %task_queue, delivery_tag = tag, error = %err, "handle failed");
                    task_inner.stats.terminate_failed();
                }
            });
        }

        if !token.is_cancelled() && !pause(&token, inner.config.reconnect_backoff()).await {
            break;
        }
    }

    debug!(queue = %queue, "consume loop stopped");
}

/// Wait before re-opening. Returns `false` when cancelled meanwhile.
async fn pause(token: &CancellationToken, backoff: Duration) -> bool {
    if backoff.is_zero() {
        // 即時再接続でも他の task に実行を譲る
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(backoff) => true,
    }
}

async fn handle(
    inner: &Inner,
    token: &CancellationToken,
    queue: &str,
    delivery: Box<dyn Delivery>,
) -> Result<(), TransportError> {
    let verdict = match AssertUnwindSafe(decide(inner, token, queue, delivery.as_ref()))
        .catch_unwind()
        .await
    {
        Ok(verdict) => verdict,
        Err(panic) => {
            inner.pool.recover(&panic_message(panic.as_ref()));
            inner.stats.recovered_panic();
            Verdict::Reject
        }
    };

    match verdict {
        Verdict::Ack => {
            delivery.ack(false).await?;
            inner.stats.acked();
        }
        Verdict::Reject => {
            delivery.reject(false).await?;
            inner.stats.rejected();
        }
    }
    Ok(())
}

async fn decide(
    inner: &Inner,
    token: &CancellationToken,
    queue: &str,
    delivery: &dyn Delivery,
) -> Verdict {
    let envelope = match inner.marshal.unmarshal(delivery) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(queue = %queue, delivery_tag = delivery.delivery_tag(), error = %err, "unmarshal failed");
            return Verdict::Reject;
        }
    };

    let span = info_span!(
        "message",
        uuid = %envelope.id(),
        queue = %queue,
        task_name = field::Empty
    );
    process(inner, token, queue, envelope).instrument(span).await
}

async fn process(
    inner: &Inner,
    token: &CancellationToken,
    queue: &str,
    envelope: Envelope,
) -> Verdict {
    let (id, payload) = envelope.into_parts();
    debug!(body = %String::from_utf8_lossy(&payload), "received");

    let mut param = inner.payloads.acquire();
    if let Err(err) = inner.format.decode_into(&payload, &mut param) {
        error!(error = %err, "unmarshal failed");
        return Verdict::Reject;
    }
    Span::current().record("task_name", param.task_name.as_str());

    if let Err(err) = inner.validator.validate_struct(&param) {
        error!(error = %err, "validate struct failed");
        return Verdict::Reject;
    }

    let ctx = TaskContext::new(id, queue, token.clone());
    let outcome = dispatch(inner, &ctx, &param).await;
    drop(param);

    match outcome {
        Ok(()) => Verdict::Ack,
        Err(err) => {
            error!(error = %err, kind = ?err.kind(), "run failed");
            Verdict::Reject
        }
    }
}

async fn dispatch(inner: &Inner, ctx: &TaskContext, param: &TaskParam) -> Result<(), CourierError> {
    let run = AssertUnwindSafe(inner.manager.run(ctx, param)).catch_unwind();
    let finished = match inner.config.message_timeout() {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .map_err(|_| CourierError::HandlerTimeout(limit))?,
        None => run.await,
    };

    finished.unwrap_or_else(|panic| {
        let message = panic_message(panic.as_ref());
        inner.pool.recover(&message);
        inner.stats.recovered_panic();
        Err(CourierError::HandlerPanicked(message))
    })
}
