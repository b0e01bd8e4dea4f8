use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_core::impls::InMemoryChannel;
use courier_core::{
    Channel, ConsumerConfig, CourierError, Handler, Task, TaskConsumer, TaskContext, TaskParam,
    callback_fn,
};

const QUEUE: &str = "tasks";

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Task for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

/// 最初の n 回はわざと失敗する（失敗した delivery は reject される）
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, ctx: &TaskContext, task: Hello) -> Result<(), CourierError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(CourierError::handler(format!(
                "intentional failure (left={left})"
            )));
        }

        info!(message_id = %ctx.message_id(), "Hello, {}!", task.name);
        Ok(())
    }
}

async fn ping(_ctx: TaskContext, param: TaskParam) -> Result<(), CourierError> {
    info!(params = %param.params, "pong");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // (A) consumer を用意（設定は COURIER_* 環境変数で上書きできる）
    let token = CancellationToken::new();
    let consumer = TaskConsumer::builder(token.clone())
        .config(ConsumerConfig::from_env()?)
        .register("ping", Arc::new(callback_fn(ping)))
        .register_typed::<Hello, _>(HelloHandler::new(1))
        .expect_tasks(&["ping", Hello::TYPE])
        .build()?;

    if let Ok(url) = std::env::var("COURIER_AMQP_URL") {
        return run_amqp(consumer, token, &url).await;
    }

    // (B) in-memory broker にメッセージを投入（壊れたものも混ぜる）
    let channel = Arc::new(InMemoryChannel::new());
    let tasks = [
        TaskParam::new("ping", json!({ "seq": 1 })),
        TaskParam::new(Hello::TYPE, json!({ "name": "courier" })),
        TaskParam::new(Hello::TYPE, json!({ "name": "courier" })),
        TaskParam::new("unknown", json!({})),
        TaskParam::new(Hello::TYPE, json!({ "nom": "missing field" })),
    ];
    for task in &tasks {
        let (id, tag) = channel.publish_task(QUEUE, task)?;
        info!(message_id = %id, delivery_tag = tag, task_name = %task.task_name, "published");
    }
    channel.publish_raw(QUEUE, Some("malformed-1"), b"{not json".to_vec());
    let expected = tasks.len() + 1;

    // (C) consumer を起動
    let subscription = {
        let consumer = consumer.clone();
        let channel: Arc<dyn Channel> = channel.clone();
        tokio::spawn(async move { consumer.subscribe(channel, QUEUE).await })
    };

    // (D) 全件が ack/reject されるか Ctrl-C で停止
    tokio::select! {
        _ = channel.log().wait_for(expected) => info!("demo queue drained"),
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(10)) => warn!("demo timed out"),
    }

    // (E) graceful shutdown: 実行中の task が終わるまで subscribe が待つ
    token.cancel();
    subscription.await??;

    info!(
        acked = channel.log().acked(),
        rejected = channel.log().rejected(),
        stats = ?consumer.stats(),
        "finished"
    );
    Ok(())
}

#[cfg(feature = "amqp")]
async fn run_amqp(
    consumer: TaskConsumer,
    token: CancellationToken,
    url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use courier_core::impls::AmqpChannel;

    let queue = std::env::var("COURIER_QUEUE").unwrap_or_else(|_| QUEUE.to_string());
    let prefetch = consumer
        .config()
        .max_concurrency
        .and_then(|n| u16::try_from(n).ok())
        .unwrap_or(32);
    let channel: Arc<dyn Channel> = Arc::new(AmqpChannel::connect(url, prefetch).await?);

    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted");
            }
            token.cancel();
        }
    });

    consumer.subscribe(channel, &queue).await?;
    info!(stats = ?consumer.stats(), "finished");
    Ok(())
}

#[cfg(not(feature = "amqp"))]
async fn run_amqp(
    _consumer: TaskConsumer,
    _token: CancellationToken,
    _url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("COURIER_AMQP_URL is set but courier-cli was built without the `amqp` feature".into())
}
