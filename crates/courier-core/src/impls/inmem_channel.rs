//! InMemoryChannel - 開発用・テスト用の broker channel
//!
//! # 学習ポイント
//! - queue ごとに `mpsc::unbounded_channel` を持ち、receiver は
//!   `Arc<tokio::sync::Mutex<..>>` で複数の consumer stream から共有する
//! - `futures::stream::unfold` で receiver を `DeliveryStream` に変換
//! - ack / reject は `AckLog` に記録され、テストから検証できる

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::domain::{CourierError, Envelope, MessageId, TaskParam};
use crate::ports::{
    Channel, ConsumeArgs, ConsumeOptions, Delivery, DeliveryStream, IdGenerator, SystemClock,
    TransportError, UlidGenerator,
};
use crate::typed::{DefaultMarshal, JsonFormat, Marshal, OutboundMessage, PayloadFormat};

/// Terminal decision recorded for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Ack { multiple: bool },
    Reject { requeue: bool },
}

#[derive(Default)]
pub struct AckLog {
    entries: Mutex<Vec<(u64, Termination)>>,
    notify: Notify,
}

impl AckLog {
    fn record(&self, tag: u64, termination: Termination) {
        self.entries.lock().push((tag, termination));
        self.notify.notify_waiters();
    }

    pub fn entries(&self) -> Vec<(u64, Termination)> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Every termination recorded for `tag`, in order.
    pub fn for_tag(&self, tag: u64) -> Vec<Termination> {
        self.entries
            .lock()
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, term)| *term)
            .collect()
    }

    pub fn acked(&self) -> usize {
        self.count(|t| matches!(t, Termination::Ack { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|t| matches!(t, Termination::Reject { .. }))
    }

    fn count(&self, pred: impl Fn(&Termination) -> bool) -> usize {
        self.entries.lock().iter().filter(|(_, t)| pred(t)).count()
    }

    /// Wait until at least `n` terminations have been recorded.
    pub async fn wait_for(&self, n: usize) {
        loop {
            // notified() を先に作ってから数えないと通知を取りこぼす
            let notified = self.notify.notified();
            if self.len() >= n {
                return;
            }
            notified.await;
        }
    }
}

pub struct InMemoryDelivery {
    tag: u64,
    message_id: Option<String>,
    body: Vec<u8>,
    log: Arc<AckLog>,
    failing_terminations: Arc<AtomicUsize>,
}

impl InMemoryDelivery {
    /// A delivery not attached to any channel, for codec tests.
    pub fn detached(tag: u64, message_id: Option<&str>, body: &[u8]) -> Self {
        Self {
            tag,
            message_id: message_id.map(str::to_string),
            body: body.to_vec(),
            log: Arc::new(AckLog::default()),
            failing_terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Records `termination` unless an injected failure is pending, in which
    /// case nothing is recorded.
    fn terminate(&self, termination: Termination) -> Result<(), TransportError> {
        if take_one(&self.failing_terminations) {
            return Err(TransportError::Acknowledge(format!(
                "injected failure for delivery {}",
                self.tag
            )));
        }
        self.log.record(self.tag, termination);
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(self: Box<Self>, multiple: bool) -> Result<(), TransportError> {
        self.terminate(Termination::Ack { multiple })
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        self.terminate(Termination::Reject { requeue })
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<InMemoryDelivery>>>;

#[derive(Clone)]
struct QueueHandle {
    tx: mpsc::UnboundedSender<InMemoryDelivery>,
    rx: SharedReceiver,
}

impl QueueHandle {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

pub struct InMemoryChannel {
    queues: Mutex<HashMap<String, QueueHandle>>,
    log: Arc<AckLog>,
    next_tag: AtomicU64,
    failing_consumes: AtomicUsize,
    failing_terminations: Arc<AtomicUsize>,
    consume_calls: AtomicUsize,
    opened: Mutex<Vec<(String, String, ConsumeOptions)>>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_id_generator(Box::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(ids: Box<dyn IdGenerator>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            log: Arc::new(AckLog::default()),
            next_tag: AtomicU64::new(1),
            failing_consumes: AtomicUsize::new(0),
            failing_terminations: Arc::new(AtomicUsize::new(0)),
            consume_calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            ids,
        }
    }

    pub fn log(&self) -> &Arc<AckLog> {
        &self.log
    }

    /// Publish raw bytes; returns the delivery tag the consumer will see.
    pub fn publish_raw(&self, queue: &str, message_id: Option<&str>, body: impl Into<Vec<u8>>) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = InMemoryDelivery {
            tag,
            message_id: message_id.map(str::to_string),
            body: body.into(),
            log: Arc::clone(&self.log),
            failing_terminations: Arc::clone(&self.failing_terminations),
        };
        // receiver は QueueHandle が持っているので send は失敗しない
        let _ = self.queue(queue).tx.send(delivery);
        tag
    }

    pub fn publish(&self, queue: &str, message: &OutboundMessage) -> u64 {
        self.publish_raw(queue, Some(message.message_id.as_str()), message.body.clone())
    }

    /// Encode `param` as JSON under a freshly generated message id.
    pub fn publish_task(&self, queue: &str, param: &TaskParam) -> Result<(MessageId, u64), CourierError> {
        let envelope = Envelope::generate(self.ids.as_ref(), JsonFormat.encode(param)?);
        let tag = self.publish(queue, &DefaultMarshal.marshal(&envelope));
        Ok((envelope.id().clone(), tag))
    }

    /// Drop the queue; open streams end once they drain.
    pub fn close_queue(&self, queue: &str) {
        self.queues.lock().remove(queue);
    }

    /// Make the next `n` calls to `consume` fail.
    pub fn fail_next_consumes(&self, n: usize) {
        self.failing_consumes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` ack / reject calls fail. Failed calls are not
    /// recorded in the log.
    pub fn fail_next_terminations(&self, n: usize) {
        self.failing_terminations.store(n, Ordering::SeqCst);
    }

    pub fn consume_calls(&self) -> usize {
        self.consume_calls.load(Ordering::SeqCst)
    }

    /// `(queue, consumer_tag, options)` of every stream opened so far.
    pub fn opened_streams(&self) -> Vec<(String, String, ConsumeOptions)> {
        self.opened.lock().clone()
    }

    fn queue(&self, name: &str) -> QueueHandle {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(QueueHandle::new)
            .clone()
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
        _args: ConsumeArgs,
    ) -> Result<DeliveryStream, TransportError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_consumes) {
            return Err(TransportError::Consume(format!("injected failure for {queue}")));
        }

        self.opened
            .lock()
            .push((queue.to_string(), consumer_tag.to_string(), options));
        let QueueHandle { tx, rx } = self.queue(queue);
        // stream が tx を持つと close_queue しても終わらなくなる
        drop(tx);
        let stream = futures::stream::unfold(rx, |rx| async move {
            let next = rx.lock().await.recv().await;
            next.map(|delivery| (Box::new(delivery) as Box<dyn Delivery>, rx))
        });
        Ok(stream.boxed())
    }
}
