//! AMQP 0.9.1 channel (`lapin`)
//!
//! 接続と exchange/queue の宣言は呼び出し側の責務。ここでは
//! `basic_consume` を `DeliveryStream` に変換し、ack / reject を
//! `lapin::acker::Acker` に委譲するだけ。

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tracing::warn;

use crate::ports::{
    Channel, ConsumeArgs, ConsumeOptions, Delivery, DeliveryStream, TransportError,
};
use crate::typed::OutboundMessage;

pub struct AmqpChannel {
    // channel が生きている間は connection を保持する
    _connection: Option<Connection>,
    channel: lapin::Channel,
}

impl AmqpChannel {
    /// Wrap a channel opened elsewhere.
    pub fn new(channel: lapin::Channel) -> Self {
        Self {
            _connection: None,
            channel,
        }
    }

    /// Open a connection and a channel with `prefetch` unacked deliveries.
    pub async fn connect(url: &str, prefetch: u16) -> Result<Self, TransportError> {
        let connection = Connection::connect(
            url,
            ConnectionProperties::default().with_connection_name("courier-consumer".into()),
        )
        .await
        .map_err(|e| TransportError::Consume(format!("amqp connection failed: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Consume(format!("amqp channel creation failed: {e}")))?;

        channel
            .basic_qos(prefetch, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|e| TransportError::Consume(format!("failed to set qos: {e}")))?;

        Ok(Self {
            _connection: Some(connection),
            channel,
        })
    }

    /// Publish a marshalled message to `exchange` with `routing_key`.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let properties = BasicProperties::default()
            .with_message_id(message.message_id.clone().into())
            .with_content_type(message.content_type.clone().into());

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| TransportError::Consume(format!("basic_publish failed: {e}")))?
            .await
            .map_err(|e| TransportError::Consume(format!("publish confirm failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
        args: ConsumeArgs,
    ) -> Result<DeliveryStream, TransportError> {
        let mut table = FieldTable::default();
        for (key, value) in args {
            table.insert(ShortString::from(key), AMQPValue::LongString(value.into()));
        }

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.auto_ack,
                    exclusive: options.exclusive,
                    nowait: options.no_wait,
                },
                table,
            )
            .await
            .map_err(|e| TransportError::Consume(e.to_string()))?;

        // consumer のエラーは stream の終端として扱う（consumer loop が開き直す）
        let queue = queue.to_string();
        let stream = consumer
            .take_while(move |item| {
                if let Err(e) = item {
                    warn!(queue = %queue, error = %e, "amqp delivery stream failed");
                }
                futures::future::ready(item.is_ok())
            })
            .filter_map(|item| futures::future::ready(item.ok()))
            .map(|delivery| Box::new(AmqpDelivery(delivery)) as Box<dyn Delivery>);

        Ok(stream.boxed())
    }
}

pub struct AmqpDelivery(lapin::message::Delivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn delivery_tag(&self) -> u64 {
        self.0.delivery_tag
    }

    fn message_id(&self) -> Option<&str> {
        self.0.properties.message_id().as_ref().map(ShortString::as_str)
    }

    fn body(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(self: Box<Self>, multiple: bool) -> Result<(), TransportError> {
        self.0
            .acker
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        self.0
            .acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| TransportError::Acknowledge(e.to_string()))
    }
}
