//! Codec - delivery と Envelope / TaskParam の相互変換
//!
//! # 二段階
//! 1. `Marshal`: broker の delivery から (message_id, body) を取り出す。
//!    wire format が変わってもここだけ直せば dispatch 側は影響を受けない
//! 2. `PayloadFormat`: body を pool から借りた `TaskParam` にデコードする
//!    （JSON handling strategy）

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;

use crate::domain::{CourierError, Envelope, MessageId, TaskParam};
use crate::payload_pool::Reusable;
use crate::ports::Delivery;

/// What a producer hands to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message_id: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

pub trait Marshal: Send + Sync {
    fn unmarshal(&self, delivery: &dyn Delivery) -> Result<Envelope, CourierError>;

    fn marshal(&self, envelope: &Envelope) -> OutboundMessage;
}

/// Message id from the delivery properties, body as the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMarshal;

impl DefaultMarshal {
    pub const CONTENT_TYPE: &'static str = "application/json";
}

impl Marshal for DefaultMarshal {
    fn unmarshal(&self, delivery: &dyn Delivery) -> Result<Envelope, CourierError> {
        let id = match delivery.message_id() {
            Some(id) if !id.trim().is_empty() => MessageId::new(id),
            _ => {
                return Err(CourierError::Decode(format!(
                    "delivery {} has no message id",
                    delivery.delivery_tag()
                )));
            }
        };
        if delivery.body().is_empty() {
            return Err(CourierError::Decode(format!("message {id} has an empty body")));
        }
        Ok(Envelope::new(id, delivery.body().to_vec()))
    }

    fn marshal(&self, envelope: &Envelope) -> OutboundMessage {
        OutboundMessage {
            message_id: envelope.id().to_string(),
            content_type: Self::CONTENT_TYPE.to_string(),
            body: envelope.payload().to_vec(),
        }
    }
}

pub trait PayloadFormat: Send + Sync {
    /// Decode `bytes` into `param`, overwriting whatever it held.
    fn decode_into(&self, bytes: &[u8], param: &mut TaskParam) -> Result<(), CourierError>;

    fn encode(&self, param: &TaskParam) -> Result<Vec<u8>, CourierError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl PayloadFormat for JsonFormat {
    /// Decodes straight into `param`: `task_name` and `metadata` keep their
    /// buffers. On error `param` holds partial data until it is reset.
    fn decode_into(&self, bytes: &[u8], param: &mut TaskParam) -> Result<(), CourierError> {
        let mut de = serde_json::Deserializer::from_slice(bytes);
        ParamSeed(param)
            .deserialize(&mut de)
            .and_then(|()| de.end())
            .map_err(|e| CourierError::Decode(e.to_string()))
    }

    fn encode(&self, param: &TaskParam) -> Result<Vec<u8>, CourierError> {
        serde_json::to_vec(param).map_err(|e| CourierError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "snake_case")]
enum ParamField {
    TaskName,
    Params,
    Metadata,
    #[serde(other)]
    Other,
}

/// `TaskParam` を新しく作らずに、借りてきたインスタンスへ直接デコードする
struct ParamSeed<'p>(&'p mut TaskParam);

impl<'de> DeserializeSeed<'de> for ParamSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ParamSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a task parameter object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let param = self.0;
        param.reset();

        let mut has_name = false;
        while let Some(field) = map.next_key::<ParamField>()? {
            match field {
                ParamField::TaskName => {
                    map.next_value_seed(StrInto(&mut param.task_name))?;
                    has_name = true;
                }
                ParamField::Params => param.params = map.next_value()?,
                ParamField::Metadata => map.next_value_seed(MetadataInto(&mut param.metadata))?,
                ParamField::Other => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        if !has_name {
            return Err(de::Error::missing_field("task_name"));
        }
        Ok(())
    }
}

struct StrInto<'s>(&'s mut String);

impl<'de> DeserializeSeed<'de> for StrInto<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for StrInto<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<(), E> {
        self.0.clear();
        self.0.push_str(v);
        Ok(())
    }
}

struct MetadataInto<'m>(&'m mut HashMap<String, String>);

impl<'de> DeserializeSeed<'de> for MetadataInto<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MetadataInto<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        self.0.clear();
        while let Some((key, value)) = map.next_entry::<String, String>()? {
            self.0.insert(key, value);
        }
        Ok(())
    }
}
