//! Message identifiers.
//!
//! broker から届く message_id は任意の文字列なので、`MessageId` は String の
//! newtype です。producer 側で新しく採番する場合は ULID を使います
//! （`ports::IdGenerator` 経由）。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier correlating every log line of one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_backed_ids_are_sortable() {
        let id1 = MessageId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = MessageId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = MessageId::new("msg-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"msg-1\"");

        let back: MessageId = serde_json::from_str("\"msg-1\"").unwrap();
        assert_eq!(back, id);
    }
}
