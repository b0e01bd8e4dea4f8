//! TaskParam - payload のデコード先
//!
//! # 学習ポイント
//! - `ObjectPool` で再利用されるため、`reset()` で中身を空にしつつ
//!   String / HashMap の capacity は残す
//! - handler には `&TaskParam` で貸し出すだけ（所有権は pool 側）

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::payload_pool::Reusable;

/// Decoded task parameter handed to a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParam {
    /// Registry key of the handler that should run this task.
    pub task_name: String,

    /// Handler specific arguments.
    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TaskParam {
    pub fn new(task_name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            task_name: task_name.into(),
            params,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overwrite `self` with `decoded`, reusing the existing buffers.
    pub fn assign(&mut self, decoded: TaskParam) {
        self.task_name.clear();
        self.task_name.push_str(&decoded.task_name);
        self.params = decoded.params;
        self.metadata.clear();
        self.metadata.extend(decoded.metadata);
    }
}

impl Reusable for TaskParam {
    fn reset(&mut self) {
        self.task_name.clear();
        self.params = serde_json::Value::Null;
        self.metadata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reset_clears_every_field() {
        let mut param = TaskParam::new("ping", json!({ "n": 1 })).with_metadata("k", "v");
        param.reset();

        assert_eq!(param, TaskParam::default());
    }

    #[test]
    fn assign_keeps_name_buffer() {
        let mut param = TaskParam::new("a-rather-long-task-name", json!(null));
        let capacity = param.task_name.capacity();

        param.assign(TaskParam::new("ping", json!({ "n": 2 })).with_metadata("trace", "t-1"));

        assert_eq!(param.task_name, "ping");
        assert_eq!(param.params, json!({ "n": 2 }));
        assert_eq!(param.metadata.get("trace").map(String::as_str), Some("t-1"));
        assert_eq!(param.task_name.capacity(), capacity);
    }

    #[test]
    fn missing_optional_fields_default() {
        let param: TaskParam = serde_json::from_str(r#"{"task_name":"ping"}"#).unwrap();
        assert_eq!(param.params, serde_json::Value::Null);
        assert!(param.metadata.is_empty());
    }
}
