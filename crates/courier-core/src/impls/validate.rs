//! DefaultValidator - TaskParam の構造チェック（デフォルト実装）

use crate::domain::{CourierError, TaskParam};
use crate::ports::Validator;

const DEFAULT_MAX_NAME_LEN: usize = 255;

/// Checks the fields every task must carry:
/// - `task_name` is present, has no surrounding whitespace, is at most
///   `max_name_len` bytes and uses `[A-Za-z0-9._:/-]` only
/// - `params` is an object, an array or absent (`null`)
/// - metadata keys are non-empty
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    max_name_len: usize,
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }

    pub fn with_max_name_len(mut self, max: usize) -> Self {
        self.max_name_len = max;
        self
    }
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for DefaultValidator {
    fn validate_struct(&self, param: &TaskParam) -> Result<(), CourierError> {
        let name = param.task_name.as_str();
        if name.is_empty() {
            return Err(CourierError::Validation("task_name is required".into()));
        }
        if name.len() > self.max_name_len {
            return Err(CourierError::Validation(format!(
                "task_name longer than {} bytes",
                self.max_name_len
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-')))
        {
            return Err(CourierError::Validation(format!(
                "task_name contains invalid character {bad:?}"
            )));
        }
        if !(param.params.is_object() || param.params.is_array() || param.params.is_null()) {
            return Err(CourierError::Validation(
                "params must be an object or an array".into(),
            ));
        }
        if param.metadata.keys().any(|k| k.is_empty()) {
            return Err(CourierError::Validation("metadata keys must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::simple("ping")]
    #[case::namespaced("mail.send.v1")]
    #[case::path_like("billing/charge:retry_1")]
    fn accepts_well_formed_names(#[case] name: &str) {
        let param = TaskParam::new(name, json!({}));
        assert!(DefaultValidator::new().validate_struct(&param).is_ok());
    }

    #[rstest]
    #[case::empty("")]
    #[case::padded(" ping ")]
    #[case::spaces("send mail")]
    #[case::unicode("pïng")]
    fn rejects_malformed_names(#[case] name: &str) {
        let param = TaskParam::new(name, json!({}));
        let err = DefaultValidator::new().validate_struct(&param).unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[test]
    fn enforces_name_length() {
        let validator = DefaultValidator::new().with_max_name_len(4);
        assert!(validator.validate_struct(&TaskParam::new("ping", json!(null))).is_ok());
        assert!(validator.validate_struct(&TaskParam::new("pings", json!(null))).is_err());
    }

    #[rstest]
    #[case::scalar(json!(42), false)]
    #[case::string(json!("x"), false)]
    #[case::array(json!([1, 2]), true)]
    #[case::absent(json!(null), true)]
    fn checks_params_shape(#[case] params: serde_json::Value, #[case] ok: bool) {
        let param = TaskParam::new("ping", params);
        assert_eq!(DefaultValidator::new().validate_struct(&param).is_ok(), ok);
    }

    #[test]
    fn rejects_empty_metadata_keys() {
        let param = TaskParam::new("ping", json!({})).with_metadata("", "v");
        assert!(DefaultValidator::new().validate_struct(&param).is_err());
    }
}
