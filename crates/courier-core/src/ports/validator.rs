//! Validator port - デコード済み TaskParam の構造チェック

use crate::domain::{CourierError, TaskParam};

/// Structural validation applied before dispatch.
///
/// A failure here is permanent: the delivery is rejected without requeue.
pub trait Validator: Send + Sync {
    fn validate_struct(&self, param: &TaskParam) -> Result<(), CourierError>;
}
