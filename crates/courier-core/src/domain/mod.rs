//! Domain model (ids, envelope, task parameter, context, errors).

pub mod context;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod param;

pub use self::context::TaskContext;
pub use self::envelope::Envelope;
pub use self::errors::{CourierError, ErrorKind};
pub use self::ids::MessageId;
pub use self::param::TaskParam;
