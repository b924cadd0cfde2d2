pub mod aspects;
pub mod columns;
pub mod cx;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod record;

pub use aspects::{AspectRead, OpaqueAspectArchive, OpaqueAspectElement};
pub use error::CoreError;
pub use field_value::{ColumnType, FieldValue};
pub use ids::*;
pub use record::RemoteNetworkRecord;
