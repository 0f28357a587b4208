pub(crate) mod af;
pub mod attributes;
pub mod errors;
pub(crate) mod prefix_id;
pub(crate) mod protocol;
pub(crate) mod route;
pub mod stats;
pub mod test_types;

pub use attributes::{AttrRef, AttributeInterner, Meta};
pub use prefix_id::PrefixId;
pub use protocol::{Protocol, ProtocolKind, CONNECTED};
pub use route::{PolicyTags, RouteEntry, RouteRecord, RouteRef, Vif};
