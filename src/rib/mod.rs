pub mod config;
pub mod pipeline;
#[allow(clippy::module_inception)]
pub mod rib;
pub mod rib_af;
mod scheduler;
pub mod vif;

pub use config::Config;
pub use pipeline::Pipeline;
pub use rib::Rib;
pub use rib_af::{ProtocolTables, RibAf};
pub use vif::{RibVif, VifAddr};
