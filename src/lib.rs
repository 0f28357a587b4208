#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

//! A library that provides the route table pipeline at the heart of a
//! software router's Routing Information Base (RIB).
//!
//! Routing protocols feed their routes into an origin table each. From
//! there, every route event travels up a chain of tables: a policy table
//! filters and rewrites routes, a decision table merges the chains of all
//! protocols and selects the best route per destination, and a
//! redistribution table hands every change of a best route to the
//! consumers of the RIB, such as a forwarding table installer.
//!
//! All work happens on the caller's thread. Work that is proportional to
//! the size of a table, like withdrawing all routes of a protocol that went
//! down, or dumping the current best routes to a new consumer, is never
//! done in one go: it is queued as a background task and executed in
//! bounded steps by [Pipeline::run_once](rib::Pipeline::run_once).
//!
//! The tables of a pipeline store their routes in a path-compressed binary
//! trie per address family, so a RIB is instantiated once for IPv4 and once
//! for IPv6. [Rib](rib::Rib) bundles both.
#[macro_use]
mod macros;

mod trie;
mod types;

// re-exports
pub use inetnum::addr;

// Public Interfaces on the root of the crate

/// RIBs, the pipeline they are built on, and their configuration
pub mod rib;

/// The route tables a pipeline is built from
pub mod tables;

/// Error types returned by a RIB
pub use types::errors;

/// Trait that defines the AFIs 1 (IPv4) and 2 (IPv6)
pub use types::af::AddressFamily;

/// The underlying value (u32) and trait impl for AFI 1.
pub use types::af::IPv4;
/// The underlying value (u128) and trait impl for AFI 2.
pub use types::af::IPv6;

/// Routes, their attributes and the protocols that announce them
pub use types::{
    AttrRef, AttributeInterner, Meta, PolicyTags, PrefixId, Protocol,
    ProtocolKind, RouteEntry, RouteRecord, RouteRef, Vif,
};

/// The trie the tables store their routes in, and the route ranges it
/// answers lookups with
pub use trie::{PrefixTrie, RouteRange};

/// Statistics and metrics types returned by methods on a RIB
pub use types::stats;

// Used in tests
#[doc(hidden)]
pub use types::test_types;
