use std::fmt;

use crate::tables::TableType;

/// Possible errors returned by the route tables and the RIBs built out of
/// them.
///
/// Most of these errors are recoverable: they describe an expected absence
/// (a net, a protocol or a table that is not there) and the pipeline state
/// is unchanged when they are returned. The variants for which
/// [RouteTableError::is_fatal] returns true are protocol invariant
/// violations: forwarding state may now diverge from protocol state, the
/// pipeline should be considered corrupt and the application should
/// terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTableError {
    /// The net does not exist in the table the operation was performed on,
    /// e.g. a delete for a net that was never added, or that was already
    /// removed by a background deletion pass.
    RouteNotFound,
    /// The requested table is not (or no longer) part of the pipeline.
    TableNotFound,
    /// No routing protocol with the requested name is registered.
    ProtocolNotFound,
    /// A routing protocol with this name is already registered, and the
    /// operation requires a new one.
    ProtocolExists,
    /// A prefix or address of the other address family was handed to a
    /// single-family table.
    FamilyMismatch,
    /// The requested route consumer is not registered.
    ConsumerNotFound,
    /// The client has no interest registered for the subnet.
    RegistrationNotFound,
    /// A vif with this name exists already.
    VifExists,
    /// No vif with the requested name exists.
    VifNotFound,
    /// FATAL: a mutating call came from a table that is not a neighbour of
    /// the table receiving it.
    UnknownCaller,
    /// FATAL: a table was used as a type it is not.
    TableTypeMismatch {
        expected: TableType,
        found: TableType,
    },
    /// FATAL: a table produced an event, but has no parent to hand it to.
    /// Topology changes must never happen with events in flight.
    MissingParent,
    /// FATAL: plumbing referred to a parent or child link that does not
    /// exist.
    TopologyError,
}

impl RouteTableError {
    /// Returns true for protocol invariant violations. The caller should
    /// terminate the pipeline, and probably itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RouteTableError::UnknownCaller
                | RouteTableError::TableTypeMismatch { .. }
                | RouteTableError::MissingParent
                | RouteTableError::TopologyError
        )
    }
}

impl std::error::Error for RouteTableError {}

impl fmt::Display for RouteTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouteTableError::RouteNotFound => {
                write!(f, "Error: The route cannot be found.")
            }
            RouteTableError::TableNotFound => {
                write!(f, "Error: The table is not part of the pipeline.")
            }
            RouteTableError::ProtocolNotFound => {
                write!(f, "Error: The routing protocol is not registered.")
            }
            RouteTableError::ProtocolExists => {
                write!(
                    f,
                    "Error: A routing protocol with this name is already \
                    registered."
                )
            }
            RouteTableError::FamilyMismatch => {
                write!(
                    f,
                    "Error: The prefix belongs to another address family."
                )
            }
            RouteTableError::ConsumerNotFound => {
                write!(f, "Error: The route consumer is not registered.")
            }
            RouteTableError::RegistrationNotFound => {
                write!(
                    f,
                    "Error: No interest is registered for the subnet."
                )
            }
            RouteTableError::VifExists => {
                write!(f, "Error: A vif with this name already exists.")
            }
            RouteTableError::VifNotFound => {
                write!(f, "Error: The vif does not exist.")
            }
            RouteTableError::UnknownCaller => {
                write!(
                    f,
                    "FATAL: A table was called by a table that is not its \
                    neighbour. The pipeline should be considered corrupt \
                    and the application should terminate."
                )
            }
            RouteTableError::TableTypeMismatch { expected, found } => {
                write!(
                    f,
                    "FATAL: Expected a {} table, found a {} table. The \
                    pipeline should be considered corrupt and the \
                    application should terminate.",
                    expected, found
                )
            }
            RouteTableError::MissingParent => {
                write!(
                    f,
                    "FATAL: A table without a parent produced a route \
                    event. The pipeline should be considered corrupt and \
                    the application should terminate."
                )
            }
            RouteTableError::TopologyError => {
                write!(
                    f,
                    "FATAL: Replumbing referred to a link that does not \
                    exist. The pipeline should be considered corrupt and \
                    the application should terminate."
                )
            }
        }
    }
}

/// An error returned by a route filter. Filter errors never travel further
/// than the policy table running the filter: the route is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterError(String);

impl FilterError {
    pub fn new(msg: impl Into<String>) -> Self {
        FilterError(msg.into())
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter error: {}", self.0)
    }
}

impl std::error::Error for FilterError {}
