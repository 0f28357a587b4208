//! The route tables that make up a pipeline.
//!
//! Every table implements [RouteTable]. Route events enter a pipeline at an
//! origin table and travel towards the top of the pipeline: each table
//! consumes one event from one of its children (the `caller`) and hands at
//! most one event to its parent. The exception is the [ExtIntTable], where
//! one IGP change can re-resolve many EGP routes: those extra events are
//! queued in the table and sent up right after the first. The tables do not call each other: they
//! return the outgoing event, and the owning
//! [Pipeline](crate::rib::pipeline::Pipeline) hands it to the parent. This
//! keeps propagation iterative, and lets a table be replumbed between any
//! two events.
//!
//! Lookups flow the other way. A table answers from its own storage, or
//! names the child the question should be delegated to.
use std::fmt;

use crate::trie::RouteRange;
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteRef};
use crate::AddressFamily;

mod debug;
mod decision;
mod deletion;
mod dump;
mod extint;
mod origin;
mod policy;
mod redist;
mod register;

pub use debug::{DebugEvent, DebugTable};
pub use decision::{BranchId, DecisionTable, DumpStep, TieBreaker};
pub use deletion::{DeletionState, DeletionTable};
pub use dump::DumpIterator;
pub use extint::ExtIntTable;
pub use origin::OriginTable;
pub use policy::{
    accept_all, FilterVerdict, PolicyTable, PushStep, RouteFilter,
    RouteModification,
};
pub use redist::{
    ConsumerId, NotifyingConsumer, RedistTable, RouteConsumer, RouteNotifier,
};
pub use register::{RegisterTable, RouteRegister};

//------------ TableId -------------------------------------------------------

/// The identity of a table inside its pipeline. Ids are never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//------------ TableType -----------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableType {
    Origin,
    Policy,
    Decision,
    Deletion,
    ExtInt,
    Register,
    Redist,
    Debug,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Origin => write!(f, "origin"),
            TableType::Policy => write!(f, "policy"),
            TableType::Decision => write!(f, "decision"),
            TableType::Deletion => write!(f, "deletion"),
            TableType::ExtInt => write!(f, "extint"),
            TableType::Register => write!(f, "register"),
            TableType::Redist => write!(f, "redist"),
            TableType::Debug => write!(f, "debug"),
        }
    }
}

//------------ RouteOp -------------------------------------------------------

/// A route event travelling up the pipeline.
///
/// A `Replace` is a single event: no table downstream of it ever observes
/// the destination as absent in between the old and the new route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOp<AF: AddressFamily, M: Meta> {
    Add(RouteRef<AF, M>),
    Delete(RouteRef<AF, M>),
    Replace {
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
    },
}

impl<AF: AddressFamily, M: Meta> RouteOp<AF, M> {
    pub fn net(&self) -> PrefixId<AF> {
        match self {
            RouteOp::Add(route) | RouteOp::Delete(route) => route.net(),
            RouteOp::Replace { new, .. } => new.net(),
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, RouteOp::Add(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RouteOp::Delete(_))
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, RouteOp::Replace { .. })
    }
}

impl<AF: AddressFamily, M: Meta> fmt::Display for RouteOp<AF, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteOp::Add(route) => write!(f, "add {}", route),
            RouteOp::Delete(route) => write!(f, "delete {}", route),
            RouteOp::Replace { old, new } => {
                write!(f, "replace {} with {}", old, new)
            }
        }
    }
}

//------------ Signal --------------------------------------------------------

/// Protocol lifecycle signals, travelling up the pipeline alongside route
/// events. Each carries the protocol with the generation it applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The protocol instance went away; its routes are being withdrawn in
    /// the background and must no longer win any decision.
    PeeringWentDown(Protocol),
    /// All routes of the instance that went down have been withdrawn.
    PeeringDownComplete(Protocol),
    /// A (new generation of the) protocol instance is feeding routes.
    PeeringCameUp(Protocol),
}

impl Signal {
    pub fn protocol(&self) -> &Protocol {
        match self {
            Signal::PeeringWentDown(p)
            | Signal::PeeringDownComplete(p)
            | Signal::PeeringCameUp(p) => p,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::PeeringWentDown(p) => write!(f, "peering went down {}", p),
            Signal::PeeringDownComplete(p) => {
                write!(f, "peering down complete {}", p)
            }
            Signal::PeeringCameUp(p) => write!(f, "peering came up {}", p),
        }
    }
}

//------------ Lookup --------------------------------------------------------

/// The answer of one table to a lookup: what it found in its own storage,
/// and the child (if any) that should be asked as well.
#[derive(Debug)]
pub struct Lookup<T> {
    pub found: Option<T>,
    pub delegate: Option<TableId>,
}

impl<T> Lookup<T> {
    pub fn found(found: Option<T>) -> Self {
        Self {
            found,
            delegate: None,
        }
    }

    pub fn delegate(child: Option<TableId>) -> Self {
        Self {
            found: None,
            delegate: child,
        }
    }
}

pub type RouteOpResult<AF, M> =
    Result<Option<RouteOp<AF, M>>, RouteTableError>;

//------------ RouteTable (trait) --------------------------------------------

/// The contract every table in a pipeline implements.
///
/// The mutating methods take the `caller`: the id of the neighbour that
/// handed in the event. A table only accepts events from its own children
/// (an origin table from itself, standing in for its protocol), anything
/// else is a fatal [RouteTableError::UnknownCaller].
pub trait RouteTable<AF: AddressFamily, M: Meta> {
    fn id(&self) -> TableId;

    fn name(&self) -> &str;

    fn table_type(&self) -> TableType;

    fn parent(&self) -> Option<TableId>;

    fn set_parent(&mut self, parent: Option<TableId>);

    /// The single child of a linear table. Origin tables have none, and
    /// decision tables have many, so both return `None`.
    fn child(&self) -> Option<TableId>;

    /// Redirect the parent link from `old_parent` to `new_parent`.
    fn replumb(
        &mut self,
        old_parent: TableId,
        new_parent: TableId,
    ) -> Result<(), RouteTableError> {
        if self.parent() != Some(old_parent) {
            return Err(RouteTableError::TopologyError);
        }
        self.set_parent(Some(new_parent));
        Ok(())
    }

    /// Register `child` as a new child. `protocol` is the protocol feeding
    /// the chain below `child`, if there is one.
    fn add_child(
        &mut self,
        child: TableId,
        protocol: Option<&Protocol>,
    ) -> Result<(), RouteTableError>;

    /// Swap the child `old` for `new`, keeping all state associated with it.
    fn replace_child(
        &mut self,
        old: TableId,
        new: TableId,
    ) -> Result<(), RouteTableError>;

    fn add_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M>;

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M>;

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M>;

    /// Handle a lifecycle signal, returning the signal to pass on to the
    /// parent, if any.
    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError>;

    /// Exact match lookup.
    fn lookup_route(&self, net: &PrefixId<AF>) -> Lookup<RouteRef<AF, M>>;

    /// Longest-prefix match lookup.
    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>>;

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>>;

    /// The number of routes this table stores itself.
    fn route_count(&self) -> usize;

    fn check_caller(
        &self,
        expected: Option<TableId>,
        caller: TableId,
    ) -> Result<(), RouteTableError> {
        if expected == Some(caller) {
            Ok(())
        } else {
            log::error!(
                "table {} ({}) called by unknown table {}",
                self.name(),
                self.id(),
                caller
            );
            Err(RouteTableError::UnknownCaller)
        }
    }
}

//------------ Table ---------------------------------------------------------

/// The closed set of table kinds a pipeline is built from.
pub(crate) enum Table<AF: AddressFamily, M: Meta> {
    Origin(OriginTable<AF, M>),
    Policy(PolicyTable<AF, M>),
    Decision(DecisionTable<AF, M>),
    Deletion(DeletionTable<AF, M>),
    ExtInt(ExtIntTable<AF, M>),
    Register(RegisterTable<AF, M>),
    Redist(RedistTable<AF, M>),
    Debug(DebugTable<AF, M>),
}

impl<AF: AddressFamily, M: Meta> Table<AF, M> {
    pub(crate) fn as_route_table(&self) -> &dyn RouteTable<AF, M> {
        match self {
            Table::Origin(t) => t,
            Table::Policy(t) => t,
            Table::Decision(t) => t,
            Table::Deletion(t) => t,
            Table::ExtInt(t) => t,
            Table::Register(t) => t,
            Table::Redist(t) => t,
            Table::Debug(t) => t,
        }
    }

    pub(crate) fn as_route_table_mut(
        &mut self,
    ) -> &mut dyn RouteTable<AF, M> {
        match self {
            Table::Origin(t) => t,
            Table::Policy(t) => t,
            Table::Decision(t) => t,
            Table::Deletion(t) => t,
            Table::ExtInt(t) => t,
            Table::Register(t) => t,
            Table::Redist(t) => t,
            Table::Debug(t) => t,
        }
    }

    pub(crate) fn table_type(&self) -> TableType {
        self.as_route_table().table_type()
    }

    /// Hand one route event to this table.
    pub(crate) fn apply(
        &mut self,
        op: RouteOp<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        let table = self.as_route_table_mut();
        match op {
            RouteOp::Add(route) => table.add_route(route, caller),
            RouteOp::Delete(route) => table.delete_route(route, caller),
            RouteOp::Replace { old, new } => {
                table.replace_route(old, new, caller)
            }
        }
    }

    /// The events the last `apply` produced beyond the one it returned.
    pub(crate) fn take_followups(&mut self) -> Vec<RouteOp<AF, M>> {
        match self {
            Table::ExtInt(t) => t.take_followups(),
            _ => vec![],
        }
    }
}

table_accessors! {
    Origin, OriginTable, as_origin, as_origin_mut;
    Policy, PolicyTable, as_policy, as_policy_mut;
    Decision, DecisionTable, as_decision, as_decision_mut;
    Deletion, DeletionTable, as_deletion, as_deletion_mut;
    ExtInt, ExtIntTable, as_extint, as_extint_mut;
    Register, RegisterTable, as_register, as_register_mut;
    Redist, RedistTable, as_redist, as_redist_mut;
    Debug, DebugTable, as_debug, as_debug_mut
}
