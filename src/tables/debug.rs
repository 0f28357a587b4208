use std::fmt;

use log::debug;

use super::{Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::RouteRange;
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteRef};
use crate::AddressFamily;

//------------ DebugEvent ----------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugEvent<AF: AddressFamily, M: Meta> {
    Route(RouteOp<AF, M>),
    Signal(Signal),
}

impl<AF: AddressFamily, M: Meta> fmt::Display for DebugEvent<AF, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugEvent::Route(op) => write!(f, "{}", op),
            DebugEvent::Signal(signal) => write!(f, "{}", signal),
        }
    }
}

//------------ DebugTable ----------------------------------------------------

/// Records every event passing through it. Without a parent it is a sink,
/// with one it forwards everything unchanged.
pub struct DebugTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    parent: Option<TableId>,
    child: Option<TableId>,
    events: Vec<DebugEvent<AF, M>>,
}

impl<AF: AddressFamily, M: Meta> DebugTable<AF, M> {
    pub(crate) fn new(id: TableId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: None,
            child: None,
            events: vec![],
        }
    }

    pub fn events(&self) -> &[DebugEvent<AF, M>] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<DebugEvent<AF, M>> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn record(&mut self, op: RouteOp<AF, M>) -> RouteOpResult<AF, M> {
        debug!("{}: {}", self.name, op);
        self.events.push(DebugEvent::Route(op.clone()));
        Ok(self.parent.map(|_| op))
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for DebugTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Debug
    }

    fn parent(&self) -> Option<TableId> {
        self.parent
    }

    fn set_parent(&mut self, parent: Option<TableId>) {
        self.parent = parent;
    }

    fn child(&self) -> Option<TableId> {
        self.child
    }

    fn add_child(
        &mut self,
        child: TableId,
        _protocol: Option<&Protocol>,
    ) -> Result<(), RouteTableError> {
        if self.child.is_some() {
            return Err(RouteTableError::TopologyError);
        }
        self.child = Some(child);
        Ok(())
    }

    fn replace_child(
        &mut self,
        old: TableId,
        new: TableId,
    ) -> Result<(), RouteTableError> {
        if self.child != Some(old) {
            return Err(RouteTableError::TopologyError);
        }
        self.child = Some(new);
        Ok(())
    }

    fn add_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        self.record(RouteOp::Add(route))
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        self.record(RouteOp::Delete(route))
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        self.record(RouteOp::Replace { old, new })
    }

    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError> {
        self.check_caller(self.child, caller)?;
        debug!("{}: {}", self.name, signal);
        self.events.push(DebugEvent::Signal(signal.clone()));
        Ok(self.parent.map(|_| signal))
    }

    fn lookup_route(&self, _net: &PrefixId<AF>) -> Lookup<RouteRef<AF, M>> {
        Lookup::delegate(self.child)
    }

    fn lookup_route_addr(&self, _addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup::delegate(self.child)
    }

    fn lookup_route_range(
        &self,
        _addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup::delegate(self.child)
    }

    fn route_count(&self) -> usize {
        0
    }
}
