use std::sync::Arc;

use log::{debug, trace};

use super::{Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteRef};
use crate::AddressFamily;

//------------ DeletionState -------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeletionState {
    /// Routes are still pending deletion.
    Active,
    /// Nothing is pending any more, the table waits to be unplumbed. Once
    /// unplumbed it is dropped, and its id is no longer valid.
    Empty,
}

//------------ DeletionTable -------------------------------------------------

/// A transient table that withdraws the routes of a protocol instance that
/// shut down, a bounded batch per background pass.
///
/// The table sits between the origin table of the protocol and the origin's
/// former parent. If the protocol comes back and re-announces a net that is
/// still pending deletion, the net is taken out of the pending set and the
/// announcement travels upward as a replace of the stale route, so the
/// background passes never withdraw it.
pub struct DeletionTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    protocol: Protocol,
    parent: Option<TableId>,
    child: Option<TableId>,
    pending: PrefixTrie<AF, RouteRef<AF, M>>,
    state: DeletionState,
    deleted: usize,
}

impl<AF: AddressFamily, M: Meta> DeletionTable<AF, M> {
    pub(crate) fn new(
        id: TableId,
        protocol: Protocol,
        pending: PrefixTrie<AF, RouteRef<AF, M>>,
    ) -> Self {
        let state = if pending.is_empty() {
            DeletionState::Empty
        } else {
            DeletionState::Active
        };
        debug!(
            "deletion table {} for {} with {} routes",
            id,
            protocol,
            pending.len()
        );
        Self {
            id,
            name: format!("deletion-{}-{}", protocol.name(), protocol.genid()),
            protocol,
            parent: None,
            child: None,
            pending,
            state,
            deleted: 0,
        }
    }

    /// The protocol (generation) whose routes this table withdraws.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn state(&self) -> DeletionState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The number of routes withdrawn by background passes so far.
    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub fn is_pending(&self, net: &PrefixId<AF>) -> bool {
        self.pending.contains(net)
    }

    /// Withdraw at most `batch` pending routes, lowest nets first.
    pub fn background_deletion_pass(
        &mut self,
        batch: usize,
    ) -> Vec<RouteOp<AF, M>> {
        let mut ops = vec![];
        while ops.len() < batch {
            let Some((_, route)) = self.pending.pop_first() else {
                break;
            };
            trace!("{} withdraws {}", self.name, route.net());
            ops.push(RouteOp::Delete(route));
        }
        self.deleted += ops.len();
        self.update_state();
        ops
    }

    fn update_state(&mut self) {
        if self.state == DeletionState::Active && self.pending.is_empty() {
            self.state = DeletionState::Empty;
        }
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for DeletionTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Deletion
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

        match self.pending.remove(&route.net()) {
            Some(old) => {
                debug!(
                    "{} re-announced while pending deletion: {}",
                    self.name,
                    route.net()
                );
                self.update_state();
                Ok(Some(RouteOp::Replace { old, new: route }))
            }
            None => Ok(Some(RouteOp::Add(route))),
        }
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        Ok(Some(RouteOp::Delete(route)))
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        Ok(Some(RouteOp::Replace { old, new }))
    }

    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError> {
        self.check_caller(self.child, caller)?;
        Ok(Some(signal))
    }

    fn lookup_route(&self, net: &PrefixId<AF>) -> Lookup<RouteRef<AF, M>> {
        match self.pending.get(net) {
            Some(route) => Lookup::found(Some(Arc::clone(route))),
            None => Lookup::delegate(self.child),
        }
    }

    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup {
            found: self
                .pending
                .longest_match_addr(addr)
                .map(|(_, r)| Arc::clone(r)),
            delegate: self.child,
        }
    }

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup {
            found: Some(
                self.pending.route_range(addr).map(|(_, r)| Arc::clone(r)),
            ),
            delegate: self.child,
        }
    }

    fn route_count(&self) -> usize {
        self.pending.len()
    }
}
