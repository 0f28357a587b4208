use std::sync::Arc;

use log::{debug, info, trace};

use super::{Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteEntry, RouteRef};
use crate::AddressFamily;

//------------ OriginTable ---------------------------------------------------

/// The leaf of a pipeline, holding the routes of exactly one protocol.
///
/// Routes are stamped with the table's protocol (so with its current
/// generation) and administrative distance when they are originated, and
/// forwarded upward unconditionally.
pub struct OriginTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    protocol: Protocol,
    admin_distance: u16,
    parent: Option<TableId>,
    routes: PrefixTrie<AF, RouteRef<AF, M>>,
}

impl<AF: AddressFamily, M: Meta> OriginTable<AF, M> {
    pub(crate) fn new(
        id: TableId,
        name: &str,
        protocol: Protocol,
        admin_distance: u16,
    ) -> Self {
        info!(
            "origin table {} ({}) created for {}, admin distance {}",
            name, id, protocol, admin_distance
        );
        Self {
            id,
            name: name.to_string(),
            protocol,
            admin_distance,
            parent: None,
            routes: PrefixTrie::new(),
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn genid(&self) -> u32 {
        self.protocol.genid()
    }

    pub fn admin_distance(&self) -> u16 {
        self.admin_distance
    }

    /// Turn an entry handed in by the protocol into a route of this table.
    pub fn originate(&self, entry: RouteEntry<AF, M>) -> RouteRef<AF, M> {
        Arc::new(
            entry
                .with_protocol(self.protocol.clone())
                .with_admin_distance(self.admin_distance),
        )
    }

    pub fn route(&self, net: &PrefixId<AF>) -> Option<&RouteRef<AF, M>> {
        self.routes.get(net)
    }

    pub fn routes(
        &self,
    ) -> impl Iterator<Item = (PrefixId<AF>, &RouteRef<AF, M>)> + '_ {
        self.routes.iter()
    }

    /// Hand the whole trie over to the caller, in constant time, leaving
    /// this table empty. The returned protocol carries the generation the
    /// routes belong to, routes originated from now on belong to the next
    /// one.
    pub(crate) fn routing_protocol_shutdown(
        &mut self,
    ) -> (PrefixTrie<AF, RouteRef<AF, M>>, Protocol) {
        info!(
            "routing protocol shutdown {} with {} routes",
            self.protocol,
            self.routes.len()
        );
        let down = self.protocol.clone();
        self.protocol.increment_genid();
        (self.routes.take(), down)
    }

    /// Start a new generation. Routes of older generations stay in place
    /// until they are re-announced, deleted or swept.
    pub(crate) fn routing_protocol_restart(&mut self) -> Protocol {
        self.protocol.increment_genid();
        info!("routing protocol restart {}", self.protocol);
        self.protocol.clone()
    }

    /// Examine at most `budget` routes after `after`, returning the ones
    /// that belong to an older generation than `genid`, the last net
    /// examined, and whether the end of the trie was reached.
    pub(crate) fn stale_routes(
        &self,
        genid: u32,
        after: Option<PrefixId<AF>>,
        budget: usize,
    ) -> (Vec<RouteRef<AF, M>>, Option<PrefixId<AF>>, bool) {
        let mut stale = vec![];
        let mut last = after;
        let mut examined = 0;
        for (net, route) in self.routes.iter_after(after).take(budget) {
            examined += 1;
            last = Some(net);
            if route.genid() != genid {
                stale.push(Arc::clone(route));
            }
        }
        debug!(
            "stale sweep {}: examined {}, {} stale",
            self.protocol,
            examined,
            stale.len()
        );
        (stale, last, examined < budget)
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for OriginTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Origin
    }

    fn parent(&self) -> Option<TableId> {
        self.parent
    }

    fn set_parent(&mut self, parent: Option<TableId>) {
        self.parent = parent;
    }

    fn child(&self) -> Option<TableId> {
        None
    }

    fn add_child(
        &mut self,
        _child: TableId,
        _protocol: Option<&Protocol>,
    ) -> Result<(), RouteTableError> {
        Err(RouteTableError::TopologyError)
    }

    fn replace_child(
        &mut self,
        _old: TableId,
        _new: TableId,
    ) -> Result<(), RouteTableError> {
        Err(RouteTableError::TopologyError)
    }

    fn add_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(Some(self.id), caller)?;
        trace!("{} add {}", self.name, route);
        match self.routes.insert(route.net(), Arc::clone(&route)) {
            Some(old) => Ok(Some(RouteOp::Replace { old, new: route })),
            None => Ok(Some(RouteOp::Add(route))),
        }
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(Some(self.id), caller)?;
        trace!("{} delete {}", self.name, route.net());
        self.routes
            .remove(&route.net())
            .map(|old| Some(RouteOp::Delete(old)))
            .ok_or(RouteTableError::RouteNotFound)
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(Some(self.id), caller)?;
        if old.net() != new.net() || !self.routes.contains(&old.net()) {
            return Err(RouteTableError::RouteNotFound);
        }
        trace!("{} replace {}", self.name, new);
        let old = self
            .routes
            .insert(new.net(), Arc::clone(&new))
            .unwrap_or(old);
        Ok(Some(RouteOp::Replace { old, new }))
    }

    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError> {
        self.check_caller(Some(self.id), caller)?;
        Ok(Some(signal))
    }

    fn lookup_route(&self, net: &PrefixId<AF>) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(self.routes.get(net).cloned())
    }

    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(
            self.routes
                .longest_match_addr(addr)
                .map(|(_, r)| Arc::clone(r)),
        )
    }

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup::found(Some(
            self.routes.route_range(addr).map(|(_, r)| Arc::clone(r)),
        ))
    }

    fn route_count(&self) -> usize {
        self.routes.len()
    }
}
