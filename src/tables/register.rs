use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use super::{
    Lookup, RouteNotifier, RouteOp, RouteOpResult, RouteTable, Signal,
    TableId, TableType,
};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteRef};
use crate::AddressFamily;

//------------ RouteRegister -------------------------------------------------

/// The interest of one or more clients in the route for an address.
///
/// The answer to a lookup for an address holds for a whole range of
/// addresses around it. A registration covers the largest subnet of that
/// range that contains the address: the `valid_subnet`. As long as the
/// registration exists, every address in the subnet resolves to `route`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRegister<AF: AddressFamily, M: Meta> {
    valid_subnet: PrefixId<AF>,
    route: Option<RouteRef<AF, M>>,
    modules: BTreeSet<String>,
}

impl<AF: AddressFamily, M: Meta> RouteRegister<AF, M> {
    pub fn valid_subnet(&self) -> PrefixId<AF> {
        self.valid_subnet
    }

    /// The route every address in the valid subnet resolves to, if any.
    pub fn route(&self) -> Option<&RouteRef<AF, M>> {
        self.route.as_ref()
    }

    /// The names of the clients that registered.
    pub fn modules(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(String::as_str)
    }

    // Whether a new route for `net` changes the answer somewhere in the
    // valid subnet.
    fn is_shadowed_by(&self, net: &PrefixId<AF>) -> bool {
        let overlaps =
            net.covers(&self.valid_subnet) || self.valid_subnet.covers(net);
        overlaps
            && self.route.as_ref().map_or(true, |r| r.net().len() < net.len())
    }

    fn resolves_to(&self, net: &PrefixId<AF>) -> bool {
        self.route.as_ref().is_some_and(|r| r.net() == *net)
    }
}

impl<AF: AddressFamily, M: Meta> fmt::Display for RouteRegister<AF, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> ", self.valid_subnet)?;
        match &self.route {
            Some(route) => write!(f, "{}", route.net())?,
            None => write!(f, "no route")?,
        }
        write!(f, " ({} modules)", self.modules.len())
    }
}

//------------ RegisterTable -------------------------------------------------

/// A table that tracks which clients are interested in the routes for
/// which addresses, and tells them when the answer changes.
///
/// Route events pass through unchanged. On the way, every registration
/// whose answer they affect is dealt with: a changed route for the same
/// net is reported with `send_route_changed` and the registration stays,
/// anything that moves the boundaries of the valid subnet (a new more
/// specific route, the route going away) invalidates it with
/// `send_invalidate`. An invalidated registration is dropped, the client is
/// expected to register again.
pub struct RegisterTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    parent: Option<TableId>,
    child: Option<TableId>,
    multicast: bool,
    registrations: PrefixTrie<AF, RouteRegister<AF, M>>,
    server: Option<Box<dyn RouteNotifier<AF>>>,
}

impl<AF: AddressFamily, M: Meta> RegisterTable<AF, M> {
    pub(crate) fn new(id: TableId, name: &str, multicast: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: None,
            child: None,
            multicast,
            registrations: PrefixTrie::new(),
            server: None,
        }
    }

    /// Set where notifications to registered clients go. Until there is a
    /// server, they are dropped.
    pub fn set_server(&mut self, server: Box<dyn RouteNotifier<AF>>) {
        self.server = Some(server);
    }

    pub fn registration(
        &self,
        valid_subnet: &PrefixId<AF>,
    ) -> Option<&RouteRegister<AF, M>> {
        self.registrations.get(valid_subnet)
    }

    pub fn registrations(
        &self,
    ) -> impl Iterator<Item = &RouteRegister<AF, M>> + '_ {
        self.registrations.iter().map(|(_, r)| r)
    }

    /// Register the interest of `module` in the route answering `range`.
    pub(crate) fn register_route_range(
        &mut self,
        range: RouteRange<AF, RouteRef<AF, M>>,
        module: &str,
    ) -> RouteRegister<AF, M> {
        let valid_subnet = range.minimal_net();
        let mut registration = self
            .registrations
            .remove(&valid_subnet)
            .unwrap_or_else(|| RouteRegister {
                valid_subnet,
                route: range.into_route(),
                modules: BTreeSet::new(),
            });
        registration.modules.insert(module.to_string());
        debug!("{} registered {}: {}", self.name, module, registration);
        self.registrations.insert(valid_subnet, registration.clone());
        registration
    }

    /// Withdraw the interest of `module` in `valid_subnet`.
    pub(crate) fn deregister_route_range(
        &mut self,
        valid_subnet: &PrefixId<AF>,
        module: &str,
    ) -> Result<(), RouteTableError> {
        let registration = self
            .registrations
            .get_mut(valid_subnet)
            .ok_or(RouteTableError::RegistrationNotFound)?;
        if !registration.modules.remove(module) {
            return Err(RouteTableError::RegistrationNotFound);
        }
        debug!("{} deregistered {} for {}", self.name, module, valid_subnet);
        if registration.modules.is_empty() {
            self.registrations.remove(valid_subnet);
        }
        Ok(())
    }

    fn invalidate(&mut self, subnets: Vec<PrefixId<AF>>) {
        for subnet in subnets {
            let Some(registration) = self.registrations.remove(&subnet) else {
                continue;
            };
            trace!("{} invalidates {}", self.name, registration);
            let Some(server) = self.server.as_mut() else {
                continue;
            };
            for module in &registration.modules {
                server.send_invalidate(module, subnet, self.multicast);
            }
        }
    }

    fn route_added(&mut self, route: &RouteRef<AF, M>) {
        let net = route.net();
        let mut shadowed: Vec<PrefixId<AF>> = self
            .registrations
            .covered_by(&net)
            .filter(|(_, r)| r.is_shadowed_by(&net))
            .map(|(subnet, _)| subnet)
            .collect();
        if let Some((subnet, r)) = self.registrations.longest_match(&net) {
            if subnet != net && r.is_shadowed_by(&net) {
                shadowed.push(subnet);
            }
        }
        self.invalidate(shadowed);
    }

    fn route_deleted(&mut self, route: &RouteRef<AF, M>) {
        let net = route.net();
        let gone = self
            .registrations
            .covered_by(&net)
            .filter(|(_, r)| r.resolves_to(&net))
            .map(|(subnet, _)| subnet)
            .collect();
        self.invalidate(gone);
    }

    fn route_replaced(&mut self, new: &RouteRef<AF, M>) {
        let net = new.net();
        let changed: Vec<PrefixId<AF>> = self
            .registrations
            .covered_by(&net)
            .filter(|(_, r)| r.resolves_to(&net))
            .map(|(subnet, _)| subnet)
            .collect();
        for subnet in changed {
            let Some(registration) = self.registrations.get_mut(&subnet)
            else {
                continue;
            };
            registration.route = Some(Arc::clone(new));
            let Some(server) = self.server.as_mut() else {
                continue;
            };
            for module in &registration.modules {
                server.send_route_changed(
                    module,
                    subnet,
                    new.nexthop(),
                    new.metric(),
                    new.admin_distance(),
                    new.protocol().name(),
                    self.multicast,
                );
            }
        }
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for RegisterTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Register
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
        self.route_added(&route);
        Ok(Some(RouteOp::Add(route)))
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        self.route_deleted(&route);
        Ok(Some(RouteOp::Delete(route)))
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        self.route_replaced(&new);
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

    /// The number of registrations.
    fn route_count(&self) -> usize {
        self.registrations.len()
    }
}
