use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, trace};

use super::{
    Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType,
};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, ProtocolKind, RouteRef};
use crate::AddressFamily;

//------------ ExtIntTable ---------------------------------------------------

/// A table that resolves the nexthops of EGP routes over IGP routes.
///
/// The nexthop of an EGP route is usually not a neighbour of this router.
/// The table looks up the IGP route covering the nexthop (the longest
/// match among the IGP winners that passed through it), and forwards a
/// copy of the EGP route that uses the nexthop and vif of that IGP route.
/// An EGP route whose nexthop no IGP route covers is held back until one
/// shows up. IGP routes pass through unchanged.
///
/// Every change to the IGP routes can move the resolution of any number of
/// EGP routes. Only the change itself is returned to the pipeline, the
/// EGP routes it re-resolves are queued as follow-up events that the
/// pipeline collects with [ExtIntTable::take_followups] and sends up right
/// after it.
pub struct ExtIntTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    parent: Option<TableId>,
    child: Option<TableId>,
    igp: PrefixTrie<AF, RouteRef<AF, M>>,
    egp: PrefixTrie<AF, RouteRef<AF, M>>,
    by_nexthop: BTreeMap<AF, BTreeSet<PrefixId<AF>>>,
    unresolved: BTreeSet<PrefixId<AF>>,
    published: PrefixTrie<AF, RouteRef<AF, M>>,
    followups: Vec<RouteOp<AF, M>>,
}

impl<AF: AddressFamily, M: Meta> ExtIntTable<AF, M> {
    pub(crate) fn new(id: TableId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: None,
            child: None,
            igp: PrefixTrie::new(),
            egp: PrefixTrie::new(),
            by_nexthop: BTreeMap::new(),
            unresolved: BTreeSet::new(),
            published: PrefixTrie::new(),
            followups: vec![],
        }
    }

    /// The route forwarded for `net`, resolved if it is an EGP route.
    pub fn route(&self, net: &PrefixId<AF>) -> Option<&RouteRef<AF, M>> {
        self.published.get(net)
    }

    /// All forwarded routes, in net order.
    pub fn routes(
        &self,
    ) -> impl Iterator<Item = (PrefixId<AF>, &RouteRef<AF, M>)> + '_ {
        self.published.iter()
    }

    /// Whether the EGP route for `net` is held back for lack of a route to
    /// its nexthop.
    pub fn is_unresolved(&self, net: &PrefixId<AF>) -> bool {
        self.unresolved.contains(net)
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// The net of the IGP route the EGP route for `net` resolves over.
    pub fn resolving_net(&self, net: &PrefixId<AF>) -> Option<PrefixId<AF>> {
        let route = self.egp.get(net)?;
        self.igp
            .longest_match_addr(route.nexthop())
            .map(|(resolving, _)| resolving)
    }

    /// The events produced by the last route event, beyond the one it
    /// returned.
    pub(crate) fn take_followups(&mut self) -> Vec<RouteOp<AF, M>> {
        std::mem::take(&mut self.followups)
    }

    fn is_igp(route: &RouteRef<AF, M>) -> bool {
        route.protocol().kind() == ProtocolKind::Igp
    }

    fn store(&mut self, route: &RouteRef<AF, M>) {
        let net = route.net();
        if Self::is_igp(route) {
            self.igp.insert(net, Arc::clone(route));
        } else {
            self.egp.insert(net, Arc::clone(route));
            self.by_nexthop
                .entry(route.nexthop())
                .or_default()
                .insert(net);
        }
    }

    fn forget(&mut self, route: &RouteRef<AF, M>) {
        let net = route.net();
        if Self::is_igp(route) {
            self.igp.remove(&net);
            return;
        }
        self.egp.remove(&net);
        self.unresolved.remove(&net);
        if let Some(nets) = self.by_nexthop.get_mut(&route.nexthop()) {
            nets.remove(&net);
            if nets.is_empty() {
                self.by_nexthop.remove(&route.nexthop());
            }
        }
    }

    /// The route to forward for `route`, or `None` if its nexthop cannot be
    /// resolved.
    fn resolve(&mut self, route: &RouteRef<AF, M>) -> Option<RouteRef<AF, M>> {
        if Self::is_igp(route) {
            return Some(Arc::clone(route));
        }
        let net = route.net();
        match self.igp.longest_match_addr(route.nexthop()) {
            Some((resolving, igp)) => {
                trace!("{} resolves {} over {}", self.name, net, resolving);
                let resolved = Arc::new(route.resolved_over(igp));
                self.unresolved.remove(&net);
                Some(resolved)
            }
            None => {
                if self.unresolved.insert(net) {
                    debug!("{} holds back {}, nexthop unresolved", self.name, net);
                }
                None
            }
        }
    }

    /// Make `new` the route forwarded for `net`, returning the event that
    /// tells the parent.
    fn publish(
        &mut self,
        net: PrefixId<AF>,
        new: Option<RouteRef<AF, M>>,
    ) -> Option<RouteOp<AF, M>> {
        match (self.published.remove(&net), new) {
            (None, None) => None,
            (None, Some(new)) => {
                self.published.insert(net, Arc::clone(&new));
                Some(RouteOp::Add(new))
            }
            (Some(old), None) => Some(RouteOp::Delete(old)),
            (Some(old), Some(new)) => {
                self.published.insert(net, Arc::clone(&new));
                Some(RouteOp::Replace { old, new })
            }
        }
    }

    /// Resolve again every EGP route whose nexthop lies inside `net`, after
    /// the IGP route for `net` changed.
    fn reresolve(&mut self, net: &PrefixId<AF>) {
        let affected: Vec<PrefixId<AF>> = self
            .by_nexthop
            .range(net.first_addr()..=net.last_addr())
            .flat_map(|(_, nets)| nets.iter().copied())
            .collect();
        for egp_net in affected {
            let Some(route) = self.egp.get(&egp_net).cloned() else {
                continue;
            };
            let new = self.resolve(&route);
            let unchanged = match (self.published.get(&egp_net), &new) {
                (None, None) => true,
                (Some(old), Some(new)) => {
                    old == new && old.genid() == new.genid()
                }
                _ => false,
            };
            if unchanged {
                continue;
            }
            if let Some(op) = self.publish(egp_net, new) {
                trace!("{} re-resolved: {}", self.name, op);
                self.followups.push(op);
            }
        }
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for ExtIntTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::ExtInt
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
        let net = route.net();
        self.store(&route);
        let new = self.resolve(&route);
        let op = self.publish(net, new);
        if Self::is_igp(&route) {
            self.reresolve(&net);
        }
        Ok(op)
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        let net = route.net();
        self.forget(&route);
        let op = self.publish(net, None);
        if Self::is_igp(&route) {
            self.reresolve(&net);
        }
        Ok(op)
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        let net = new.net();
        self.forget(&old);
        self.store(&new);
        let resolved = self.resolve(&new);
        let op = self.publish(net, resolved);
        if Self::is_igp(&old) || Self::is_igp(&new) {
            self.reresolve(&net);
        }
        Ok(op)
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
        Lookup::found(self.published.get(net).cloned())
    }

    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(
            self.published
                .longest_match_addr(addr)
                .map(|(_, r)| Arc::clone(r)),
        )
    }

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup::found(Some(
            self.published.route_range(addr).map(|(_, r)| Arc::clone(r)),
        ))
    }

    fn route_count(&self) -> usize {
        self.published.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_types::{addr, prefix, route_v4, BgpAttributes};
    use crate::types::{RouteEntry, Vif, CONNECTED};
    use crate::IPv4;

    type Route = RouteRef<IPv4, BgpAttributes>;

    const CHILD: TableId = TableId(1);

    fn table() -> ExtIntTable<IPv4, BgpAttributes> {
        let mut t = ExtIntTable::new(TableId(2), "extint");
        t.add_child(CHILD, None).unwrap();
        t.set_parent(Some(TableId(3)));
        t
    }

    fn igp(net: &str, nexthop: &str, vif: &str) -> Route {
        let ospf = Protocol::new("ospf", ProtocolKind::Igp);
        Arc::new(route_v4(net, nexthop, &ospf, 100).with_vif(Vif::new(vif)))
    }

    fn egp(net: &str, nexthop: &str) -> Route {
        let ebgp = Protocol::new("ebgp", ProtocolKind::Egp);
        Arc::new(route_v4(net, nexthop, &ebgp, 100).with_metric(7))
    }

    fn added(op: Option<RouteOp<IPv4, BgpAttributes>>) -> Route {
        op.and_then(|op| match op {
            RouteOp::Add(route) => Some(route),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn resolves_over_the_covering_igp_route() {
        let mut t = table();
        t.add_route(igp("192.0.2.0/24", "10.0.0.1", "eth0"), CHILD)
            .unwrap();
        let route = added(
            t.add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD).unwrap(),
        );

        assert_eq!(route.nexthop(), addr::<IPv4>("10.0.0.1"));
        assert_eq!(route.vif().map(|v| v.name()), Some("eth0"));
        assert_eq!(route.protocol().name(), "ebgp");
        assert_eq!(route.metric(), 7);
        assert_eq!(
            t.resolving_net(&prefix("198.51.100.0/24")),
            Some(prefix("192.0.2.0/24"))
        );
        assert!(t.take_followups().is_empty());
    }

    #[test]
    fn connected_subnet_keeps_the_nexthop() {
        let mut t = table();
        let connected = Protocol::new(CONNECTED, ProtocolKind::Igp);
        let subnet: RouteEntry<IPv4, BgpAttributes> =
            route_v4("192.0.2.0/24", "192.0.2.1", &connected, 0)
                .with_vif(Vif::new("eth1"));
        t.add_route(Arc::new(subnet), CHILD).unwrap();

        let route = added(
            t.add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD).unwrap(),
        );
        assert_eq!(route.nexthop(), addr::<IPv4>("192.0.2.7"));
        assert_eq!(route.vif().map(|v| v.name()), Some("eth1"));
    }

    #[test]
    fn unresolved_until_an_igp_route_shows_up() {
        let mut t = table();
        let op = t
            .add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD)
            .unwrap();
        assert_eq!(op, None);
        assert!(t.is_unresolved(&prefix("198.51.100.0/24")));
        assert_eq!(t.route_count(), 0);

        let op = t
            .add_route(igp("192.0.0.0/16", "10.0.0.1", "eth0"), CHILD)
            .unwrap();
        assert!(op.unwrap().is_add());
        let followups = t.take_followups();
        assert_eq!(followups.len(), 1);
        let op = followups.first().unwrap();
        assert!(op.is_add());
        assert_eq!(op.net(), prefix("198.51.100.0/24"));
        assert_eq!(t.unresolved_count(), 0);
    }

    #[test]
    fn withdrawn_igp_route_unresolves() {
        let mut t = table();
        let ospf = igp("192.0.2.0/24", "10.0.0.1", "eth0");
        t.add_route(Arc::clone(&ospf), CHILD).unwrap();
        t.add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD).unwrap();

        let op = t.delete_route(ospf, CHILD).unwrap();
        assert!(op.unwrap().is_delete());
        let followups = t.take_followups();
        assert_eq!(followups.len(), 1);
        assert!(followups.first().unwrap().is_delete());
        assert!(t.is_unresolved(&prefix("198.51.100.0/24")));
        assert_eq!(t.lookup_route(&prefix("198.51.100.0/24")).found, None);

        // Withdrawing a held back route is silent.
        let op = t
            .delete_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD)
            .unwrap();
        assert_eq!(op, None);
        assert_eq!(t.unresolved_count(), 0);
    }

    #[test]
    fn more_specific_igp_route_takes_over() {
        let mut t = table();
        t.add_route(igp("192.0.0.0/16", "10.0.0.1", "eth0"), CHILD)
            .unwrap();
        t.add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD).unwrap();
        t.add_route(egp("203.0.113.0/24", "192.0.9.1"), CHILD).unwrap();

        t.add_route(igp("192.0.2.0/24", "10.0.0.2", "eth1"), CHILD)
            .unwrap();
        let followups = t.take_followups();
        assert_eq!(followups.len(), 1);
        let (old, new) = followups
            .first()
            .and_then(|op| match op {
                RouteOp::Replace { old, new } => Some((old, new)),
                _ => None,
            })
            .unwrap();
        assert_eq!(old.nexthop(), addr::<IPv4>("10.0.0.1"));
        assert_eq!(new.nexthop(), addr::<IPv4>("10.0.0.2"));
        assert_eq!(new.net(), prefix("198.51.100.0/24"));
        assert_eq!(
            t.route(&prefix("203.0.113.0/24")).map(|r| r.nexthop()),
            Some(addr("10.0.0.1"))
        );
    }

    #[test]
    fn egp_routes_never_resolve_over_each_other() {
        let mut t = table();
        t.add_route(egp("192.0.2.0/24", "10.0.0.1"), CHILD).unwrap();
        let op = t
            .add_route(egp("198.51.100.0/24", "192.0.2.7"), CHILD)
            .unwrap();
        assert_eq!(op, None);
        assert_eq!(t.unresolved_count(), 2);
    }

    #[test]
    fn refuses_unknown_callers() {
        let mut t = table();
        assert_eq!(
            t.add_route(egp("198.51.100.0/24", "192.0.2.7"), TableId(9)),
            Err(RouteTableError::UnknownCaller)
        );
    }
}
