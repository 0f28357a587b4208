use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use serde_derive::{Deserialize, Serialize};

use super::dump::DumpIterator;
use super::{Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteEntry, RouteRef};
use crate::AddressFamily;

//------------ TieBreaker ----------------------------------------------------

/// One criterion of the ordered chain the decision table uses to pick a
/// winner among the candidate routes for a net.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreaker {
    /// Higher local preference wins. A route without one counts as 0.
    LocalPreference,
    /// Lower metric wins.
    Metric,
    /// Lower administrative distance wins.
    AdminDistance,
    /// Lower nexthop address wins.
    Nexthop,
    /// Newer protocol generation wins.
    Generation,
    /// Lexicographically lower protocol name wins.
    ProtocolName,
}

impl TieBreaker {
    /// Compare two candidates, `Ordering::Less` meaning `a` is better.
    pub fn compare<AF: AddressFamily, M: Meta>(
        &self,
        a: &RouteEntry<AF, M>,
        b: &RouteEntry<AF, M>,
    ) -> Ordering {
        match self {
            TieBreaker::LocalPreference => {
                let lp = |r: &RouteEntry<AF, M>| {
                    r.attributes().local_preference().unwrap_or(0)
                };
                lp(b).cmp(&lp(a))
            }
            TieBreaker::Metric => a.metric().cmp(&b.metric()),
            TieBreaker::AdminDistance => {
                a.admin_distance().cmp(&b.admin_distance())
            }
            TieBreaker::Nexthop => {
                a.nexthop().into_inner().cmp(&b.nexthop().into_inner())
            }
            TieBreaker::Generation => b.genid().cmp(&a.genid()),
            TieBreaker::ProtocolName => {
                a.protocol().name().cmp(b.protocol().name())
            }
        }
    }

    pub fn default_chain() -> Vec<TieBreaker> {
        vec![
            TieBreaker::LocalPreference,
            TieBreaker::Metric,
            TieBreaker::AdminDistance,
        ]
    }
}

//------------ BranchId ------------------------------------------------------

/// The identity of one upstream branch of a decision table. Branch ids are
/// handed out in registration order and never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub(crate) u32);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch {}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BranchState {
    Up,
    Down,
}

struct Branch<AF: AddressFamily, M: Meta> {
    child: TableId,
    protocol: Protocol,
    state: BranchState,
    // Routes of this generation and older went down with their protocol
    // instance and may not win anymore, even if the branch is up again.
    stale_through: Option<u32>,
    routes: PrefixTrie<AF, RouteRef<AF, M>>,
}

impl<AF: AddressFamily, M: Meta> Branch<AF, M> {
    fn is_eligible(&self, route: &RouteEntry<AF, M>) -> bool {
        self.stale_through.map_or(true, |g| route.genid() > g)
    }

    fn store(&mut self, route: RouteRef<AF, M>) {
        if route.genid() > self.protocol.genid() {
            self.protocol = route.protocol().clone();
        }
        self.routes.insert(route.net(), route);
    }
}

#[derive(Clone)]
struct Winner<AF: AddressFamily, M: Meta> {
    branch: BranchId,
    route: RouteRef<AF, M>,
}

//------------ DumpStep ------------------------------------------------------

/// The result of one step of a decision table dump.
pub struct DumpStep<AF: AddressFamily, M: Meta> {
    /// The route to hand to the consumer, if the examined entry is the
    /// current winner for its net.
    pub route: Option<RouteRef<AF, M>>,
    pub more: bool,
}

//------------ DecisionTable -------------------------------------------------

/// Merges the routes of several upstream branches into a single stream of
/// best routes.
///
/// Every event for a net triggers a re-run of the selection over all
/// eligible candidates for that net, and at most one event is sent upward:
/// nothing if the published winner did not change, an add or delete if a
/// winner appeared or disappeared, and a replace if one winner took over
/// from another.
///
/// The selection applies the configured [TieBreaker] chain, followed by the
/// protocol name and the branch registration order, so the outcome never
/// depends on the order in which routes arrived.
pub struct DecisionTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    parent: Option<TableId>,
    branches: BTreeMap<BranchId, Branch<AF, M>>,
    children: BTreeMap<TableId, BranchId>,
    winners: PrefixTrie<AF, Winner<AF, M>>,
    tie_breakers: Vec<TieBreaker>,
    next_branch: u32,
}

impl<AF: AddressFamily, M: Meta> DecisionTable<AF, M> {
    pub(crate) fn new(
        id: TableId,
        name: &str,
        tie_breakers: Vec<TieBreaker>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: None,
            branches: BTreeMap::new(),
            children: BTreeMap::new(),
            winners: PrefixTrie::new(),
            tie_breakers,
            next_branch: 0,
        }
    }

    pub fn tie_breakers(&self) -> &[TieBreaker] {
        &self.tie_breakers
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// The branch fed by the child table `child`.
    pub fn branch_of(&self, child: TableId) -> Option<BranchId> {
        self.children.get(&child).copied()
    }

    /// The child table feeding `branch`.
    pub fn branch_child(&self, branch: BranchId) -> Option<TableId> {
        self.branches.get(&branch).map(|b| b.child)
    }

    pub fn is_branch_up(&self, branch: BranchId) -> bool {
        self.branches
            .get(&branch)
            .is_some_and(|b| b.state == BranchState::Up)
    }

    /// The currently published winner for `net`.
    pub fn winner(&self, net: &PrefixId<AF>) -> Option<&RouteRef<AF, M>> {
        self.winners.get(net).map(|w| &w.route)
    }

    pub fn winners(
        &self,
    ) -> impl Iterator<Item = (PrefixId<AF>, &RouteRef<AF, M>)> + '_ {
        self.winners.iter().map(|(net, w)| (net, &w.route))
    }

    /// Order two candidates, `Ordering::Less` meaning `a` is better.
    fn compare(
        &self,
        (a_branch, a): (BranchId, &RouteRef<AF, M>),
        (b_branch, b): (BranchId, &RouteRef<AF, M>),
    ) -> Ordering {
        self.tie_breakers
            .iter()
            .chain(std::iter::once(&TieBreaker::ProtocolName))
            .map(|tb| tb.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a_branch.cmp(&b_branch))
    }

    fn select(
        &self,
        net: &PrefixId<AF>,
    ) -> Option<(BranchId, &RouteRef<AF, M>)> {
        self.branches
            .iter()
            .filter_map(|(id, branch)| {
                branch
                    .routes
                    .get(net)
                    .filter(|r| branch.is_eligible(r))
                    .map(|r| (*id, r))
            })
            .reduce(|best, candidate| {
                if self.compare(candidate, best) == Ordering::Less {
                    candidate
                } else {
                    best
                }
            })
    }

    // Re-run the selection for `net`, and publish the outcome if the winner
    // changed.
    fn update_winner(&mut self, net: PrefixId<AF>) -> Option<RouteOp<AF, M>> {
        let new = self.select(&net).map(|(branch, route)| Winner {
            branch,
            route: Arc::clone(route),
        });
        let old = self.winners.get(&net).cloned();

        match (old, new) {
            (None, None) => None,
            (None, Some(new)) => {
                trace!("{} new winner {}", self.name, new.route);
                let route = Arc::clone(&new.route);
                self.winners.insert(net, new);
                Some(RouteOp::Add(route))
            }
            (Some(old), None) => {
                trace!("{} no winner left for {}", self.name, net);
                self.winners.remove(&net);
                Some(RouteOp::Delete(old.route))
            }
            (Some(old), Some(new)) => {
                if Arc::ptr_eq(&old.route, &new.route) {
                    return None;
                }
                trace!(
                    "{} winner for {} moves from {} to {}",
                    self.name,
                    net,
                    old.branch,
                    new.branch
                );
                let route = Arc::clone(&new.route);
                self.winners.insert(net, new);
                Some(RouteOp::Replace {
                    old: old.route,
                    new: route,
                })
            }
        }
    }

    fn branch_mut(
        &mut self,
        caller: TableId,
    ) -> Result<&mut Branch<AF, M>, RouteTableError> {
        self.children
            .get(&caller)
            .and_then(|id| self.branches.get_mut(id))
            .ok_or_else(|| {
                log::error!(
                    "decision table {} called by unknown table {}",
                    self.name,
                    caller
                );
                RouteTableError::UnknownCaller
            })
    }

    /// Start a dump over all branches known right now.
    pub fn new_dump_iterator(&self) -> DumpIterator<AF> {
        debug!(
            "{} starts a dump over {} branches",
            self.name,
            self.branches.len()
        );
        DumpIterator::new(
            self.branches
                .iter()
                .map(|(id, b)| (*id, b.protocol.clone())),
        )
    }

    /// Examine the next entry of the dump. At most one route is looked at
    /// per call.
    pub fn dump_next_route(
        &self,
        iter: &mut DumpIterator<AF>,
    ) -> DumpStep<AF, M> {
        let Some(branch_id) = iter.current_branch() else {
            return DumpStep {
                route: None,
                more: false,
            };
        };

        let next = self
            .branches
            .get(&branch_id)
            .and_then(|b| b.routes.iter_after(iter.position()).next());

        let route = match next {
            Some((net, route)) => {
                iter.set_position(net);
                self.winners
                    .get(&net)
                    .filter(|w| {
                        Arc::ptr_eq(&w.route, route) && iter.in_snapshot(route)
                    })
                    .map(|w| Arc::clone(&w.route))
            }
            None => {
                iter.finish_branch();
                None
            }
        };

        DumpStep {
            route,
            more: !iter.is_done(),
        }
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for DecisionTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Decision
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
        child: TableId,
        protocol: Option<&Protocol>,
    ) -> Result<(), RouteTableError> {
        let Some(protocol) = protocol else {
            return Err(RouteTableError::TopologyError);
        };
        if self.children.contains_key(&child) {
            return Err(RouteTableError::TopologyError);
        }
        let id = BranchId(self.next_branch);
        self.next_branch += 1;
        debug!("{} adds {} for {}", self.name, id, protocol);
        self.children.insert(child, id);
        self.branches.insert(
            id,
            Branch {
                child,
                protocol: protocol.clone(),
                state: BranchState::Up,
                stale_through: None,
                routes: PrefixTrie::new(),
            },
        );
        Ok(())
    }

    fn replace_child(
        &mut self,
        old: TableId,
        new: TableId,
    ) -> Result<(), RouteTableError> {
        let id = self
            .children
            .remove(&old)
            .ok_or(RouteTableError::TopologyError)?;
        if let Some(branch) = self.branches.get_mut(&id) {
            branch.child = new;
        }
        self.children.insert(new, id);
        Ok(())
    }

    fn add_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        let net = route.net();
        self.branch_mut(caller)?.store(route);
        Ok(self.update_winner(net))
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        let net = route.net();
        if self.branch_mut(caller)?.routes.remove(&net).is_none() {
            return Err(RouteTableError::RouteNotFound);
        }
        Ok(self.update_winner(net))
    }

    fn replace_route(
        &mut self,
        _old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        let net = new.net();
        self.branch_mut(caller)?.store(new);
        Ok(self.update_winner(net))
    }

    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError> {
        let name = self.name.clone();
        let branch = self.branch_mut(caller)?;
        match &signal {
            Signal::PeeringWentDown(protocol) => {
                debug!("{}: {} went down", name, protocol);
                branch.state = BranchState::Down;
                branch.stale_through = Some(
                    branch
                        .stale_through
                        .map_or(protocol.genid(), |g| g.max(protocol.genid())),
                );
            }
            Signal::PeeringCameUp(protocol) => {
                debug!("{}: {} came up", name, protocol);
                branch.state = BranchState::Up;
                branch.protocol = protocol.clone();
            }
            Signal::PeeringDownComplete(protocol) => {
                // With more than one generation being withdrawn, routes of
                // an older one may still be on their way. The signal only
                // goes up once the last of them is gone.
                if let Some(stale) = branch.stale_through {
                    let left = branch
                        .routes
                        .iter()
                        .filter(|(_, r)| r.genid() <= stale)
                        .count();
                    if left > 0 {
                        debug!(
                            "{}: {} down complete, {} stale routes left",
                            name, protocol, left
                        );
                        return Ok(None);
                    }
                    branch.stale_through = None;
                }
            }
        }
        Ok(Some(signal))
    }

    fn lookup_route(&self, net: &PrefixId<AF>) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(self.winner(net).cloned())
    }

    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(
            self.winners
                .longest_match_addr(addr)
                .map(|(_, w)| Arc::clone(&w.route)),
        )
    }

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup::found(Some(
            self.winners
                .route_range(addr)
                .map(|(_, w)| Arc::clone(&w.route)),
        ))
    }

    fn route_count(&self) -> usize {
        self.winners.len()
    }
}
