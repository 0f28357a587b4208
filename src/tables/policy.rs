use std::sync::Arc;

use log::{debug, trace, warn};

use super::{Lookup, RouteOp, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::{PrefixTrie, RouteRange};
use crate::types::errors::{FilterError, RouteTableError};
use crate::types::{AttrRef, Meta, PolicyTags, PrefixId, Protocol, RouteEntry, RouteRef};
use crate::AddressFamily;

//------------ RouteFilter (trait) -------------------------------------------

/// The outcome of running a filter on a route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterVerdict<M: Meta> {
    Accept,
    /// Accept a rewritten copy of the route.
    Modify(RouteModification<M>),
    Reject,
}

/// The fields of a route a filter may rewrite. Fields left at `None` are
/// kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteModification<M: Meta> {
    pub attributes: Option<AttrRef<M>>,
    pub policy_tags: Option<PolicyTags>,
    pub metric: Option<u32>,
}

impl<M: Meta> Default for RouteModification<M> {
    fn default() -> Self {
        Self {
            attributes: None,
            policy_tags: None,
            metric: None,
        }
    }
}

/// A policy filter, as run by a [PolicyTable].
///
/// The filter itself (a compiled policy, a test stub, a debug predicate) is
/// outside of the pipeline. An error from the filter counts as a reject: a
/// route that could not be validated is never forwarded.
pub trait RouteFilter<AF: AddressFamily, M: Meta> {
    fn run_filter(
        &self,
        route: &RouteEntry<AF, M>,
    ) -> Result<FilterVerdict<M>, FilterError>;
}

impl<AF, M, F> RouteFilter<AF, M> for F
where
    AF: AddressFamily,
    M: Meta,
    F: Fn(&RouteEntry<AF, M>) -> Result<FilterVerdict<M>, FilterError>,
{
    fn run_filter(
        &self,
        route: &RouteEntry<AF, M>,
    ) -> Result<FilterVerdict<M>, FilterError> {
        self(route)
    }
}

/// The filter every policy table starts out with.
pub fn accept_all<AF: AddressFamily, M: Meta>(
    _route: &RouteEntry<AF, M>,
) -> Result<FilterVerdict<M>, FilterError> {
    Ok(FilterVerdict::Accept)
}

//------------ PushStep ------------------------------------------------------

/// The result of one bounded step of re-evaluating all routes.
pub struct PushStep<AF: AddressFamily, M: Meta> {
    pub ops: Vec<RouteOp<AF, M>>,
    pub more: bool,
}

//------------ PolicyTable ---------------------------------------------------

/// Runs a filter over every route passing through.
///
/// The table remembers both what came in and what it last forwarded for
/// every net, so it can turn a changed verdict into the right event: an add
/// if a previously rejected route is now accepted, a delete if a previously
/// accepted route is now rejected, a replace otherwise.
///
/// When the filter changes, all stored routes need re-evaluation. This
/// "push" runs as a background task in bounded steps, resuming after the
/// last net it handled. Each push has an epoch, setting a new filter starts
/// a new epoch and so cancels the push that is running.
pub struct PolicyTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    parent: Option<TableId>,
    child: Option<TableId>,
    filter: Box<dyn RouteFilter<AF, M>>,
    inputs: PrefixTrie<AF, RouteRef<AF, M>>,
    outputs: PrefixTrie<AF, RouteRef<AF, M>>,
    push_epoch: u64,
    push_cursor: Option<PrefixId<AF>>,
    pushing: bool,
    rejected: usize,
}

impl<AF: AddressFamily, M: Meta> PolicyTable<AF, M> {
    pub(crate) fn new(
        id: TableId,
        name: &str,
        filter: Box<dyn RouteFilter<AF, M>>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent: None,
            child: None,
            filter,
            inputs: PrefixTrie::new(),
            outputs: PrefixTrie::new(),
            push_epoch: 0,
            push_cursor: None,
            pushing: false,
            rejected: 0,
        }
    }

    /// Swap the filter and start a new push, returning its epoch.
    pub fn set_filter(&mut self, filter: Box<dyn RouteFilter<AF, M>>) -> u64 {
        self.filter = filter;
        self.push_routes()
    }

    /// Start re-evaluating all routes with the current filter, cancelling
    /// a push that may be running. Returns the epoch of the new push.
    pub fn push_routes(&mut self) -> u64 {
        self.push_epoch += 1;
        self.push_cursor = None;
        self.pushing = true;
        debug!(
            "{} starts push {} over {} routes",
            self.name,
            self.push_epoch,
            self.inputs.len()
        );
        self.push_epoch
    }

    pub fn is_pushing(&self, epoch: u64) -> bool {
        self.pushing && self.push_epoch == epoch
    }

    /// The number of routes rejected by the filter since the table was
    /// created.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Re-evaluate at most `batch` routes of push `epoch`. A push that is
    /// no longer current does nothing.
    pub fn push_step(&mut self, epoch: u64, batch: usize) -> PushStep<AF, M> {
        if !self.is_pushing(epoch) {
            trace!("{} push {} cancelled", self.name, epoch);
            return PushStep {
                ops: vec![],
                more: false,
            };
        }

        let inputs: Vec<(PrefixId<AF>, RouteRef<AF, M>)> = self
            .inputs
            .iter_after(self.push_cursor)
            .take(batch)
            .map(|(net, r)| (net, Arc::clone(r)))
            .collect();

        let mut ops = vec![];
        for (net, input) in &inputs {
            let next = self.evaluate(input);
            let prev = self.outputs.get(net).cloned();
            let unchanged = match (&prev, &next) {
                (Some(p), Some(n)) => p == n,
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }
            self.store_output(*net, next.clone());
            if let Some(op) = Self::transition(prev, next) {
                ops.push(op);
            }
        }

        self.push_cursor = inputs.last().map(|(net, _)| *net);
        let more = inputs.len() == batch;
        if !more {
            debug!("{} finished push {}", self.name, epoch);
            self.pushing = false;
        }
        PushStep { ops, more }
    }

    fn evaluate(&mut self, input: &RouteRef<AF, M>) -> Option<RouteRef<AF, M>> {
        match self.filter.run_filter(input) {
            Ok(FilterVerdict::Accept) => Some(Arc::clone(input)),
            Ok(FilterVerdict::Modify(m)) => {
                let mut route = input.as_ref().clone();
                if let Some(attributes) = m.attributes {
                    route = route.with_attributes(attributes);
                }
                if let Some(tags) = m.policy_tags {
                    route = route.with_policy_tags(tags);
                }
                if let Some(metric) = m.metric {
                    route = route.with_metric(metric);
                }
                Some(Arc::new(route))
            }
            Ok(FilterVerdict::Reject) => {
                trace!("{} rejects {}", self.name, input.net());
                self.rejected += 1;
                None
            }
            Err(err) => {
                warn!(
                    "{}: {} while filtering {}, rejecting the route",
                    self.name,
                    err,
                    input.net()
                );
                self.rejected += 1;
                None
            }
        }
    }

    fn store_output(
        &mut self,
        net: PrefixId<AF>,
        output: Option<RouteRef<AF, M>>,
    ) {
        match output {
            Some(route) => {
                self.outputs.insert(net, route);
            }
            None => {
                self.outputs.remove(&net);
            }
        }
    }

    fn transition(
        prev: Option<RouteRef<AF, M>>,
        next: Option<RouteRef<AF, M>>,
    ) -> Option<RouteOp<AF, M>> {
        match (prev, next) {
            (None, None) => None,
            (None, Some(new)) => Some(RouteOp::Add(new)),
            (Some(old), None) => Some(RouteOp::Delete(old)),
            (Some(old), Some(new)) => Some(RouteOp::Replace { old, new }),
        }
    }

    fn filter_in(&mut self, route: RouteRef<AF, M>) -> Option<RouteOp<AF, M>> {
        let net = route.net();
        let next = self.evaluate(&route);
        self.inputs.insert(net, route);
        let prev = self.outputs.get(&net).cloned();
        self.store_output(net, next.clone());
        Self::transition(prev, next)
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for PolicyTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Policy
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
        Ok(self.filter_in(route))
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        let net = route.net();
        if self.inputs.remove(&net).is_none() {
            return Err(RouteTableError::RouteNotFound);
        }
        Ok(self.outputs.remove(&net).map(RouteOp::Delete))
    }

    fn replace_route(
        &mut self,
        _old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        Ok(self.filter_in(new))
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
        Lookup::found(self.outputs.get(net).cloned())
    }

    fn lookup_route_addr(&self, addr: AF) -> Lookup<RouteRef<AF, M>> {
        Lookup::found(
            self.outputs
                .longest_match_addr(addr)
                .map(|(_, r)| Arc::clone(r)),
        )
    }

    fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Lookup<RouteRange<AF, RouteRef<AF, M>>> {
        Lookup::found(Some(
            self.outputs.route_range(addr).map(|(_, r)| Arc::clone(r)),
        ))
    }

    fn route_count(&self) -> usize {
        self.outputs.len()
    }
}
