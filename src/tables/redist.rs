use std::collections::BTreeMap;
use std::fmt;

use log::{debug, trace};

use super::dump::DumpIterator;
use super::{Lookup, RouteOpResult, RouteTable, Signal, TableId, TableType};
use crate::trie::RouteRange;
use crate::types::errors::RouteTableError;
use crate::types::{Meta, PrefixId, Protocol, RouteRef};
use crate::AddressFamily;

//------------ RouteConsumer (trait) -----------------------------------------

/// Something outside the pipeline that wants to follow the best routes: a
/// FIB installer, another protocol, a management interface.
pub trait RouteConsumer<AF: AddressFamily, M: Meta> {
    fn add_route(&mut self, route: &RouteRef<AF, M>);

    fn delete_route(&mut self, route: &RouteRef<AF, M>);

    fn replace_route(&mut self, old: &RouteRef<AF, M>, new: &RouteRef<AF, M>);

    /// The initial dump of the existing routes to this consumer finished.
    fn dump_complete(&mut self) {}
}

//------------ RouteNotifier (trait) -----------------------------------------

/// The interface of a RIB client that wants to be told about changes to the
/// routes of a destination, rather than receive the routes themselves.
pub trait RouteNotifier<AF: AddressFamily> {
    #[allow(clippy::too_many_arguments)]
    fn send_route_changed(
        &mut self,
        protocol_name: &str,
        net: PrefixId<AF>,
        nexthop: AF,
        metric: u32,
        admin_distance: u16,
        origin_protocol: &str,
        is_multicast: bool,
    );

    fn send_invalidate(
        &mut self,
        protocol_name: &str,
        net: PrefixId<AF>,
        is_multicast: bool,
    );
}

/// Turns winner changes into notifications for a [RouteNotifier].
///
/// Adds and replaces become a `send_route_changed` for the new winner,
/// deletes a `send_invalidate`.
pub struct NotifyingConsumer<N> {
    protocol_name: String,
    multicast: bool,
    notifier: N,
}

impl<N> NotifyingConsumer<N> {
    /// `protocol_name` is the name of the target the notifications are
    /// sent to.
    pub fn new(protocol_name: &str, multicast: bool, notifier: N) -> Self {
        Self {
            protocol_name: protocol_name.to_string(),
            multicast,
            notifier,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    fn route_changed<AF: AddressFamily, M: Meta>(
        &mut self,
        route: &RouteRef<AF, M>,
    ) where
        N: RouteNotifier<AF>,
    {
        self.notifier.send_route_changed(
            &self.protocol_name,
            route.net(),
            route.nexthop(),
            route.metric(),
            route.admin_distance(),
            route.protocol().name(),
            self.multicast,
        );
    }
}

impl<AF, M, N> RouteConsumer<AF, M> for NotifyingConsumer<N>
where
    AF: AddressFamily,
    M: Meta,
    N: RouteNotifier<AF>,
{
    fn add_route(&mut self, route: &RouteRef<AF, M>) {
        self.route_changed(route);
    }

    fn delete_route(&mut self, route: &RouteRef<AF, M>) {
        self.notifier.send_invalidate(
            &self.protocol_name,
            route.net(),
            self.multicast,
        );
    }

    fn replace_route(&mut self, _old: &RouteRef<AF, M>, new: &RouteRef<AF, M>) {
        self.route_changed(new);
    }
}

//------------ ConsumerId ----------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub(crate) u32);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer {}", self.0)
    }
}

struct ConsumerSlot<AF: AddressFamily, M: Meta> {
    consumer: Box<dyn RouteConsumer<AF, M>>,
    dump: Option<DumpIterator<AF>>,
}

//------------ RedistTable ---------------------------------------------------

/// The terminal table of a pipeline, handing every change of a winner to
/// the registered consumers.
///
/// A consumer that registers while routes already exist gets those routes
/// by a background dump out of the decision table below. While that dump
/// runs, ordinary changes only reach the consumer if they concern a route
/// it already got, or will never get, from the dump.
pub struct RedistTable<AF: AddressFamily, M: Meta> {
    id: TableId,
    name: String,
    child: Option<TableId>,
    consumers: BTreeMap<ConsumerId, ConsumerSlot<AF, M>>,
    next_consumer: u32,
}

impl<AF: AddressFamily, M: Meta> RedistTable<AF, M> {
    pub(crate) fn new(id: TableId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            child: None,
            consumers: BTreeMap::new(),
            next_consumer: 0,
        }
    }

    pub fn add_consumer(
        &mut self,
        consumer: Box<dyn RouteConsumer<AF, M>>,
    ) -> ConsumerId {
        let id = ConsumerId(self.next_consumer);
        self.next_consumer += 1;
        debug!("{} registers {}", self.name, id);
        self.consumers.insert(
            id,
            ConsumerSlot {
                consumer,
                dump: None,
            },
        );
        id
    }

    /// Unregister a consumer, cancelling its dump if one is running.
    pub fn remove_consumer(
        &mut self,
        id: ConsumerId,
    ) -> Result<Box<dyn RouteConsumer<AF, M>>, RouteTableError> {
        debug!("{} removes {}", self.name, id);
        self.consumers
            .remove(&id)
            .map(|slot| slot.consumer)
            .ok_or(RouteTableError::ConsumerNotFound)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_dumping(&self, id: ConsumerId) -> bool {
        self.consumers
            .get(&id)
            .and_then(|s| s.dump.as_ref())
            .is_some_and(|d| !d.is_done())
    }

    // The dump cursor travels to the decision table for every step, and
    // comes back here afterwards.
    pub(crate) fn take_dump(
        &mut self,
        id: ConsumerId,
    ) -> Option<DumpIterator<AF>> {
        self.consumers.get_mut(&id).and_then(|s| s.dump.take())
    }

    pub(crate) fn restore_dump(
        &mut self,
        id: ConsumerId,
        dump: DumpIterator<AF>,
    ) -> Result<(), RouteTableError> {
        let slot = self
            .consumers
            .get_mut(&id)
            .ok_or(RouteTableError::ConsumerNotFound)?;
        slot.dump = Some(dump);
        Ok(())
    }

    /// Hand a route out of the dump to one consumer.
    pub(crate) fn dump_route(
        &mut self,
        id: ConsumerId,
        route: &RouteRef<AF, M>,
    ) -> Result<(), RouteTableError> {
        let slot = self
            .consumers
            .get_mut(&id)
            .ok_or(RouteTableError::ConsumerNotFound)?;
        trace!("{} dumps {} to {}", self.name, route.net(), id);
        slot.consumer.add_route(route);
        Ok(())
    }

    /// The dump to `id` is done. It stays around as a filter while a branch
    /// that went down during the dump is still being withdrawn.
    pub(crate) fn finish_dump(
        &mut self,
        id: ConsumerId,
        dump: DumpIterator<AF>,
    ) -> Result<(), RouteTableError> {
        let slot = self
            .consumers
            .get_mut(&id)
            .ok_or(RouteTableError::ConsumerNotFound)?;
        debug!("{} finished the dump to {}", self.name, id);
        slot.dump = if dump.is_filtering() {
            debug!("{} keeps filtering withdrawals to {}", self.name, id);
            Some(dump)
        } else {
            None
        };
        slot.consumer.dump_complete();
        Ok(())
    }
}

impl<AF: AddressFamily, M: Meta> RouteTable<AF, M> for RedistTable<AF, M> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn table_type(&self) -> TableType {
        TableType::Redist
    }

    fn parent(&self) -> Option<TableId> {
        None
    }

    fn set_parent(&mut self, _parent: Option<TableId>) {}

    fn child(&self) -> Option<TableId> {
        self.child
    }

    fn replumb(
        &mut self,
        _old_parent: TableId,
        _new_parent: TableId,
    ) -> Result<(), RouteTableError> {
        Err(RouteTableError::TopologyError)
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
        for slot in self.consumers.values_mut() {
            if slot
                .dump
                .as_ref()
                .map_or(true, |d| d.route_change_is_valid(&route))
            {
                slot.consumer.add_route(&route);
            }
        }
        Ok(None)
    }

    fn delete_route(
        &mut self,
        route: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        for slot in self.consumers.values_mut() {
            if slot
                .dump
                .as_ref()
                .map_or(true, |d| d.route_change_is_valid(&route))
            {
                slot.consumer.delete_route(&route);
            }
        }
        Ok(None)
    }

    fn replace_route(
        &mut self,
        old: RouteRef<AF, M>,
        new: RouteRef<AF, M>,
        caller: TableId,
    ) -> RouteOpResult<AF, M> {
        self.check_caller(self.child, caller)?;
        for slot in self.consumers.values_mut() {
            let (old_valid, new_valid) = match &slot.dump {
                None => (true, true),
                Some(d) => {
                    (d.route_change_is_valid(&old), d.route_change_is_valid(&new))
                }
            };
            match (old_valid, new_valid) {
                (true, true) => slot.consumer.replace_route(&old, &new),
                (false, true) => slot.consumer.add_route(&new),
                (true, false) => slot.consumer.delete_route(&old),
                (false, false) => {}
            }
        }
        Ok(None)
    }

    fn signal(
        &mut self,
        signal: Signal,
        caller: TableId,
    ) -> Result<Option<Signal>, RouteTableError> {
        self.check_caller(self.child, caller)?;
        match &signal {
            Signal::PeeringWentDown(protocol) => {
                for dump in
                    self.consumers.values_mut().filter_map(|s| s.dump.as_mut())
                {
                    dump.peering_went_down(protocol);
                }
            }
            Signal::PeeringDownComplete(protocol) => {
                for slot in self.consumers.values_mut() {
                    let Some(dump) = slot.dump.as_mut() else {
                        continue;
                    };
                    dump.peering_down_complete(protocol);
                    if dump.is_done() && !dump.is_filtering() {
                        slot.dump = None;
                    }
                }
            }
            Signal::PeeringCameUp(_) => {}
        }
        Ok(None)
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
