//! The arena that owns the tables of one address family, plumbs them into
//! chains, carries events between them and runs their background work.
use std::collections::{BTreeMap, VecDeque};

use log::{debug, error, trace};

use super::config::Config;
use super::scheduler::{BackgroundTask, TaskQueue, TaskStatus};
use crate::tables::{
    ConsumerId, DebugTable, DecisionTable, DeletionState, DeletionTable,
    ExtIntTable, OriginTable, PolicyTable, RedistTable, RegisterTable,
    RouteConsumer, RouteFilter, RouteNotifier, RouteOp, RouteRegister,
    RouteTable, Signal, Table, TableId, TableType,
};
use crate::trie::RouteRange;
use crate::types::errors::RouteTableError;
use crate::types::stats::{Counters, TableStats};
use crate::types::{Meta, PrefixId, Protocol, RouteEntry, RouteRef};
use crate::AddressFamily;

//------------ Pipeline ------------------------------------------------------

/// A set of route tables for one address family, and the plumbing between
/// them.
///
/// Tables refer to their neighbours by [TableId] only. The pipeline carries
/// every event a table produces to that table's parent, naming the
/// producing table as the caller, until a table consumes it. This happens
/// iteratively, so chains can be of any length.
pub struct Pipeline<AF: AddressFamily, M: Meta> {
    config: Config,
    tables: BTreeMap<TableId, Table<AF, M>>,
    next_id: u32,
    tasks: TaskQueue<AF>,
    counters: Counters,
}

impl<AF: AddressFamily, M: Meta> Pipeline<AF, M> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tables: BTreeMap::new(),
            next_id: 0,
            tasks: TaskQueue::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn insert_table(
        &mut self,
        create: impl FnOnce(TableId) -> Table<AF, M>,
    ) -> TableId {
        let id = TableId(self.next_id);
        self.next_id += 1;
        let table = create(id);
        debug!(
            "created {} table {} {}",
            table.table_type(),
            table.as_route_table().name(),
            id
        );
        self.tables.insert(id, table);
        id
    }

    //-------- Table creation -----------------------------------------------

    pub fn create_origin_table(
        &mut self,
        name: &str,
        protocol: Protocol,
        admin_distance: u16,
    ) -> TableId {
        self.insert_table(|id| {
            Table::Origin(OriginTable::new(id, name, protocol, admin_distance))
        })
    }

    pub fn create_policy_table(
        &mut self,
        name: &str,
        filter: Box<dyn RouteFilter<AF, M>>,
    ) -> TableId {
        self.insert_table(|id| Table::Policy(PolicyTable::new(id, name, filter)))
    }

    /// Create a decision table using the tie-break chain of the
    /// configuration.
    pub fn create_decision_table(&mut self, name: &str) -> TableId {
        let tie_breakers = self.config.tie_breakers.clone();
        self.insert_table(|id| {
            Table::Decision(DecisionTable::new(id, name, tie_breakers))
        })
    }

    pub fn create_extint_table(&mut self, name: &str) -> TableId {
        self.insert_table(|id| Table::ExtInt(ExtIntTable::new(id, name)))
    }

    pub fn create_register_table(&mut self, name: &str) -> TableId {
        let multicast = self.config.multicast;
        self.insert_table(|id| {
            Table::Register(RegisterTable::new(id, name, multicast))
        })
    }

    pub fn create_redist_table(&mut self, name: &str) -> TableId {
        self.insert_table(|id| Table::Redist(RedistTable::new(id, name)))
    }

    pub fn create_debug_table(&mut self, name: &str) -> TableId {
        self.insert_table(|id| Table::Debug(DebugTable::new(id, name)))
    }

    //-------- Table access -------------------------------------------------

    pub(crate) fn table(
        &self,
        id: TableId,
    ) -> Result<&Table<AF, M>, RouteTableError> {
        self.tables.get(&id).ok_or(RouteTableError::TableNotFound)
    }

    pub(crate) fn table_mut(
        &mut self,
        id: TableId,
    ) -> Result<&mut Table<AF, M>, RouteTableError> {
        self.tables.get_mut(&id).ok_or(RouteTableError::TableNotFound)
    }

    pub fn contains(&self, id: TableId) -> bool {
        self.tables.contains_key(&id)
    }

    pub fn table_type(&self, id: TableId) -> Result<TableType, RouteTableError> {
        self.table(id).map(|t| t.table_type())
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn parent(&self, id: TableId) -> Result<Option<TableId>, RouteTableError> {
        self.table(id).map(|t| t.as_route_table().parent())
    }

    pub fn origin(
        &self,
        id: TableId,
    ) -> Result<&OriginTable<AF, M>, RouteTableError> {
        self.table(id)?.as_origin()
    }

    pub fn policy(
        &self,
        id: TableId,
    ) -> Result<&PolicyTable<AF, M>, RouteTableError> {
        self.table(id)?.as_policy()
    }

    pub fn decision(
        &self,
        id: TableId,
    ) -> Result<&DecisionTable<AF, M>, RouteTableError> {
        self.table(id)?.as_decision()
    }

    pub fn deletion(
        &self,
        id: TableId,
    ) -> Result<&DeletionTable<AF, M>, RouteTableError> {
        self.table(id)?.as_deletion()
    }

    pub fn extint(
        &self,
        id: TableId,
    ) -> Result<&ExtIntTable<AF, M>, RouteTableError> {
        self.table(id)?.as_extint()
    }

    pub fn register(
        &self,
        id: TableId,
    ) -> Result<&RegisterTable<AF, M>, RouteTableError> {
        self.table(id)?.as_register()
    }

    pub fn redist(
        &self,
        id: TableId,
    ) -> Result<&RedistTable<AF, M>, RouteTableError> {
        self.table(id)?.as_redist()
    }

    pub fn debug(
        &self,
        id: TableId,
    ) -> Result<&DebugTable<AF, M>, RouteTableError> {
        self.table(id)?.as_debug()
    }

    pub fn debug_mut(
        &mut self,
        id: TableId,
    ) -> Result<&mut DebugTable<AF, M>, RouteTableError> {
        self.table_mut(id)?.as_debug_mut()
    }

    //-------- Plumbing -----------------------------------------------------

    /// The protocol feeding the chain that ends in `id`, if that chain
    /// starts at an origin table.
    fn chain_protocol(&self, id: TableId) -> Option<Protocol> {
        let mut id = id;
        loop {
            let table = self.tables.get(&id)?;
            if let Table::Origin(origin) = table {
                return Some(origin.protocol().clone());
            }
            id = table.as_route_table().child()?;
        }
    }

    /// Make `parent` the parent of `child`. The child must not have a
    /// parent yet. A decision table parent registers the child as a new
    /// branch.
    pub fn plumb(
        &mut self,
        child: TableId,
        parent: TableId,
    ) -> Result<(), RouteTableError> {
        let child_table = self.table(child)?;
        if child_table.as_route_table().parent().is_some()
            || child_table.table_type() == TableType::Redist
        {
            error!("cannot plumb {} into {}", child, parent);
            return Err(RouteTableError::TopologyError);
        }
        let protocol = self.chain_protocol(child);
        self.table_mut(parent)?
            .as_route_table_mut()
            .add_child(child, protocol.as_ref())?;
        self.table_mut(child)?
            .as_route_table_mut()
            .set_parent(Some(parent));
        debug!("plumbed {} into {}", child, parent);
        Ok(())
    }

    /// Insert the unplumbed linear table `table` between `child` and the
    /// parent of `child`.
    pub fn splice(
        &mut self,
        child: TableId,
        table: TableId,
    ) -> Result<(), RouteTableError> {
        let parent = self
            .table(child)?
            .as_route_table()
            .parent()
            .ok_or(RouteTableError::TopologyError)?;
        {
            let new = self.table(table)?.as_route_table();
            if new.parent().is_some() || new.child().is_some() {
                error!("cannot splice {}, it is plumbed already", table);
                return Err(RouteTableError::TopologyError);
            }
        }
        self.table_mut(child)?
            .as_route_table_mut()
            .replumb(parent, table)?;
        self.table_mut(parent)?
            .as_route_table_mut()
            .replace_child(child, table)?;
        let new = self.table_mut(table)?.as_route_table_mut();
        new.add_child(child, None)?;
        new.set_parent(Some(parent));
        debug!("spliced {} between {} and {}", table, child, parent);
        Ok(())
    }

    /// Take the linear table `id` out of its chain, linking its child to
    /// its parent, and drop it.
    pub fn unplumb(&mut self, id: TableId) -> Result<(), RouteTableError> {
        self.detach(id).map(|_| ())
    }

    fn detach(&mut self, id: TableId) -> Result<Table<AF, M>, RouteTableError> {
        let (parent, child) = {
            let table = self.table(id)?.as_route_table();
            (table.parent(), table.child())
        };
        let Some(child) = child else {
            error!("cannot unplumb {}, it has no single child", id);
            return Err(RouteTableError::TopologyError);
        };
        match parent {
            Some(parent) => {
                self.table_mut(child)?
                    .as_route_table_mut()
                    .replumb(id, parent)?;
                self.table_mut(parent)?
                    .as_route_table_mut()
                    .replace_child(id, child)?;
            }
            None => {
                self.table_mut(child)?.as_route_table_mut().set_parent(None);
            }
        }
        debug!("unplumbed {}", id);
        self.tables.remove(&id).ok_or(RouteTableError::TableNotFound)
    }

    /// The ids of `id` and all tables above it, bottom to top.
    pub fn chain_from(&self, id: TableId) -> Result<Vec<TableId>, RouteTableError> {
        let mut chain = vec![id];
        let mut current = self.table(id)?.as_route_table().parent();
        while let Some(parent) = current {
            if chain.contains(&parent) {
                error!("table {} is part of a cycle", parent);
                return Err(RouteTableError::TopologyError);
            }
            chain.push(parent);
            current = self.table(parent)?.as_route_table().parent();
        }
        Ok(chain)
    }

    //-------- Event propagation --------------------------------------------

    fn fatal(err: RouteTableError, at: TableId) -> RouteTableError {
        if err.is_fatal() {
            error!("{} at table {}", err, at);
        }
        err
    }

    /// Hand `op` to `target`, as coming from `caller`, and carry whatever
    /// comes out of it upward.
    fn deliver(
        &mut self,
        target: TableId,
        caller: TableId,
        op: RouteOp<AF, M>,
    ) -> Result<(), RouteTableError> {
        let table = self.table_mut(target)?;
        let out = table
            .apply(op, caller)
            .map_err(|e| Self::fatal(e, target))?;
        let followups = table.take_followups();
        for op in out.into_iter().chain(followups) {
            self.propagate(target, op)?;
        }
        Ok(())
    }

    /// Carry `op`, produced by `from`, up the chain. Follow-up events a
    /// table produces go up right after the event that caused them.
    pub(crate) fn propagate(
        &mut self,
        from: TableId,
        op: RouteOp<AF, M>,
    ) -> Result<(), RouteTableError> {
        let mut queue = VecDeque::from([(from, op)]);
        while let Some((from, op)) = queue.pop_front() {
            let Some(parent) = self.table(from)?.as_route_table().parent()
            else {
                error!("table {} has no parent to send {} to", from, op);
                return Err(RouteTableError::MissingParent);
            };
            trace!("{} -> {}: {}", from, parent, op);
            let table = self.table_mut(parent)?;
            let out = table
                .apply(op, from)
                .map_err(|e| Self::fatal(e, parent))?;
            for followup in table.take_followups().into_iter().rev() {
                queue.push_front((parent, followup));
            }
            if let Some(next) = out {
                queue.push_front((parent, next));
            }
        }
        Ok(())
    }

    fn deliver_signal(
        &mut self,
        target: TableId,
        caller: TableId,
        signal: Signal,
    ) -> Result<(), RouteTableError> {
        let mut target = target;
        let mut caller = caller;
        let mut signal = signal;
        loop {
            trace!("{} -> {}: {}", caller, target, signal);
            let out = self
                .table_mut(target)?
                .as_route_table_mut()
                .signal(signal, caller)
                .map_err(|e| Self::fatal(e, target))?;
            let Some(next) = out else {
                return Ok(());
            };
            let Some(parent) = self.table(target)?.as_route_table().parent()
            else {
                error!("table {} has no parent to send {} to", target, next);
                return Err(RouteTableError::MissingParent);
            };
            caller = target;
            target = parent;
            signal = next;
        }
    }

    //-------- Routes -------------------------------------------------------

    /// Originate `entry` out of the origin table `origin`. An entry for a
    /// net the origin already has replaces the existing route.
    pub fn add_route(
        &mut self,
        origin: TableId,
        entry: RouteEntry<AF, M>,
    ) -> Result<(), RouteTableError> {
        let route = self.origin(origin)?.originate(entry);
        self.counters.inc_added();
        self.deliver(origin, origin, RouteOp::Add(route))
    }

    pub fn delete_route(
        &mut self,
        origin: TableId,
        net: &PrefixId<AF>,
    ) -> Result<(), RouteTableError> {
        let route = self
            .origin(origin)?
            .route(net)
            .cloned()
            .ok_or(RouteTableError::RouteNotFound)?;
        self.counters.inc_deleted();
        self.deliver(origin, origin, RouteOp::Delete(route))
    }

    pub fn replace_route(
        &mut self,
        origin: TableId,
        entry: RouteEntry<AF, M>,
    ) -> Result<(), RouteTableError> {
        let origin_table = self.origin(origin)?;
        let old = origin_table
            .route(&entry.net())
            .cloned()
            .ok_or(RouteTableError::RouteNotFound)?;
        let new = origin_table.originate(entry);
        self.counters.inc_replaced();
        self.deliver(origin, origin, RouteOp::Replace { old, new })
    }

    //-------- Protocol lifecycle -------------------------------------------

    /// Tell the chain above `origin` that its protocol is feeding routes.
    pub fn routing_protocol_startup(
        &mut self,
        origin: TableId,
    ) -> Result<(), RouteTableError> {
        let protocol = self.origin(origin)?.protocol().clone();
        self.deliver_signal(origin, origin, Signal::PeeringCameUp(protocol))
    }

    /// The protocol of `origin` went away. Its routes are handed to a new
    /// deletion table spliced in above the origin, and withdrawn in the
    /// background. Returns the id of that deletion table, or `None` if the
    /// origin was empty and everything is done already.
    pub fn routing_protocol_shutdown(
        &mut self,
        origin: TableId,
    ) -> Result<Option<TableId>, RouteTableError> {
        if self.table(origin)?.as_route_table().parent().is_none() {
            return Err(RouteTableError::TopologyError);
        }
        let (routes, protocol) =
            self.table_mut(origin)?.as_origin_mut()?.routing_protocol_shutdown();

        if routes.is_empty() {
            self.deliver_signal(
                origin,
                origin,
                Signal::PeeringWentDown(protocol.clone()),
            )?;
            self.deliver_signal(
                origin,
                origin,
                Signal::PeeringDownComplete(protocol),
            )?;
            return Ok(None);
        }

        let deletion = self.insert_table(|id| {
            Table::Deletion(DeletionTable::new(id, protocol.clone(), routes))
        });
        self.splice(origin, deletion)?;
        self.deliver_signal(origin, origin, Signal::PeeringWentDown(protocol))?;
        self.tasks
            .push(BackgroundTask::DeletionPass { table: deletion });
        Ok(Some(deletion))
    }

    /// Run one background pass of the deletion table `deletion`. Once it is
    /// empty, the protocol's down is complete and the table is unplumbed.
    /// Returns whether more passes are needed.
    pub fn background_deletion_pass(
        &mut self,
        deletion: TableId,
    ) -> Result<bool, RouteTableError> {
        let batch = self.config.deletion_batch_size();
        let ops = self
            .table_mut(deletion)?
            .as_deletion_mut()?
            .background_deletion_pass(batch);
        for op in ops {
            self.propagate(deletion, op)?;
        }

        let table = self.deletion(deletion)?;
        if table.state() != DeletionState::Empty {
            return Ok(true);
        }
        let protocol = table.protocol().clone();
        let parent = table.parent();
        if let Some(parent) = parent {
            self.deliver_signal(
                parent,
                deletion,
                Signal::PeeringDownComplete(protocol),
            )?;
        }
        let table = self.detach(deletion)?;
        debug!(
            "{} dropped after {} deletes",
            table.as_route_table().name(),
            table.as_deletion()?.deleted()
        );
        Ok(false)
    }

    /// Start a new generation of the protocol of `origin`, keeping its
    /// routes. Returns the new generation.
    pub fn routing_protocol_restart(
        &mut self,
        origin: TableId,
    ) -> Result<u32, RouteTableError> {
        let protocol = self
            .table_mut(origin)?
            .as_origin_mut()?
            .routing_protocol_restart();
        let genid = protocol.genid();
        self.deliver_signal(origin, origin, Signal::PeeringCameUp(protocol))?;
        Ok(genid)
    }

    /// Schedule the deletion of all routes of `origin` that were not
    /// re-announced since its last restart.
    pub fn sweep_stale_routes(
        &mut self,
        origin: TableId,
    ) -> Result<(), RouteTableError> {
        let genid = self.origin(origin)?.genid();
        debug!("scheduling stale sweep on {} before genid {}", origin, genid);
        self.tasks.push(BackgroundTask::StaleSweep {
            origin,
            genid,
            cursor: None,
        });
        Ok(())
    }

    fn stale_sweep_step(
        &mut self,
        origin: TableId,
        genid: u32,
        cursor: Option<PrefixId<AF>>,
    ) -> Result<TaskStatus<AF>, RouteTableError> {
        let table = self.origin(origin)?;
        if table.genid() != genid {
            debug!("stale sweep on {} superseded by genid {}", origin, table.genid());
            return Ok(TaskStatus::Done);
        }
        let (stale, last, done) =
            table.stale_routes(genid, cursor, self.config.sweep_batch_size());
        for route in stale {
            self.deliver(origin, origin, RouteOp::Delete(route))?;
        }
        if done {
            debug!("stale sweep on {} done", origin);
            return Ok(TaskStatus::Done);
        }
        Ok(TaskStatus::Continue(BackgroundTask::StaleSweep {
            origin,
            genid,
            cursor: last,
        }))
    }

    //-------- Policy -------------------------------------------------------

    /// Swap the filter of `policy`, and schedule the re-evaluation of its
    /// routes.
    pub fn set_policy_filter(
        &mut self,
        policy: TableId,
        filter: Box<dyn RouteFilter<AF, M>>,
    ) -> Result<(), RouteTableError> {
        let epoch = self.table_mut(policy)?.as_policy_mut()?.set_filter(filter);
        self.tasks.push(BackgroundTask::PolicyPush {
            table: policy,
            epoch,
        });
        Ok(())
    }

    /// Schedule the re-evaluation of all routes of `policy` with its
    /// current filter.
    pub fn push_routes(&mut self, policy: TableId) -> Result<(), RouteTableError> {
        let epoch = self.table_mut(policy)?.as_policy_mut()?.push_routes();
        self.tasks.push(BackgroundTask::PolicyPush {
            table: policy,
            epoch,
        });
        Ok(())
    }

    fn policy_push_step(
        &mut self,
        policy: TableId,
        epoch: u64,
    ) -> Result<bool, RouteTableError> {
        let batch = self.config.push_batch_size();
        let step = self
            .table_mut(policy)?
            .as_policy_mut()?
            .push_step(epoch, batch);
        for op in step.ops {
            self.propagate(policy, op)?;
        }
        Ok(step.more)
    }

    //-------- Consumers and dumps ------------------------------------------

    /// The first decision table below `id`.
    fn decision_below(&self, id: TableId) -> Option<TableId> {
        let mut id = self.tables.get(&id)?.as_route_table().child()?;
        loop {
            let table = self.tables.get(&id)?;
            if table.table_type() == TableType::Decision {
                return Some(id);
            }
            id = table.as_route_table().child()?;
        }
    }

    /// Register `consumer` with the redistribution table `redist`. The
    /// routes that exist already are dumped to it in the background.
    pub fn add_consumer(
        &mut self,
        redist: TableId,
        consumer: Box<dyn RouteConsumer<AF, M>>,
    ) -> Result<ConsumerId, RouteTableError> {
        let decision = self.decision_below(redist);
        let id = self.table_mut(redist)?.as_redist_mut()?.add_consumer(consumer);

        let Some(decision) = decision else {
            debug!("no decision table below {}, nothing to dump", redist);
            return Ok(id);
        };
        let dump = self.decision(decision)?.new_dump_iterator();
        let redist_table = self.table_mut(redist)?.as_redist_mut()?;
        if dump.is_done() {
            redist_table.finish_dump(id, dump)?;
        } else {
            redist_table.restore_dump(id, dump)?;
            self.tasks.push(BackgroundTask::Dump {
                decision,
                redist,
                consumer: id,
            });
        }
        Ok(id)
    }

    /// Unregister a consumer. A dump to it that is still running is
    /// cancelled.
    pub fn remove_consumer(
        &mut self,
        redist: TableId,
        consumer: ConsumerId,
    ) -> Result<Box<dyn RouteConsumer<AF, M>>, RouteTableError> {
        self.table_mut(redist)?
            .as_redist_mut()?
            .remove_consumer(consumer)
    }

    fn dump_step(
        &mut self,
        decision: TableId,
        redist: TableId,
        consumer: ConsumerId,
    ) -> Result<bool, RouteTableError> {
        let Some(mut dump) =
            self.table_mut(redist)?.as_redist_mut()?.take_dump(consumer)
        else {
            debug!("dump to {} of {} cancelled", consumer, redist);
            return Ok(false);
        };

        let mut routes = vec![];
        let mut more = true;
        let table = self.decision(decision)?;
        for _ in 0..self.config.dump_batch_size() {
            let step = table.dump_next_route(&mut dump);
            routes.extend(step.route);
            more = step.more;
            if !more {
                break;
            }
        }

        // The tables between the decision table and the redist table may
        // forward a route other than the winner, or none at all.
        let mut forwarded = Vec::with_capacity(routes.len());
        for route in routes {
            forwarded.extend(self.lookup_route(redist, &route.net())?);
        }

        let redist = self.table_mut(redist)?.as_redist_mut()?;
        for route in &forwarded {
            redist.dump_route(consumer, route)?;
        }
        if more {
            redist.restore_dump(consumer, dump)?;
        } else {
            redist.finish_dump(consumer, dump)?;
        }
        Ok(more)
    }

    //-------- Route interest -----------------------------------------------

    /// Set where the register table `register` sends its notifications.
    pub fn set_register_server(
        &mut self,
        register: TableId,
        server: Box<dyn RouteNotifier<AF>>,
    ) -> Result<(), RouteTableError> {
        self.table_mut(register)?.as_register_mut()?.set_server(server);
        Ok(())
    }

    /// Register the interest of `module` in the route for `addr` with the
    /// register table `register`.
    pub fn route_register(
        &mut self,
        register: TableId,
        addr: AF,
        module: &str,
    ) -> Result<RouteRegister<AF, M>, RouteTableError> {
        let range = self.lookup_route_range(register, addr)?;
        Ok(self
            .table_mut(register)?
            .as_register_mut()?
            .register_route_range(range, module))
    }

    pub fn route_deregister(
        &mut self,
        register: TableId,
        valid_subnet: &PrefixId<AF>,
        module: &str,
    ) -> Result<(), RouteTableError> {
        self.table_mut(register)?
            .as_register_mut()?
            .deregister_route_range(valid_subnet, module)
    }

    //-------- Lookups ------------------------------------------------------

    /// Exact match lookup for `net`, starting at `top`.
    pub fn lookup_route(
        &self,
        top: TableId,
        net: &PrefixId<AF>,
    ) -> Result<Option<RouteRef<AF, M>>, RouteTableError> {
        let mut id = top;
        loop {
            let lookup = self.table(id)?.as_route_table().lookup_route(net);
            if lookup.found.is_some() {
                return Ok(lookup.found);
            }
            match lookup.delegate {
                Some(child) => id = child,
                None => return Ok(None),
            }
        }
    }

    /// Longest-prefix match for `addr`, starting at `top`.
    pub fn lookup_route_addr(
        &self,
        top: TableId,
        addr: AF,
    ) -> Result<Option<RouteRef<AF, M>>, RouteTableError> {
        let mut best: Option<RouteRef<AF, M>> = None;
        let mut id = top;
        loop {
            let lookup = self.table(id)?.as_route_table().lookup_route_addr(addr);
            if let Some(found) = lookup.found {
                if best
                    .as_ref()
                    .map_or(true, |b| found.net().len() > b.net().len())
                {
                    best = Some(found);
                }
            }
            match lookup.delegate {
                Some(child) => id = child,
                None => return Ok(best),
            }
        }
    }

    /// Longest-prefix match for `addr`, with the range of addresses over
    /// which the answer holds, starting at `top`.
    pub fn lookup_route_range(
        &self,
        top: TableId,
        addr: AF,
    ) -> Result<RouteRange<AF, RouteRef<AF, M>>, RouteTableError> {
        let mut range: Option<RouteRange<AF, RouteRef<AF, M>>> = None;
        let mut id = top;
        loop {
            let lookup =
                self.table(id)?.as_route_table().lookup_route_range(addr);
            if let Some(found) = lookup.found {
                range = Some(match range {
                    None => found,
                    Some(current) => {
                        let len = |r: &RouteRange<AF, RouteRef<AF, M>>| {
                            r.route().map(|r| i16::from(r.net().len()))
                        };
                        if len(&found).unwrap_or(-1) > len(&current).unwrap_or(-1)
                        {
                            found.intersect(&current)
                        } else {
                            current.intersect(&found)
                        }
                    }
                });
            }
            match lookup.delegate {
                Some(child) => id = child,
                None => break,
            }
        }
        Ok(range.unwrap_or_else(|| {
            RouteRange::new(
                addr,
                None,
                <AF as AddressFamily>::zero(),
                AF::max_addr(),
            )
        }))
    }

    //-------- Background work ----------------------------------------------

    /// The number of background tasks waiting for their next step.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Run a single step of the oldest background task. Returns whether
    /// there was anything to do.
    pub fn run_once(&mut self) -> Result<bool, RouteTableError> {
        let Some(task) = self.tasks.pop() else {
            return Ok(false);
        };
        trace!("background step: {}", task);
        self.counters.inc_background_steps();

        let status = match &task {
            BackgroundTask::DeletionPass { table } => {
                match self.background_deletion_pass(*table) {
                    Ok(true) => Ok(TaskStatus::Continue(task.clone())),
                    Ok(false) => Ok(TaskStatus::Done),
                    Err(err) => Err(err),
                }
            }
            BackgroundTask::PolicyPush { table, epoch } => {
                match self.policy_push_step(*table, *epoch) {
                    Ok(true) => Ok(TaskStatus::Continue(task.clone())),
                    Ok(false) => Ok(TaskStatus::Done),
                    Err(err) => Err(err),
                }
            }
            BackgroundTask::Dump {
                decision,
                redist,
                consumer,
            } => match self.dump_step(*decision, *redist, *consumer) {
                Ok(true) => Ok(TaskStatus::Continue(task.clone())),
                Ok(false) => Ok(TaskStatus::Done),
                Err(err) => Err(err),
            },
            BackgroundTask::StaleSweep {
                origin,
                genid,
                cursor,
            } => self.stale_sweep_step(*origin, *genid, *cursor),
        };

        match status {
            Ok(TaskStatus::Continue(task)) => self.tasks.push(task),
            Ok(TaskStatus::Done) => {}
            // The table the task worked on is gone, so is the task.
            Err(RouteTableError::TableNotFound)
            | Err(RouteTableError::ConsumerNotFound) => {
                debug!("dropping background task: {}", task);
            }
            Err(err) => return Err(err),
        }
        Ok(true)
    }

    /// Run background steps until no task is left. Returns the number of
    /// steps executed.
    pub fn run_until_idle(&mut self) -> Result<usize, RouteTableError> {
        let mut steps = 0;
        while self.run_once()? {
            steps += 1;
        }
        Ok(steps)
    }

    //-------- Statistics ---------------------------------------------------

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn stats(&self) -> Vec<TableStats> {
        self.tables
            .iter()
            .map(|(id, table)| {
                let t = table.as_route_table();
                TableStats {
                    id: *id,
                    name: t.name().to_string(),
                    table_type: t.table_type(),
                    parent: t.parent(),
                    routes: t.route_count(),
                }
            })
            .collect()
    }
}

impl<AF: AddressFamily, M: Meta> std::fmt::Debug for Pipeline<AF, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pipeline ({} pending tasks)", self.tasks.len())?;
        for stats in self.stats() {
            writeln!(f, "  {}", stats)?;
        }
        Ok(())
    }
}
