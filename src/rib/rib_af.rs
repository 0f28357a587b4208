use std::collections::BTreeMap;
use std::net::IpAddr;

use log::{debug, info};

use super::config::Config;
use super::pipeline::Pipeline;
use super::vif::{RibVif, VifAddr};
use crate::tables::{
    accept_all, ConsumerId, NotifyingConsumer, RouteConsumer, RouteFilter,
    RouteNotifier, RouteRegister, TableId,
};
use crate::trie::RouteRange;
use crate::types::errors::RouteTableError;
use crate::types::stats::{Counters, TableStats};
use crate::types::{
    AttributeInterner, Meta, PrefixId, Protocol, ProtocolKind, RouteEntry,
    RouteRecord, RouteRef, CONNECTED,
};
use crate::AddressFamily;

//------------ ProtocolTables ------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolTables {
    pub origin: TableId,
    pub policy: TableId,
}

//------------ RibAf ---------------------------------------------------------

/// The RIB for one address family.
///
/// Every routing protocol gets its own origin table, followed by a policy
/// table. All policy tables feed a single decision table. Its winners go
/// through the register table, which tracks the clients interested in the
/// routes for addresses, to the redistribution table that consumers
/// register with:
///
/// ```text
///  origin (static) -> policy --\
///  origin (ospf)   -> policy ---> decision -> register -> redist -> consumers
///  origin (ebgp)   -> policy --/
/// ```
///
/// With [Config::resolve_egp_nexthops] set, an extint table between the
/// decision and the register table resolves the nexthops of EGP winners
/// over the IGP winners.
///
/// The policy tables accept everything until a filter is set for them.
pub struct RibAf<AF: AddressFamily, M: Meta> {
    pipeline: Pipeline<AF, M>,
    interner: AttributeInterner<M>,
    decision: TableId,
    extint: Option<TableId>,
    register: TableId,
    redist: TableId,
    protocols: BTreeMap<String, ProtocolTables>,
    admin_distances: BTreeMap<String, u16>,
    vifs: BTreeMap<String, RibVif<AF>>,
}

impl<AF: AddressFamily, M: Meta> RibAf<AF, M> {
    pub fn new(config: Config, interner: AttributeInterner<M>) -> Self {
        let mut pipeline = Pipeline::new(config);
        let family = if AF::BITS == 32 { "ipv4" } else { "ipv6" };
        let decision =
            pipeline.create_decision_table(&format!("{}-decision", family));
        let register =
            pipeline.create_register_table(&format!("{}-register", family));
        let redist =
            pipeline.create_redist_table(&format!("{}-redist", family));
        let extint = if pipeline.config().resolve_egp_nexthops {
            Some(pipeline.create_extint_table(&format!("{}-extint", family)))
        } else {
            None
        };

        let mut rib = Self {
            pipeline,
            interner,
            decision,
            extint,
            register,
            redist,
            protocols: BTreeMap::new(),
            admin_distances: BTreeMap::new(),
            vifs: BTreeMap::new(),
        };
        // All tables are fresh and unplumbed, so this can only fail on a
        // broken build.
        if let Err(err) = rib.plumb_core() {
            log::error!("cannot build the {} RIB: {}", family, err);
        }
        rib
    }

    fn plumb_core(&mut self) -> Result<(), RouteTableError> {
        self.pipeline.plumb(self.decision, self.redist)?;
        self.pipeline.splice(self.decision, self.register)?;
        if let Some(extint) = self.extint {
            self.pipeline.splice(self.decision, extint)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        self.pipeline.config()
    }

    pub fn interner(&self) -> &AttributeInterner<M> {
        &self.interner
    }

    pub fn pipeline(&self) -> &Pipeline<AF, M> {
        &self.pipeline
    }

    /// Direct access to the tables, for splicing in debug tables and the
    /// like.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline<AF, M> {
        &mut self.pipeline
    }

    pub fn decision_table(&self) -> TableId {
        self.decision
    }

    pub fn redist_table(&self) -> TableId {
        self.redist
    }

    pub fn register_table(&self) -> TableId {
        self.register
    }

    /// The table resolving EGP nexthops, if the RIB has one.
    pub fn extint_table(&self) -> Option<TableId> {
        self.extint
    }

    pub fn protocol_tables(
        &self,
        protocol: &str,
    ) -> Result<ProtocolTables, RouteTableError> {
        self.protocols
            .get(protocol)
            .copied()
            .ok_or(RouteTableError::ProtocolNotFound)
    }

    pub fn protocol_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.protocols.keys().map(String::as_str)
    }

    //-------- Protocols ----------------------------------------------------

    pub fn add_igp_table(
        &mut self,
        protocol: &str,
    ) -> Result<TableId, RouteTableError> {
        self.add_origin_table(protocol, ProtocolKind::Igp)
    }

    pub fn add_egp_table(
        &mut self,
        protocol: &str,
    ) -> Result<TableId, RouteTableError> {
        self.add_origin_table(protocol, ProtocolKind::Egp)
    }

    // Adding a protocol that exists already restarts it: the routes it had
    // stay until they are re-announced or swept.
    fn add_origin_table(
        &mut self,
        name: &str,
        kind: ProtocolKind,
    ) -> Result<TableId, RouteTableError> {
        if let Some(tables) = self.protocols.get(name) {
            let origin = tables.origin;
            info!("protocol {} registered again, restarting it", name);
            self.pipeline.routing_protocol_restart(origin)?;
            return Ok(origin);
        }

        let admin_distance = match self.admin_distances.get(name) {
            Some(distance) => *distance,
            None => self.pipeline.config().admin_distance(name),
        };
        let origin = self.pipeline.create_origin_table(
            name,
            Protocol::new(name, kind),
            admin_distance,
        );
        let policy = self.pipeline.create_policy_table(
            &format!("{}-policy", name),
            Box::new(accept_all::<AF, M>),
        );
        self.pipeline.plumb(origin, policy)?;
        self.pipeline.plumb(policy, self.decision)?;
        self.protocols
            .insert(name.to_string(), ProtocolTables { origin, policy });
        Ok(origin)
    }

    /// Shut the protocol down: all its routes are withdrawn in the
    /// background. The origin table stays, so the protocol can come back.
    pub fn delete_origin_table(
        &mut self,
        protocol: &str,
    ) -> Result<Option<TableId>, RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.routing_protocol_shutdown(origin)
    }

    /// Start a new generation of the protocol. Returns the generation.
    pub fn restart_protocol(
        &mut self,
        protocol: &str,
    ) -> Result<u32, RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.routing_protocol_restart(origin)
    }

    /// Withdraw, in the background, the routes of the protocol that were
    /// not re-announced since its last restart.
    pub fn sweep_stale_routes(
        &mut self,
        protocol: &str,
    ) -> Result<(), RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.sweep_stale_routes(origin)
    }

    /// Set the administrative distance for a protocol that has not been
    /// added yet.
    pub fn set_protocol_admin_distance(
        &mut self,
        protocol: &str,
        admin_distance: u16,
    ) -> Result<(), RouteTableError> {
        if self.protocols.contains_key(protocol) {
            return Err(RouteTableError::ProtocolExists);
        }
        debug!("admin distance for {} set to {}", protocol, admin_distance);
        self.admin_distances
            .insert(protocol.to_string(), admin_distance);
        Ok(())
    }

    pub fn set_policy_filter(
        &mut self,
        protocol: &str,
        filter: Box<dyn RouteFilter<AF, M>>,
    ) -> Result<(), RouteTableError> {
        let policy = self.protocol_tables(protocol)?.policy;
        self.pipeline.set_policy_filter(policy, filter)
    }

    //-------- Routes -------------------------------------------------------

    /// Build a route for `protocol`, interning its attributes.
    pub fn route(
        &self,
        protocol: &str,
        net: PrefixId<AF>,
        nexthop: AF,
        attributes: M,
    ) -> Result<RouteEntry<AF, M>, RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        let protocol = self.pipeline.origin(origin)?.protocol().clone();
        Ok(RouteEntry::new(
            net,
            nexthop,
            protocol,
            self.interner.intern(attributes),
        ))
    }

    /// Like [RibAf::route], with a nexthop that may be of either family.
    pub fn route_ip(
        &self,
        protocol: &str,
        net: PrefixId<AF>,
        nexthop: IpAddr,
        attributes: M,
    ) -> Result<RouteEntry<AF, M>, RouteTableError> {
        let nexthop = AF::try_from_ipaddr(nexthop)
            .ok_or(RouteTableError::FamilyMismatch)?;
        self.route(protocol, net, nexthop, attributes)
    }

    pub fn add_route(
        &mut self,
        protocol: &str,
        entry: RouteEntry<AF, M>,
    ) -> Result<(), RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.add_route(origin, entry)
    }

    pub fn replace_route(
        &mut self,
        protocol: &str,
        entry: RouteEntry<AF, M>,
    ) -> Result<(), RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.replace_route(origin, entry)
    }

    pub fn delete_route(
        &mut self,
        protocol: &str,
        net: &PrefixId<AF>,
    ) -> Result<(), RouteTableError> {
        let origin = self.protocol_tables(protocol)?.origin;
        self.pipeline.delete_route(origin, net)
    }

    //-------- Lookups ------------------------------------------------------

    /// The best route covering `addr`.
    pub fn lookup_route(
        &self,
        addr: AF,
    ) -> Result<Option<RouteRef<AF, M>>, RouteTableError> {
        self.pipeline.lookup_route_addr(self.redist, addr)
    }

    /// The best route for exactly `net`.
    pub fn lookup_route_exact(
        &self,
        net: &PrefixId<AF>,
    ) -> Result<Option<RouteRef<AF, M>>, RouteTableError> {
        self.pipeline.lookup_route(self.redist, net)
    }

    pub fn lookup_route_range(
        &self,
        addr: AF,
    ) -> Result<RouteRange<AF, RouteRef<AF, M>>, RouteTableError> {
        self.pipeline.lookup_route_range(self.redist, addr)
    }

    /// All current best routes, in net order. EGP routes appear with their
    /// nexthop resolved, if the RIB resolves them.
    pub fn routes(&self) -> Result<Vec<RouteRecord>, RouteTableError> {
        if let Some(extint) = self.extint {
            return Ok(self
                .pipeline
                .extint(extint)?
                .routes()
                .map(|(_, route)| route.to_record())
                .collect());
        }
        Ok(self
            .pipeline
            .decision(self.decision)?
            .winners()
            .map(|(_, route)| route.to_record())
            .collect())
    }

    //-------- Route interest -----------------------------------------------

    /// Set the notifier that registered clients are told about changes to
    /// the routes they registered for through.
    pub fn set_register_server<N>(
        &mut self,
        server: N,
    ) -> Result<(), RouteTableError>
    where
        N: RouteNotifier<AF> + 'static,
    {
        self.pipeline
            .set_register_server(self.register, Box::new(server))
    }

    /// Look up the route for `addr` on behalf of `module`, and keep `module`
    /// informed about changes to it. The answer holds for the whole valid
    /// subnet of the returned registration.
    pub fn route_register(
        &mut self,
        addr: AF,
        module: &str,
    ) -> Result<RouteRegister<AF, M>, RouteTableError> {
        self.pipeline.route_register(self.register, addr, module)
    }

    pub fn route_deregister(
        &mut self,
        valid_subnet: &PrefixId<AF>,
        module: &str,
    ) -> Result<(), RouteTableError> {
        self.pipeline
            .route_deregister(self.register, valid_subnet, module)
    }

    //-------- Consumers ----------------------------------------------------

    /// Register a consumer of the best routes. The routes that exist
    /// already are dumped to it in the background.
    pub fn add_redistributor(
        &mut self,
        consumer: Box<dyn RouteConsumer<AF, M>>,
    ) -> Result<ConsumerId, RouteTableError> {
        self.pipeline.add_consumer(self.redist, consumer)
    }

    /// Register a client that is notified of changes to the best routes
    /// under the name `target`.
    pub fn add_notifier<N>(
        &mut self,
        target: &str,
        notifier: N,
    ) -> Result<ConsumerId, RouteTableError>
    where
        N: RouteNotifier<AF> + 'static,
    {
        let multicast = self.pipeline.config().multicast;
        self.add_redistributor(Box::new(NotifyingConsumer::new(
            target, multicast, notifier,
        )))
    }

    pub fn remove_redistributor(
        &mut self,
        consumer: ConsumerId,
    ) -> Result<Box<dyn RouteConsumer<AF, M>>, RouteTableError> {
        self.pipeline.remove_consumer(self.redist, consumer)
    }

    //-------- Background work and statistics -------------------------------

    pub fn run_once(&mut self) -> Result<bool, RouteTableError> {
        self.pipeline.run_once()
    }

    pub fn run_until_idle(&mut self) -> Result<usize, RouteTableError> {
        self.pipeline.run_until_idle()
    }

    pub fn pending_tasks(&self) -> usize {
        self.pipeline.pending_tasks()
    }

    pub fn counters(&self) -> Counters {
        self.pipeline.counters()
    }

    pub fn stats(&self) -> Vec<TableStats> {
        self.pipeline.stats()
    }
}

//------------ Vifs ----------------------------------------------------------

/// The subnets of the router's own interfaces become routes of the
/// `connected` protocol, an IGP that is added with the first vif that is up
/// and has an address. Connected routes carry default attributes.
impl<AF: AddressFamily, M: Meta + Default> RibAf<AF, M> {
    pub fn vif(&self, name: &str) -> Option<&RibVif<AF>> {
        self.vifs.get(name)
    }

    pub fn vifs(&self) -> impl Iterator<Item = &RibVif<AF>> + '_ {
        self.vifs.values()
    }

    pub fn new_vif(&mut self, vif: RibVif<AF>) -> Result<(), RouteTableError> {
        let name = vif.name().name().to_string();
        if self.vifs.contains_key(&name) {
            return Err(RouteTableError::VifExists);
        }
        debug!("new vif {}", name);
        if vif.is_up() {
            for addr in vif.addrs() {
                self.add_connected_route(&vif, addr)?;
            }
        }
        self.vifs.insert(name, vif);
        Ok(())
    }

    /// Remove the vif `name`, withdrawing its connected routes.
    pub fn delete_vif(
        &mut self,
        name: &str,
    ) -> Result<RibVif<AF>, RouteTableError> {
        let vif = self.vifs.remove(name).ok_or(RouteTableError::VifNotFound)?;
        debug!("vif {} deleted", name);
        if vif.is_up() {
            for addr in vif.addrs() {
                self.delete_connected_route(&vif, addr)?;
            }
        }
        Ok(vif)
    }

    /// Bring the vif `name` up or down, adding or withdrawing its connected
    /// routes.
    pub fn set_vif_enabled(
        &mut self,
        name: &str,
        up: bool,
    ) -> Result<(), RouteTableError> {
        let vif = self.vifs.get_mut(name).ok_or(RouteTableError::VifNotFound)?;
        if vif.is_up() == up {
            return Ok(());
        }
        vif.set_up(up);
        let vif = vif.clone();
        info!("vif {} is {}", name, if up { "up" } else { "down" });
        for addr in vif.addrs() {
            if up {
                self.add_connected_route(&vif, addr)?;
            } else {
                self.delete_connected_route(&vif, addr)?;
            }
        }
        Ok(())
    }

    pub fn add_vif_addr(
        &mut self,
        name: &str,
        addr: VifAddr<AF>,
    ) -> Result<(), RouteTableError> {
        let vif = self.vifs.get_mut(name).ok_or(RouteTableError::VifNotFound)?;
        if !vif.add_addr(addr) {
            debug!("vif {} has {} already", name, addr);
            return Ok(());
        }
        let vif = vif.clone();
        if vif.is_up() {
            self.add_connected_route(&vif, &addr)?;
        }
        Ok(())
    }

    pub fn delete_vif_addr(
        &mut self,
        name: &str,
        addr: AF,
    ) -> Result<(), RouteTableError> {
        let vif = self.vifs.get_mut(name).ok_or(RouteTableError::VifNotFound)?;
        let Some(removed) = vif.remove_addr(addr) else {
            return Err(RouteTableError::RouteNotFound);
        };
        let vif = vif.clone();
        if vif.is_up() {
            self.delete_connected_route(&vif, &removed)?;
        }
        Ok(())
    }

    fn add_connected_route(
        &mut self,
        vif: &RibVif<AF>,
        addr: &VifAddr<AF>,
    ) -> Result<(), RouteTableError> {
        if !self.protocols.contains_key(CONNECTED) {
            self.add_igp_table(CONNECTED)?;
        }
        for (net, nexthop) in vif.connected_routes(addr) {
            let entry = self
                .route(CONNECTED, net, nexthop, M::default())?
                .with_vif(vif.name().clone());
            self.add_route(CONNECTED, entry)?;
        }
        Ok(())
    }

    fn delete_connected_route(
        &mut self,
        vif: &RibVif<AF>,
        addr: &VifAddr<AF>,
    ) -> Result<(), RouteTableError> {
        for (net, _) in vif.connected_routes(addr) {
            match self.delete_route(CONNECTED, &net) {
                Ok(()) => {}
                Err(RouteTableError::RouteNotFound) => {
                    debug!("connected route {} is gone already", net);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
