use std::net::IpAddr;

use inetnum::addr::Prefix;
use log::info;

use super::config::Config;
use super::rib_af::RibAf;
use crate::types::errors::RouteTableError;
use crate::types::stats::Counters;
use crate::types::{AttributeInterner, Meta, PrefixId, RouteRecord};
use crate::{IPv4, IPv6};

//------------ Rib -----------------------------------------------------------

/// A RIB for both IPv4 and IPv6.
///
/// This holds a [RibAf] per address family, sharing one attribute interner,
/// and dispatches every call on the family of the prefix or address it
/// concerns. Protocols are registered with both families at once.
pub struct Rib<M: Meta> {
    v4: RibAf<IPv4, M>,
    v6: RibAf<IPv6, M>,
    interner: AttributeInterner<M>,
}

impl<M: Meta> Rib<M> {
    pub fn new(config: Config) -> Self {
        let interner = AttributeInterner::new();
        info!(
            "new {} RIB",
            if config.multicast { "multicast" } else { "unicast" }
        );
        Self {
            v4: RibAf::new(config.clone(), interner.clone()),
            v6: RibAf::new(config, interner.clone()),
            interner,
        }
    }

    pub fn v4(&self) -> &RibAf<IPv4, M> {
        &self.v4
    }

    pub fn v4_mut(&mut self) -> &mut RibAf<IPv4, M> {
        &mut self.v4
    }

    pub fn v6(&self) -> &RibAf<IPv6, M> {
        &self.v6
    }

    pub fn v6_mut(&mut self) -> &mut RibAf<IPv6, M> {
        &mut self.v6
    }

    pub fn interner(&self) -> &AttributeInterner<M> {
        &self.interner
    }

    pub fn add_igp_table(&mut self, protocol: &str) -> Result<(), RouteTableError> {
        self.v4.add_igp_table(protocol)?;
        self.v6.add_igp_table(protocol)?;
        Ok(())
    }

    pub fn add_egp_table(&mut self, protocol: &str) -> Result<(), RouteTableError> {
        self.v4.add_egp_table(protocol)?;
        self.v6.add_egp_table(protocol)?;
        Ok(())
    }

    pub fn delete_origin_table(
        &mut self,
        protocol: &str,
    ) -> Result<(), RouteTableError> {
        self.v4.delete_origin_table(protocol)?;
        self.v6.delete_origin_table(protocol)?;
        Ok(())
    }

    pub fn restart_protocol(
        &mut self,
        protocol: &str,
    ) -> Result<(), RouteTableError> {
        self.v4.restart_protocol(protocol)?;
        self.v6.restart_protocol(protocol)?;
        Ok(())
    }

    pub fn sweep_stale_routes(
        &mut self,
        protocol: &str,
    ) -> Result<(), RouteTableError> {
        self.v4.sweep_stale_routes(protocol)?;
        self.v6.sweep_stale_routes(protocol)
    }

    pub fn set_protocol_admin_distance(
        &mut self,
        protocol: &str,
        admin_distance: u16,
    ) -> Result<(), RouteTableError> {
        self.v4.set_protocol_admin_distance(protocol, admin_distance)?;
        self.v6.set_protocol_admin_distance(protocol, admin_distance)
    }

    /// Add a route for `prefix` to the RIB of its family. The nexthop must
    /// be of the same family.
    pub fn add_route(
        &mut self,
        protocol: &str,
        prefix: Prefix,
        nexthop: IpAddr,
        attributes: M,
    ) -> Result<(), RouteTableError> {
        af_dispatch!(mut self.v4 | v6, prefix.addr(), |rib, addr| {
            let net = PrefixId::new(addr, prefix.len());
            let entry = rib.route_ip(protocol, net, nexthop, attributes)?;
            rib.add_route(protocol, entry)
        })
    }

    pub fn replace_route(
        &mut self,
        protocol: &str,
        prefix: Prefix,
        nexthop: IpAddr,
        attributes: M,
    ) -> Result<(), RouteTableError> {
        af_dispatch!(mut self.v4 | v6, prefix.addr(), |rib, addr| {
            let net = PrefixId::new(addr, prefix.len());
            let entry = rib.route_ip(protocol, net, nexthop, attributes)?;
            rib.replace_route(protocol, entry)
        })
    }

    pub fn delete_route(
        &mut self,
        protocol: &str,
        prefix: Prefix,
    ) -> Result<(), RouteTableError> {
        af_dispatch!(mut self.v4 | v6, prefix.addr(), |rib, addr| {
            rib.delete_route(protocol, &PrefixId::new(addr, prefix.len()))
        })
    }

    /// The best route covering `addr`.
    pub fn lookup_route(
        &self,
        addr: IpAddr,
    ) -> Result<Option<RouteRecord>, RouteTableError> {
        af_dispatch!(ref self.v4 | v6, addr, |rib, addr| {
            rib.lookup_route(addr).map(|r| r.map(|r| r.to_record()))
        })
    }

    /// The best route for exactly `prefix`.
    pub fn lookup_route_exact(
        &self,
        prefix: Prefix,
    ) -> Result<Option<RouteRecord>, RouteTableError> {
        af_dispatch!(ref self.v4 | v6, prefix.addr(), |rib, addr| {
            rib.lookup_route_exact(&PrefixId::new(addr, prefix.len()))
                .map(|r| r.map(|r| r.to_record()))
        })
    }

    /// All current best routes, IPv4 first.
    pub fn routes(&self) -> Result<Vec<RouteRecord>, RouteTableError> {
        let mut routes = self.v4.routes()?;
        routes.extend(self.v6.routes()?);
        Ok(routes)
    }

    pub fn run_until_idle(&mut self) -> Result<usize, RouteTableError> {
        Ok(self.v4.run_until_idle()? + self.v6.run_until_idle()?)
    }

    pub fn pending_tasks(&self) -> usize {
        self.v4.pending_tasks() + self.v6.pending_tasks()
    }

    pub fn counters(&self) -> Counters {
        self.v4.counters() + self.v6.counters()
    }
}

impl<M: Meta> Default for Rib<M> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
