use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::types::af::fmt_addr;
use crate::types::attributes::{AttrRef, Meta};
use crate::types::prefix_id::PrefixId;
use crate::types::protocol::Protocol;
use crate::AddressFamily;

//------------ Vif -----------------------------------------------------------

/// The name of the (virtual) interface a route's nexthop is reached over.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vif(Arc<str>);

impl Vif {
    pub fn new(name: &str) -> Self {
        Vif(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//------------ PolicyTags ----------------------------------------------------

/// The set of policy tags attached to a route by filters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PolicyTags(BTreeSet<u32>);

impl PolicyTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: u32) -> bool {
        self.0.insert(tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for PolicyTags {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        PolicyTags(iter.into_iter().collect())
    }
}

//------------ RouteEntry ----------------------------------------------------

/// The reachability of one destination, as announced by one source.
///
/// A RouteEntry is immutable once it is shared as a [RouteRef]: replacing a
/// route means swapping the reference held by a table, never changing the
/// entry in place. Tables that merely forward a route forward the reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry<AF: AddressFamily, M: Meta> {
    net: PrefixId<AF>,
    nexthop: AF,
    vif: Option<Vif>,
    attributes: AttrRef<M>,
    protocol: Protocol,
    admin_distance: u16,
    metric: u32,
    policy_tags: PolicyTags,
}

/// The shared, immutable handle to a route that tables store and forward.
pub type RouteRef<AF, M> = Arc<RouteEntry<AF, M>>;

impl<AF: AddressFamily, M: Meta> RouteEntry<AF, M> {
    pub fn new(
        net: PrefixId<AF>,
        nexthop: AF,
        protocol: Protocol,
        attributes: AttrRef<M>,
    ) -> Self {
        Self {
            net,
            nexthop,
            vif: None,
            attributes,
            protocol,
            admin_distance: u16::from(u8::MAX),
            metric: 0,
            policy_tags: PolicyTags::new(),
        }
    }

    pub fn with_vif(mut self, vif: Vif) -> Self {
        self.vif = Some(vif);
        self
    }

    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_admin_distance(mut self, admin_distance: u16) -> Self {
        self.admin_distance = admin_distance;
        self
    }

    pub fn with_policy_tags(mut self, policy_tags: PolicyTags) -> Self {
        self.policy_tags = policy_tags;
        self
    }

    pub fn with_attributes(mut self, attributes: AttrRef<M>) -> Self {
        self.attributes = attributes;
        self
    }

    pub(crate) fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// This route, forwarded over the IGP route `igp` that covers its
    /// nexthop. It takes the vif of `igp`, and the nexthop as well unless
    /// `igp` is a directly connected subnet, where the nexthop is a
    /// neighbour already.
    pub(crate) fn resolved_over(&self, igp: &RouteEntry<AF, M>) -> Self {
        let mut resolved = self.clone();
        if !igp.protocol.is_connected() {
            resolved.nexthop = igp.nexthop;
        }
        resolved.vif = igp.vif.clone();
        resolved
    }

    pub fn net(&self) -> PrefixId<AF> {
        self.net
    }

    pub fn nexthop(&self) -> AF {
        self.nexthop
    }

    pub fn vif(&self) -> Option<&Vif> {
        self.vif.as_ref()
    }

    pub fn attributes(&self) -> &AttrRef<M> {
        &self.attributes
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The generation of the protocol instance that learned this route.
    pub fn genid(&self) -> u32 {
        self.protocol.genid()
    }

    pub fn admin_distance(&self) -> u16 {
        self.admin_distance
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn policy_tags(&self) -> &PolicyTags {
        &self.policy_tags
    }

    pub fn to_record(&self) -> RouteRecord {
        RouteRecord {
            prefix: self.net.to_string(),
            nexthop: self.nexthop.into_ipaddr(),
            vif: self.vif.as_ref().map(|v| v.name().to_string()),
            protocol: self.protocol.name().to_string(),
            genid: self.protocol.genid(),
            admin_distance: self.admin_distance,
            metric: self.metric,
            policy_tags: self.policy_tags.iter().collect(),
            attributes: self.attributes.to_string(),
        }
    }
}

impl<AF: AddressFamily, M: Meta> fmt::Display for RouteEntry<AF, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} nexthop {}", self.net, fmt_addr(self.nexthop))?;
        if let Some(vif) = &self.vif {
            write!(f, " vif {}", vif)?;
        }
        write!(
            f,
            " metric {} distance {} protocol {} {}",
            self.metric, self.admin_distance, self.protocol, self.attributes
        )
    }
}

//------------ RouteRecord ---------------------------------------------------

/// A self-contained, serializable view of a route, for management
/// interfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub prefix: String,
    pub nexthop: std::net::IpAddr,
    pub vif: Option<String>,
    pub protocol: String,
    pub genid: u32,
    pub admin_distance: u16,
    pub metric: u32,
    pub policy_tags: Vec<u32>,
    pub attributes: String,
}
