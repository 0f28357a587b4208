//! The router's own interfaces, as far as the RIB is concerned: the subnets
//! they are attached to become routes of the `connected` protocol.
use std::fmt;

use crate::types::af::fmt_addr;
use crate::types::{PrefixId, Vif};
use crate::AddressFamily;

//------------ VifAddr -------------------------------------------------------

/// An address configured on a vif.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VifAddr<AF: AddressFamily> {
    addr: AF,
    subnet: PrefixId<AF>,
    peer: Option<AF>,
}

impl<AF: AddressFamily> VifAddr<AF> {
    /// The address `addr` on the subnet of length `len` around it.
    pub fn new(addr: AF, len: u8) -> Self {
        Self {
            addr,
            subnet: PrefixId::new(addr, len),
            peer: None,
        }
    }

    /// The address of the other end of a point-to-point link.
    pub fn with_peer(mut self, peer: AF) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn addr(&self) -> AF {
        self.addr
    }

    pub fn subnet(&self) -> PrefixId<AF> {
        self.subnet
    }

    pub fn peer(&self) -> Option<AF> {
        self.peer
    }
}

impl<AF: AddressFamily> fmt::Display for VifAddr<AF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", fmt_addr(self.addr), self.subnet)?;
        if let Some(peer) = self.peer {
            write!(f, " peer {}", fmt_addr(peer))?;
        }
        Ok(())
    }
}

//------------ RibVif --------------------------------------------------------

/// A (virtual) interface of the router, with its addresses.
///
/// While a vif is up, every subnet it has an address on is a directly
/// connected route. On a point-to-point vif, the peer address is one too
/// when it lies outside the subnet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RibVif<AF: AddressFamily> {
    name: Vif,
    up: bool,
    point_to_point: bool,
    addrs: Vec<VifAddr<AF>>,
}

impl<AF: AddressFamily> RibVif<AF> {
    /// A new vif that is up and has no addresses.
    pub fn new(name: &str) -> Self {
        Self {
            name: Vif::new(name),
            up: true,
            point_to_point: false,
            addrs: vec![],
        }
    }

    pub fn point_to_point(mut self) -> Self {
        self.point_to_point = true;
        self
    }

    pub fn with_addr(mut self, addr: VifAddr<AF>) -> Self {
        self.addrs.push(addr);
        self
    }

    pub fn down(mut self) -> Self {
        self.up = false;
        self
    }

    pub fn name(&self) -> &Vif {
        &self.name
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_point_to_point(&self) -> bool {
        self.point_to_point
    }

    pub fn addrs(&self) -> &[VifAddr<AF>] {
        &self.addrs
    }

    pub(crate) fn set_up(&mut self, up: bool) {
        self.up = up;
    }

    /// Returns false if the address was there already.
    pub(crate) fn add_addr(&mut self, addr: VifAddr<AF>) -> bool {
        if self.addrs.iter().any(|a| a.addr == addr.addr) {
            return false;
        }
        self.addrs.push(addr);
        true
    }

    pub(crate) fn remove_addr(&mut self, addr: AF) -> Option<VifAddr<AF>> {
        let pos = self.addrs.iter().position(|a| a.addr == addr)?;
        Some(self.addrs.remove(pos))
    }

    /// The directly connected routes for `addr`, as `(net, nexthop)`.
    pub(crate) fn connected_routes(
        &self,
        addr: &VifAddr<AF>,
    ) -> Vec<(PrefixId<AF>, AF)> {
        let mut routes = vec![(addr.subnet, addr.addr)];
        if self.point_to_point {
            let zero = <AF as AddressFamily>::zero();
            if let Some(peer) = addr.peer {
                if peer != zero && !addr.subnet.contains_addr(peer) {
                    routes.push((PrefixId::host(peer), peer));
                }
            }
        }
        routes
    }
}
