use std::fmt;

use crate::types::af::fmt_addr;
use crate::types::errors::RouteTableError;
use crate::AddressFamily;

//------------ PrefixId ------------------------------------------------------

/// A normalized prefix (net) of one address family.
///
/// The host bits of `net` are always zero. PrefixIds are ordered by
/// `(net, len)`, which is the pre-order in which a binary prefix trie visits
/// them: a covering prefix sorts directly before its more-specifics.
#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Debug, Copy, Clone)]
pub struct PrefixId<AF: AddressFamily> {
    net: AF,
    len: u8,
}

impl<AF: AddressFamily> PrefixId<AF> {
    /// Create a PrefixId, zeroing the host bits of `net`. Lengths beyond the
    /// width of the family are clamped.
    pub fn new(net: AF, len: u8) -> Self {
        let len = len.min(AF::BITS);
        PrefixId {
            net: net.truncate_to_len(len),
            len,
        }
    }

    /// The host prefix (full length) for `addr`.
    pub fn host(addr: AF) -> Self {
        PrefixId {
            net: addr,
            len: AF::BITS,
        }
    }

    /// The default route, covering the whole family.
    pub fn default_route() -> Self {
        PrefixId {
            net: <AF as AddressFamily>::zero(),
            len: 0,
        }
    }

    pub fn net(&self) -> AF {
        self.net
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_default(&self) -> bool {
        self.len == 0
    }

    pub fn first_addr(&self) -> AF {
        self.net
    }

    pub fn last_addr(&self) -> AF {
        self.net.last_in_len(self.len)
    }

    pub fn truncate_to_len(self, len: u8) -> Self {
        Self::new(self.net, len.min(self.len))
    }

    pub fn contains_addr(&self, addr: AF) -> bool {
        addr.truncate_to_len(self.len) == self.net
    }

    /// Returns true if `other` is equal to, or a more-specific of, self.
    pub fn covers(&self, other: &Self) -> bool {
        self.len <= other.len && other.net.truncate_to_len(self.len) == self.net
    }

    /// The bit of the net at position `pos`.
    pub(crate) fn bit_at(&self, pos: u8) -> bool {
        self.net.bit_at(pos)
    }

    /// The length of the longest prefix covering both self and other.
    pub(crate) fn common_len(&self, other: &Self) -> u8 {
        self.net
            .common_prefix_len(other.net)
            .min(self.len)
            .min(other.len)
    }
}

impl<AF: AddressFamily> fmt::Display for PrefixId<AF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", fmt_addr(self.net), self.len)
    }
}

impl<AF: AddressFamily> TryFrom<inetnum::addr::Prefix> for PrefixId<AF> {
    type Error = RouteTableError;

    fn try_from(value: inetnum::addr::Prefix) -> Result<Self, Self::Error> {
        AF::try_from_ipaddr(value.addr())
            .map(|net| PrefixId::new(net, value.len()))
            .ok_or(RouteTableError::FamilyMismatch)
    }
}

// A PrefixId is normalized and its length never exceeds the family width,
// so inetnum accepts every value we can hand it.
#[allow(clippy::unwrap_used)]
impl<AF: AddressFamily> From<PrefixId<AF>> for inetnum::addr::Prefix {
    fn from(value: PrefixId<AF>) -> Self {
        Self::new(value.net().into_ipaddr(), value.len()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IPv4;
    use std::str::FromStr;

    fn pfx(s: &str) -> PrefixId<IPv4> {
        PrefixId::try_from(inetnum::addr::Prefix::from_str(s).unwrap())
            .unwrap()
    }

    #[test]
    fn normalizes_host_bits() {
        let p = PrefixId::new(
            IPv4::from_ipaddr(std::net::Ipv4Addr::new(10, 1, 2, 3)),
            8,
        );
        assert_eq!(p, pfx("10.0.0.0/8"));
        assert_eq!(p.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn ordering_is_pre_order() {
        let mut v = vec![
            pfx("10.1.0.0/16"),
            pfx("10.0.0.0/8"),
            pfx("0.0.0.0/0"),
            pfx("10.0.0.0/16"),
            pfx("11.0.0.0/8"),
        ];
        v.sort();
        let s: Vec<String> = v.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            s,
            vec![
                "0.0.0.0/0",
                "10.0.0.0/8",
                "10.0.0.0/16",
                "10.1.0.0/16",
                "11.0.0.0/8"
            ]
        );
    }

    #[test]
    fn covers() {
        assert!(pfx("10.0.0.0/8").covers(&pfx("10.1.0.0/16")));
        assert!(pfx("10.0.0.0/8").covers(&pfx("10.0.0.0/8")));
        assert!(!pfx("10.1.0.0/16").covers(&pfx("10.0.0.0/8")));
        assert!(!pfx("10.0.0.0/8").covers(&pfx("11.0.0.0/16")));
        assert_eq!(pfx("10.0.0.0/8").common_len(&pfx("11.0.0.0/8")), 7);
    }

    #[test]
    fn family_mismatch() {
        let v6 = inetnum::addr::Prefix::from_str("2001:db8::/32").unwrap();
        assert_eq!(
            PrefixId::<IPv4>::try_from(v6),
            Err(RouteTableError::FamilyMismatch)
        );
    }
}
