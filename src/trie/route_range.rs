use std::fmt;

use super::PrefixTrie;
use crate::types::af::fmt_addr;
use crate::types::PrefixId;
use crate::AddressFamily;

//------------ RouteRange ----------------------------------------------------

/// The answer to a longest-prefix-match lookup for an address, together
/// with the range of addresses for which that answer is the same.
///
/// Every address in `bottom..=top` has the same longest matching route (or
/// the same absence of one) as `addr`. Consumers that install forwarding
/// state use this to avoid a lookup per address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRange<AF: AddressFamily, T> {
    addr: AF,
    route: Option<T>,
    bottom: AF,
    top: AF,
}

impl<AF: AddressFamily, T> RouteRange<AF, T> {
    pub fn new(addr: AF, route: Option<T>, bottom: AF, top: AF) -> Self {
        Self {
            addr,
            route,
            bottom,
            top,
        }
    }

    pub fn addr(&self) -> AF {
        self.addr
    }

    pub fn route(&self) -> Option<&T> {
        self.route.as_ref()
    }

    pub fn into_route(self) -> Option<T> {
        self.route
    }

    pub fn bottom(&self) -> AF {
        self.bottom
    }

    pub fn top(&self) -> AF {
        self.top
    }

    pub fn contains(&self, addr: AF) -> bool {
        self.bottom <= addr && addr <= self.top
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RouteRange<AF, U> {
        RouteRange {
            addr: self.addr,
            route: self.route.map(f),
            bottom: self.bottom,
            top: self.top,
        }
    }

    /// Narrow this range to the part it shares with `other`, keeping this
    /// range's route.
    pub fn intersect<U>(mut self, other: &RouteRange<AF, U>) -> Self {
        self.bottom = self.bottom.max(other.bottom);
        self.top = self.top.min(other.top);
        self
    }

    /// The shortest prefix that contains `addr` and lies entirely within
    /// the range.
    pub fn minimal_net(&self) -> PrefixId<AF> {
        (0..AF::BITS)
            .map(|len| PrefixId::new(self.addr, len))
            .find(|p| p.first_addr() >= self.bottom && p.last_addr() <= self.top)
            .unwrap_or_else(|| PrefixId::host(self.addr))
    }
}

impl<AF: AddressFamily, T: fmt::Display> fmt::Display for RouteRange<AF, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{}, {}]: ",
            fmt_addr(self.addr),
            fmt_addr(self.bottom),
            fmt_addr(self.top)
        )?;
        match &self.route {
            Some(route) => write!(f, "{}", route),
            None => write!(f, "no route"),
        }
    }
}

impl<AF: AddressFamily, V> PrefixTrie<AF, V> {
    /// Longest-prefix match for `addr`, with the range over which the match
    /// does not change.
    pub fn route_range(&self, addr: AF) -> RouteRange<AF, (PrefixId<AF>, &V)> {
        let best = self.longest_match_addr(addr);
        let scope = best.map_or(PrefixId::default_route(), |(p, _)| p);

        let mut bottom = scope.first_addr();
        let mut top = scope.last_addr();

        // None of the more-specifics of the best match contain addr, they
        // punch holes into the scope below or above it. They come in net
        // order, so the first one above addr sets the top.
        for (p, _) in self.more_specifics(&scope) {
            if p.first_addr() > addr {
                if let Some(t) = p.first_addr().checked_predecessor() {
                    top = top.min(t);
                }
                break;
            }
            if p.last_addr() < addr {
                if let Some(b) = p.last_addr().checked_successor() {
                    bottom = bottom.max(b);
                }
            }
        }

        RouteRange::new(addr, best, bottom, top)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::IPv4;
    use std::str::FromStr;

    fn pfx(s: &str) -> PrefixId<IPv4> {
        PrefixId::try_from(inetnum::addr::Prefix::from_str(s).unwrap())
            .unwrap()
    }

    fn addr(s: &str) -> IPv4 {
        IPv4::from_ipaddr(std::net::Ipv4Addr::from_str(s).unwrap())
    }

    #[test]
    fn holes_bound_the_range() {
        let mut trie = PrefixTrie::new();
        trie.insert(pfx("10.0.0.0/8"), "a");
        trie.insert(pfx("10.1.0.0/16"), "b");
        trie.insert(pfx("10.3.0.0/16"), "c");

        let rr = trie.route_range(addr("10.2.3.4"));
        assert_eq!(rr.route().map(|(p, _)| *p), Some(pfx("10.0.0.0/8")));
        assert_eq!(rr.bottom(), addr("10.2.0.0"));
        assert_eq!(rr.top(), addr("10.2.255.255"));
        assert_eq!(rr.minimal_net(), pfx("10.2.0.0/16"));

        let rr = trie.route_range(addr("10.1.0.1"));
        assert_eq!(rr.route().map(|(_, v)| **v), Some("b"));
        assert_eq!(rr.bottom(), addr("10.1.0.0"));
        assert_eq!(rr.top(), addr("10.1.255.255"));
    }

    #[test]
    fn no_match_range() {
        let mut trie = PrefixTrie::new();
        trie.insert(pfx("10.0.0.0/8"), ());
        trie.insert(pfx("12.0.0.0/8"), ());

        let rr = trie.route_range(addr("11.1.1.1"));
        assert!(rr.route().is_none());
        assert_eq!(rr.bottom(), addr("11.0.0.0"));
        assert_eq!(rr.top(), addr("11.255.255.255"));
        assert_eq!(rr.minimal_net(), pfx("11.0.0.0/8"));

        let empty: PrefixTrie<IPv4, ()> = PrefixTrie::new();
        let rr = empty.route_range(addr("1.2.3.4"));
        assert_eq!(rr.bottom(), <IPv4 as AddressFamily>::zero());
        assert_eq!(rr.top(), IPv4::max_addr());
        assert_eq!(rr.minimal_net(), PrefixId::default_route());
    }
}
