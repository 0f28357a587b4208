use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use inetnum::asn::Asn;

use super::af::fmt_addr;
use super::{AttrRef, Meta, PrefixId, Protocol, RouteEntry, RouteRef};
use crate::tables::{RouteConsumer, RouteNotifier};
use crate::{AddressFamily, IPv4};

//------------ NoMeta --------------------------------------------------------

#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub enum NoMeta {
    Empty,
}

impl std::fmt::Debug for NoMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("")
    }
}

impl std::fmt::Display for NoMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NoMeta")
    }
}

impl Meta for NoMeta {}

//------------ BgpAttributes -------------------------------------------------

/// A minimal BGP-like attribute set: a local preference and an AS path.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct BgpAttributes {
    pub local_pref: Option<u32>,
    pub as_path: Vec<Asn>,
}

impl BgpAttributes {
    pub fn with_local_pref(local_pref: u32) -> Self {
        Self {
            local_pref: Some(local_pref),
            as_path: vec![],
        }
    }

    pub fn with_as_path(mut self, as_path: &[u32]) -> Self {
        self.as_path = as_path.iter().map(|a| Asn::from_u32(*a)).collect();
        self
    }
}

impl Meta for BgpAttributes {
    fn local_preference(&self) -> Option<u32> {
        self.local_pref
    }
}

impl std::fmt::Display for BgpAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.local_pref {
            Some(lp) => write!(f, "lp {}", lp)?,
            None => write!(f, "lp -")?,
        }
        write!(f, " path [")?;
        for (i, asn) in self.as_path.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", asn)?;
        }
        write!(f, "]")
    }
}

//------------ Helpers -------------------------------------------------------

#[allow(clippy::unwrap_used)]
pub fn prefix<AF: AddressFamily>(s: &str) -> PrefixId<AF> {
    let prefix: inetnum::addr::Prefix = s.parse().unwrap();
    PrefixId::try_from(prefix).unwrap()
}

#[allow(clippy::unwrap_used)]
pub fn addr<AF: AddressFamily>(s: &str) -> AF {
    AF::try_from_ipaddr(s.parse().unwrap()).unwrap()
}

/// An IPv4 route with a fresh (not interned) attribute set.
pub fn route_v4(
    net: &str,
    nexthop: &str,
    protocol: &Protocol,
    local_pref: u32,
) -> RouteEntry<IPv4, BgpAttributes> {
    RouteEntry::new(
        prefix(net),
        addr(nexthop),
        protocol.clone(),
        AttrRef::new(BgpAttributes::with_local_pref(local_pref)),
    )
}

//------------ RecordingConsumer ---------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recorded<AF: AddressFamily, M: Meta> {
    Add(RouteRef<AF, M>),
    Delete(RouteRef<AF, M>),
    Replace(RouteRef<AF, M>, RouteRef<AF, M>),
    DumpComplete,
}

struct ConsumerLog<AF: AddressFamily, M: Meta> {
    events: Vec<Recorded<AF, M>>,
    routes: BTreeMap<PrefixId<AF>, RouteRef<AF, M>>,
    // Deletes and replaces for nets the consumer never got, and adds for
    // nets it already had.
    inconsistencies: usize,
}

/// A consumer that records what it is told, and keeps the resulting route
/// table. All clones share the same log.
pub struct RecordingConsumer<AF: AddressFamily, M: Meta> {
    log: Rc<RefCell<ConsumerLog<AF, M>>>,
}

impl<AF: AddressFamily, M: Meta> RecordingConsumer<AF, M> {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(ConsumerLog {
                events: vec![],
                routes: BTreeMap::new(),
                inconsistencies: 0,
            })),
        }
    }

    pub fn events(&self) -> Vec<Recorded<AF, M>> {
        self.log.borrow().events.clone()
    }

    pub fn routes(&self) -> BTreeMap<PrefixId<AF>, RouteRef<AF, M>> {
        self.log.borrow().routes.clone()
    }

    pub fn route(&self, net: &PrefixId<AF>) -> Option<RouteRef<AF, M>> {
        self.log.borrow().routes.get(net).cloned()
    }

    pub fn inconsistencies(&self) -> usize {
        self.log.borrow().inconsistencies
    }

    pub fn dump_completed(&self) -> bool {
        self.log
            .borrow()
            .events
            .iter()
            .any(|e| matches!(e, Recorded::DumpComplete))
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().events.clear();
    }
}

impl<AF: AddressFamily, M: Meta> Default for RecordingConsumer<AF, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<AF: AddressFamily, M: Meta> Clone for RecordingConsumer<AF, M> {
    fn clone(&self) -> Self {
        Self {
            log: Rc::clone(&self.log),
        }
    }
}

impl<AF: AddressFamily, M: Meta> RouteConsumer<AF, M>
    for RecordingConsumer<AF, M>
{
    fn add_route(&mut self, route: &RouteRef<AF, M>) {
        let mut log = self.log.borrow_mut();
        log.events.push(Recorded::Add(Arc::clone(route)));
        if log.routes.insert(route.net(), Arc::clone(route)).is_some() {
            log.inconsistencies += 1;
        }
    }

    fn delete_route(&mut self, route: &RouteRef<AF, M>) {
        let mut log = self.log.borrow_mut();
        log.events.push(Recorded::Delete(Arc::clone(route)));
        if log.routes.remove(&route.net()).is_none() {
            log.inconsistencies += 1;
        }
    }

    fn replace_route(&mut self, old: &RouteRef<AF, M>, new: &RouteRef<AF, M>) {
        let mut log = self.log.borrow_mut();
        log.events
            .push(Recorded::Replace(Arc::clone(old), Arc::clone(new)));
        if log.routes.insert(new.net(), Arc::clone(new)).is_none() {
            log.inconsistencies += 1;
        }
    }

    fn dump_complete(&mut self) {
        self.log.borrow_mut().events.push(Recorded::DumpComplete);
    }
}

//------------ RecordingNotifier ---------------------------------------------

/// A notifier that records every call as a line of text. All clones share
/// the same log.
pub struct RecordingNotifier<AF> {
    calls: Rc<RefCell<Vec<String>>>,
    _af: PhantomData<AF>,
}

impl<AF> RecordingNotifier<AF> {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl<AF> Default for RecordingNotifier<AF> {
    fn default() -> Self {
        Self {
            calls: Rc::new(RefCell::new(vec![])),
            _af: PhantomData,
        }
    }
}

impl<AF> Clone for RecordingNotifier<AF> {
    fn clone(&self) -> Self {
        Self {
            calls: Rc::clone(&self.calls),
            _af: PhantomData,
        }
    }
}

fn cast(is_multicast: bool) -> &'static str {
    if is_multicast {
        "multicast"
    } else {
        "unicast"
    }
}

impl<AF: AddressFamily> RouteNotifier<AF> for RecordingNotifier<AF> {
    fn send_route_changed(
        &mut self,
        protocol_name: &str,
        net: PrefixId<AF>,
        nexthop: AF,
        metric: u32,
        admin_distance: u16,
        origin_protocol: &str,
        is_multicast: bool,
    ) {
        self.calls.borrow_mut().push(format!(
            "changed {} {} {} metric {} distance {} origin {} {}",
            protocol_name,
            net,
            fmt_addr(nexthop),
            metric,
            admin_distance,
            origin_protocol,
            cast(is_multicast)
        ));
    }

    fn send_invalidate(
        &mut self,
        protocol_name: &str,
        net: PrefixId<AF>,
        is_multicast: bool,
    ) {
        self.calls.borrow_mut().push(format!(
            "invalidate {} {} {}",
            protocol_name,
            net,
            cast(is_multicast)
        ));
    }
}
