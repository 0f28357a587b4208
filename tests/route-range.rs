use rotonda_pipeline::rib::{Config, RibAf};
use rotonda_pipeline::test_types::{addr, prefix, BgpAttributes};
use rotonda_pipeline::{AttributeInterner, IPv4, IPv6, PrefixId};

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

fn announce<AF: rotonda_pipeline::AddressFamily>(
    rib: &mut RibAf<AF, BgpAttributes>,
    protocol: &str,
    net: &str,
    nexthop: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = rib.route(
        protocol,
        prefix(net),
        addr(nexthop),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.add_route(protocol, entry)?;
    Ok(())
}

#[test]
fn range_between_more_specifics() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib =
        RibAf::<IPv4, BgpAttributes>::new(Config::default(), AttributeInterner::new());
    rib.add_igp_table("static")?;
    for net in ["10.0.0.0/8", "10.1.0.0/16", "10.3.0.0/16"] {
        announce(&mut rib, "static", net, "192.0.2.1")?;
    }

    let range = rib.lookup_route_range(addr("10.2.3.4"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("10.0.0.0/8")));
    assert_eq!(range.bottom(), addr::<IPv4>("10.2.0.0"));
    assert_eq!(range.top(), addr::<IPv4>("10.2.255.255"));
    assert_eq!(range.minimal_net(), prefix("10.2.0.0/16"));
    assert!(range.contains(addr("10.2.200.1")));
    assert!(!range.contains(addr("10.3.0.0")));

    let range = rib.lookup_route_range(addr("11.0.0.1"))?;
    assert!(range.route().is_none());
    assert_eq!(range.bottom(), addr::<IPv4>("11.0.0.0"));
    assert_eq!(range.top(), addr::<IPv4>("255.255.255.255"));

    // A more-specific of another protocol narrows the range.
    rib.add_igp_table("ospf")?;
    announce(&mut rib, "ospf", "10.2.128.0/17", "192.0.2.2")?;
    let range = rib.lookup_route_range(addr("10.2.3.4"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("10.0.0.0/8")));
    assert_eq!(range.top(), addr::<IPv4>("10.2.127.255"));
    assert_eq!(range.minimal_net(), prefix("10.2.0.0/17"));
    Ok(())
}

#[test]
fn range_through_a_deletion_table() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib =
        RibAf::<IPv4, BgpAttributes>::new(Config::default(), AttributeInterner::new());
    rib.add_igp_table("static")?;
    announce(&mut rib, "static", "10.1.1.0/24", "192.0.2.1")?;
    let Some(deletion) = rib.delete_origin_table("static")? else {
        return Err("expected a deletion table".into());
    };
    announce(&mut rib, "static", "10.1.0.0/16", "192.0.2.2")?;

    // Starting at the deletion table, both the pending /24 and the new /16
    // in the origin below are visible, and the /24 wins.
    let pipeline = rib.pipeline();
    let range = pipeline.lookup_route_range(deletion, addr("10.1.1.7"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("10.1.1.0/24")));
    assert_eq!(range.bottom(), addr::<IPv4>("10.1.1.0"));
    assert_eq!(range.top(), addr::<IPv4>("10.1.1.255"));

    let range = pipeline.lookup_route_range(deletion, addr("10.1.2.7"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("10.1.0.0/16")));
    assert_eq!(range.bottom(), addr::<IPv4>("10.1.2.0"));

    let best = pipeline.lookup_route_addr(deletion, addr("10.1.1.7"))?;
    assert_eq!(best.map(|r| r.nexthop()), Some(addr("192.0.2.1")));

    rib.run_until_idle()?;
    let range = rib.lookup_route_range(addr("10.1.1.7"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("10.1.0.0/16")));
    assert_eq!(range.bottom(), addr::<IPv4>("10.1.0.0"));
    assert_eq!(range.top(), addr::<IPv4>("10.1.255.255"));
    Ok(())
}

#[test]
fn ipv6_ranges() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib =
        RibAf::<IPv6, BgpAttributes>::new(Config::default(), AttributeInterner::new());
    rib.add_egp_table("ebgp")?;
    announce(&mut rib, "ebgp", "2001:db8::/32", "2001:db8::1")?;
    announce(&mut rib, "ebgp", "2001:db8:1::/48", "2001:db8::1")?;

    let range = rib.lookup_route_range(addr("2001:db8::42"))?;
    assert_eq!(range.route().map(|r| r.net()), Some(prefix("2001:db8::/32")));
    assert_eq!(range.bottom(), addr::<IPv6>("2001:db8::"));
    assert_eq!(range.top(), addr::<IPv6>("2001:db8:0:ffff:ffff:ffff:ffff:ffff"));
    assert_eq!(range.minimal_net(), prefix::<IPv6>("2001:db8::/48"));

    let range = rib.lookup_route_range(addr("::1"))?;
    assert!(range.route().is_none());
    assert_eq!(range.minimal_net(), PrefixId::<IPv6>::new(addr("::"), 3));
    Ok(())
}
