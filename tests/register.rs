use rotonda_pipeline::errors::RouteTableError;
use rotonda_pipeline::rib::{Config, RibAf, RibVif, VifAddr};
use rotonda_pipeline::test_types::{
    addr, prefix, BgpAttributes, RecordingNotifier,
};
use rotonda_pipeline::{AttributeInterner, IPv4};

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

type Rib = RibAf<IPv4, BgpAttributes>;

fn rib_with_server(
) -> Result<(Rib, RecordingNotifier<IPv4>), Box<dyn std::error::Error>> {
    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    rib.add_igp_table("ospf")?;
    let server = RecordingNotifier::default();
    rib.set_register_server(server.clone())?;
    Ok((rib, server))
}

fn announce(
    rib: &mut Rib,
    net: &str,
    nexthop: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = rib.route(
        "ospf",
        prefix(net),
        addr(nexthop),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.add_route("ospf", entry)?;
    Ok(())
}

fn registrations(rib: &Rib) -> Result<usize, RouteTableError> {
    Ok(rib
        .pipeline()
        .register(rib.register_table())?
        .registrations()
        .count())
}

#[test]
fn registered_module_follows_its_route(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, server) = rib_with_server()?;
    announce(&mut rib, "10.0.0.0/8", "192.0.2.1")?;

    let registered = rib.route_register(addr("10.2.3.4"), "bgp")?;
    assert_eq!(
        registered.route().map(|r| r.net()),
        Some(prefix("10.0.0.0/8"))
    );
    assert_eq!(registered.valid_subnet(), prefix("10.0.0.0/8"));

    // A new nexthop for the same net keeps the registration.
    let entry = rib.route(
        "ospf",
        prefix("10.0.0.0/8"),
        addr("192.0.2.9"),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.replace_route("ospf", entry)?;
    assert_eq!(
        server.calls(),
        vec![
            "changed bgp 10.0.0.0/8 192.0.2.9 metric 0 distance 110 \
             origin ospf unicast"
        ]
    );
    assert_eq!(registrations(&rib)?, 1);

    // A more specific route splits the valid subnet.
    announce(&mut rib, "10.2.0.0/16", "192.0.2.3")?;
    assert_eq!(
        server.calls().last().map(String::as_str),
        Some("invalidate bgp 10.0.0.0/8 unicast")
    );
    assert_eq!(registrations(&rib)?, 0);

    let again = rib.route_register(addr("10.2.3.4"), "bgp")?;
    assert_eq!(again.valid_subnet(), prefix("10.2.0.0/16"));
    let outside = rib.route_register(addr("10.1.0.1"), "bgp")?;
    assert_eq!(outside.valid_subnet(), prefix("10.0.0.0/15"));
    assert_eq!(registrations(&rib)?, 2);
    Ok(())
}

#[test]
fn no_route_registers_the_whole_gap(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, server) = rib_with_server()?;
    announce(&mut rib, "10.0.0.0/8", "192.0.2.1")?;

    let registered = rib.route_register(addr("192.0.2.1"), "pim")?;
    assert!(registered.route().is_none());
    assert_eq!(registered.valid_subnet(), prefix("128.0.0.0/1"));

    // Unrelated routes leave it alone, a route into the gap does not.
    announce(&mut rib, "11.0.0.0/8", "192.0.2.1")?;
    assert!(server.calls().is_empty());
    announce(&mut rib, "192.0.2.0/24", "192.0.2.1")?;
    assert_eq!(server.calls(), vec!["invalidate pim 128.0.0.0/1 unicast"]);
    Ok(())
}

#[test]
fn deregister() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, server) = rib_with_server()?;
    announce(&mut rib, "10.0.0.0/8", "192.0.2.1")?;
    rib.route_register(addr("10.2.3.4"), "bgp")?;
    rib.route_register(addr("10.9.9.9"), "pim")?;

    assert_eq!(
        rib.route_deregister(&prefix("10.0.0.0/8"), "rip"),
        Err(RouteTableError::RegistrationNotFound)
    );
    rib.route_deregister(&prefix("10.0.0.0/8"), "bgp")?;
    assert_eq!(registrations(&rib)?, 1);

    rib.delete_route("ospf", &prefix("10.0.0.0/8"))?;
    assert_eq!(server.calls(), vec!["invalidate pim 10.0.0.0/8 unicast"]);
    assert_eq!(
        rib.route_deregister(&prefix("10.0.0.0/8"), "pim"),
        Err(RouteTableError::RegistrationNotFound)
    );
    Ok(())
}

#[test]
fn vif_subnets_are_connected_routes(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    let subnet = prefix("192.0.2.0/24");
    rib.new_vif(
        RibVif::new("eth0").with_addr(VifAddr::new(addr("192.0.2.1"), 24)),
    )?;
    assert!(rib.protocol_names().any(|p| p == "connected"));

    let route = rib.lookup_route_exact(&subnet)?.ok_or("no route")?;
    let record = route.to_record();
    assert_eq!(record.protocol, "connected");
    assert_eq!(record.vif.as_deref(), Some("eth0"));
    assert_eq!(record.nexthop.to_string(), "192.0.2.1");
    assert_eq!(record.admin_distance, 0);

    assert_eq!(
        rib.new_vif(RibVif::new("eth0")),
        Err(RouteTableError::VifExists)
    );

    rib.set_vif_enabled("eth0", false)?;
    assert_eq!(rib.lookup_route_exact(&subnet)?, None);
    rib.add_vif_addr("eth0", VifAddr::new(addr("198.51.100.1"), 24))?;
    assert_eq!(rib.lookup_route_exact(&prefix("198.51.100.0/24"))?, None);

    rib.set_vif_enabled("eth0", true)?;
    assert!(rib.lookup_route_exact(&subnet)?.is_some());
    assert!(rib.lookup_route_exact(&prefix("198.51.100.0/24"))?.is_some());

    rib.delete_vif_addr("eth0", addr("198.51.100.1"))?;
    assert_eq!(rib.lookup_route_exact(&prefix("198.51.100.0/24"))?, None);

    let removed = rib.delete_vif("eth0")?;
    assert_eq!(removed.addrs().len(), 1);
    assert!(rib.routes()?.is_empty());
    assert_eq!(
        rib.delete_vif("eth0").err(),
        Some(RouteTableError::VifNotFound)
    );
    Ok(())
}

#[test]
fn point_to_point_peer() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    let local = VifAddr::new(addr("10.0.0.1"), 32).with_peer(addr("10.9.9.9"));
    rib.new_vif(RibVif::new("ppp0").point_to_point().with_addr(local))?;

    let nets: Vec<String> =
        rib.routes()?.into_iter().map(|r| r.prefix).collect();
    assert_eq!(nets, vec!["10.0.0.1/32", "10.9.9.9/32"]);

    rib.delete_vif("ppp0")?;
    assert!(rib.routes()?.is_empty());
    Ok(())
}
