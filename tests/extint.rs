use rotonda_pipeline::rib::{Config, RibAf, RibVif, VifAddr};
use rotonda_pipeline::test_types::{
    addr, prefix, BgpAttributes, Recorded, RecordingConsumer,
};
use rotonda_pipeline::{AttributeInterner, IPv4, RouteRecord, Vif};

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
type Consumer = RecordingConsumer<IPv4, BgpAttributes>;

const EGP_NET: &str = "198.51.100.0/24";

fn resolving_rib() -> Result<(Rib, Consumer), Box<dyn std::error::Error>> {
    let config = Config {
        resolve_egp_nexthops: true,
        ..Default::default()
    };
    let mut rib = Rib::new(config, AttributeInterner::new());
    rib.add_igp_table("ospf")?;
    rib.add_egp_table("ebgp")?;
    let consumer = Consumer::new();
    rib.add_redistributor(Box::new(consumer.clone()))?;
    rib.run_until_idle()?;
    consumer.clear_events();
    Ok((rib, consumer))
}

fn announce_igp(
    rib: &mut Rib,
    net: &str,
    nexthop: &str,
    vif: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = rib
        .route(
            "ospf",
            prefix(net),
            addr(nexthop),
            BgpAttributes::with_local_pref(100),
        )?
        .with_vif(Vif::new(vif));
    rib.add_route("ospf", entry)?;
    Ok(())
}

fn announce_egp(
    rib: &mut Rib,
    net: &str,
    nexthop: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = rib.route(
        "ebgp",
        prefix(net),
        addr(nexthop),
        BgpAttributes::with_local_pref(100).with_as_path(&[65001]),
    )?;
    rib.add_route("ebgp", entry)?;
    Ok(())
}

fn describe(events: &[Recorded<IPv4, BgpAttributes>]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            Recorded::Add(r) => {
                format!("add {} via {}", r.net(), r.to_record().nexthop)
            }
            Recorded::Delete(r) => format!("delete {}", r.net()),
            Recorded::Replace(old, new) => format!(
                "replace {} via {} with {}",
                new.net(),
                old.to_record().nexthop,
                new.to_record().nexthop
            ),
            Recorded::DumpComplete => "dump complete".to_string(),
        })
        .collect()
}

fn consumer_table(consumer: &Consumer) -> Vec<RouteRecord> {
    consumer.routes().values().map(|r| r.to_record()).collect()
}

#[test]
fn held_back_until_the_nexthop_resolves(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = resolving_rib()?;
    let extint = rib.extint_table().ok_or("no extint table")?;

    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;
    assert!(consumer.events().is_empty());
    assert!(rib.routes()?.is_empty());
    assert_eq!(rib.lookup_route_exact(&prefix(EGP_NET))?, None);
    assert!(rib.pipeline().extint(extint)?.is_unresolved(&prefix(EGP_NET)));

    announce_igp(&mut rib, "192.0.2.0/24", "10.0.0.1", "eth0")?;
    assert_eq!(
        describe(&consumer.events()),
        vec![
            "add 192.0.2.0/24 via 10.0.0.1",
            "add 198.51.100.0/24 via 10.0.0.1",
        ]
    );

    let resolved = consumer.route(&prefix(EGP_NET)).ok_or("not resolved")?;
    assert_eq!(resolved.vif().map(|v| v.name()), Some("eth0"));
    assert_eq!(resolved.protocol().name(), "ebgp");
    assert_eq!(resolved.attributes().as_path.len(), 1);
    assert_eq!(rib.lookup_route_exact(&prefix(EGP_NET))?, Some(resolved));
    assert_eq!(consumer_table(&consumer), rib.routes()?);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn withdrawn_igp_route_unresolves() -> Result<(), Box<dyn std::error::Error>>
{
    crate::common::init();

    let (mut rib, consumer) = resolving_rib()?;
    announce_igp(&mut rib, "192.0.2.0/24", "10.0.0.1", "eth0")?;
    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;
    consumer.clear_events();

    rib.delete_route("ospf", &prefix("192.0.2.0/24"))?;
    assert_eq!(
        describe(&consumer.events()),
        vec!["delete 192.0.2.0/24", "delete 198.51.100.0/24"]
    );
    assert!(consumer.routes().is_empty());
    assert!(rib.lookup_route(addr("198.51.100.1"))?.is_none());

    // Another path to the nexthop brings the route back.
    announce_igp(&mut rib, "192.0.2.0/24", "10.0.0.9", "eth1")?;
    assert_eq!(
        consumer
            .route(&prefix(EGP_NET))
            .map(|r| r.to_record().nexthop.to_string()),
        Some("10.0.0.9".to_string())
    );
    assert_eq!(consumer_table(&consumer), rib.routes()?);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn more_specific_igp_route_re_resolves(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = resolving_rib()?;
    let extint = rib.extint_table().ok_or("no extint table")?;
    announce_igp(&mut rib, "192.0.0.0/16", "10.0.0.1", "eth0")?;
    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;
    announce_egp(&mut rib, "203.0.113.0/24", "192.0.9.1")?;
    consumer.clear_events();

    announce_igp(&mut rib, "192.0.2.0/24", "10.0.0.2", "eth1")?;
    assert_eq!(
        describe(&consumer.events()),
        vec![
            "add 192.0.2.0/24 via 10.0.0.2",
            "replace 198.51.100.0/24 via 10.0.0.1 with 10.0.0.2",
        ]
    );
    assert_eq!(
        rib.pipeline().extint(extint)?.resolving_net(&prefix(EGP_NET)),
        Some(prefix("192.0.2.0/24"))
    );
    consumer.clear_events();

    rib.delete_route("ospf", &prefix("192.0.2.0/24"))?;
    assert_eq!(
        describe(&consumer.events()),
        vec![
            "delete 192.0.2.0/24",
            "replace 198.51.100.0/24 via 10.0.0.2 with 10.0.0.1",
        ]
    );
    assert_eq!(consumer_table(&consumer), rib.routes()?);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn dump_hands_out_resolved_routes() -> Result<(), Box<dyn std::error::Error>>
{
    crate::common::init();

    let (mut rib, _) = resolving_rib()?;
    announce_igp(&mut rib, "192.0.2.0/24", "10.0.0.1", "eth0")?;
    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;
    announce_egp(&mut rib, "203.0.113.0/24", "203.0.113.1")?;

    let late = Consumer::new();
    rib.add_redistributor(Box::new(late.clone()))?;
    rib.run_until_idle()?;

    assert!(late.dump_completed());
    assert_eq!(late.routes().len(), 2);
    assert!(late.route(&prefix("203.0.113.0/24")).is_none());
    assert_eq!(
        late.route(&prefix(EGP_NET))
            .map(|r| r.to_record().nexthop.to_string()),
        Some("10.0.0.1".to_string())
    );
    assert_eq!(consumer_table(&late), rib.routes()?);
    assert_eq!(late.inconsistencies(), 0);
    Ok(())
}

#[test]
fn connected_nexthop_is_kept() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = resolving_rib()?;
    rib.new_vif(
        RibVif::new("eth2").with_addr(VifAddr::new(addr("192.0.2.1"), 24)),
    )?;
    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;

    let route = consumer.route(&prefix(EGP_NET)).ok_or("not resolved")?;
    assert_eq!(route.to_record().nexthop.to_string(), "192.0.2.7");
    assert_eq!(route.vif().map(|v| v.name()), Some("eth2"));

    // Without the subnet the nexthop is unreachable.
    rib.delete_vif("eth2")?;
    assert!(consumer.routes().is_empty());
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn without_resolution_egp_routes_pass() -> Result<(), Box<dyn std::error::Error>>
{
    crate::common::init();

    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    rib.add_egp_table("ebgp")?;
    assert_eq!(rib.extint_table(), None);

    announce_egp(&mut rib, EGP_NET, "192.0.2.7")?;
    let route = rib.lookup_route_exact(&prefix(EGP_NET))?.ok_or("no route")?;
    assert_eq!(route.to_record().nexthop.to_string(), "192.0.2.7");
    Ok(())
}
