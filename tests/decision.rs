use std::collections::BTreeMap;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use rotonda_pipeline::rib::{Config, RibAf};
use rotonda_pipeline::tables::TieBreaker;
use rotonda_pipeline::test_types::{
    addr, prefix, BgpAttributes, Recorded, RecordingConsumer,
};
use rotonda_pipeline::{AttributeInterner, IPv4, RouteRecord};

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

const PEERS: [&str; 3] = ["peer-a", "peer-b", "peer-c"];

#[derive(Clone, Debug)]
struct Announcement {
    peer: &'static str,
    net: String,
    local_pref: u32,
}

fn rib_with_peers(config: Config) -> Result<Rib, Box<dyn std::error::Error>> {
    let mut rib = Rib::new(config, AttributeInterner::new());
    for peer in PEERS {
        rib.set_protocol_admin_distance(peer, 20)?;
        rib.add_egp_table(peer)?;
    }
    Ok(rib)
}

fn apply(
    rib: &mut Rib,
    announcements: &[Announcement],
) -> Result<(), Box<dyn std::error::Error>> {
    for a in announcements {
        let entry = rib.route(
            a.peer,
            prefix(&a.net),
            addr("192.0.2.1"),
            BgpAttributes::with_local_pref(a.local_pref),
        )?;
        rib.add_route(a.peer, entry)?;
    }
    Ok(())
}

#[test]
fn winners_do_not_depend_on_arrival_order(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rng = rand::rng();
    let mut announcements = vec![];
    for i in 0..32_u32 {
        for peer in PEERS {
            announcements.push(Announcement {
                peer,
                net: format!("10.{}.0.0/16", i),
                local_pref: rng.random_range(0..3),
            });
        }
    }

    // Highest local preference wins, full ties go to the lowest protocol
    // name.
    let mut expected: BTreeMap<String, (u32, &str)> = BTreeMap::new();
    for a in &announcements {
        let best = expected.entry(a.net.clone()).or_insert((a.local_pref, a.peer));
        if a.local_pref > best.0 || (a.local_pref == best.0 && a.peer < best.1)
        {
            *best = (a.local_pref, a.peer);
        }
    }

    let mut previous: Option<Vec<RouteRecord>> = None;
    for _ in 0..5 {
        announcements.shuffle(&mut rng);
        let mut rib = rib_with_peers(Config::default())?;
        apply(&mut rib, &announcements)?;

        let routes = rib.routes()?;
        assert_eq!(routes.len(), expected.len());
        for route in &routes {
            let Some((_, peer)) = expected.get(&route.prefix) else {
                return Err(format!("unexpected winner {}", route.prefix).into());
            };
            assert_eq!(&route.protocol, peer);
        }
        if let Some(previous) = &previous {
            assert_eq!(previous, &routes);
        }
        previous = Some(routes);
    }
    Ok(())
}

#[test]
fn at_most_one_event_per_change() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib = rib_with_peers(Config::default())?;
    let consumer = RecordingConsumer::new();
    rib.add_redistributor(Box::new(consumer.clone()))?;
    rib.run_until_idle()?;
    consumer.clear_events();

    let mut rng = rand::rng();
    for _ in 0..200 {
        let before = consumer.events().len();
        let peer = PEERS.choose(&mut rng).copied().unwrap_or("peer-a");
        let net = prefix(&format!("10.{}.0.0/16", rng.random_range(0..8)));
        if rng.random_bool(0.3) && rib.lookup_route_exact(&net)?.is_some() {
            // Deleting a net the peer does not have is a recoverable error.
            let _ = rib.delete_route(peer, &net);
        } else {
            let entry = rib.route(
                peer,
                net,
                addr("192.0.2.1"),
                BgpAttributes::with_local_pref(rng.random_range(0..4)),
            )?;
            rib.add_route(peer, entry)?;
        }
        assert!(consumer.events().len() <= before + 1);
    }

    let table: Vec<RouteRecord> =
        consumer.routes().values().map(|r| r.to_record()).collect();
    assert_eq!(table, rib.routes()?);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn configured_tie_breakers() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    // Admin distance first, so static beats a better local preference.
    let config = Config {
        tie_breakers: vec![TieBreaker::AdminDistance, TieBreaker::LocalPreference],
        ..Default::default()
    };
    let mut rib = Rib::new(config, AttributeInterner::new());
    rib.add_igp_table("static")?;
    rib.add_egp_table("ebgp")?;

    let entry = rib.route(
        "ebgp",
        prefix("10.0.0.0/8"),
        addr("192.0.2.2"),
        BgpAttributes::with_local_pref(500),
    )?;
    rib.add_route("ebgp", entry)?;
    let entry = rib.route(
        "static",
        prefix("10.0.0.0/8"),
        addr("192.0.2.1"),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.add_route("static", entry)?;

    let best = rib.lookup_route_exact(&prefix("10.0.0.0/8"))?;
    assert_eq!(best.map(|r| r.nexthop()), Some(addr("192.0.2.1")));

    // With the default order local preference comes first.
    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    rib.add_igp_table("static")?;
    rib.add_egp_table("ebgp")?;
    let entry = rib.route(
        "ebgp",
        prefix("10.0.0.0/8"),
        addr("192.0.2.2"),
        BgpAttributes::with_local_pref(500),
    )?;
    rib.add_route("ebgp", entry)?;
    let entry = rib.route(
        "static",
        prefix("10.0.0.0/8"),
        addr("192.0.2.1"),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.add_route("static", entry)?;

    let best = rib.lookup_route_exact(&prefix("10.0.0.0/8"))?;
    assert_eq!(best.map(|r| r.nexthop()), Some(addr("192.0.2.2")));
    Ok(())
}

#[test]
fn missing_local_preference_counts_as_zero(
) -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib = rib_with_peers(Config::default())?;
    for (peer, attrs) in [
        ("peer-a", BgpAttributes::default()),
        ("peer-b", BgpAttributes::with_local_pref(1)),
    ] {
        let entry =
            rib.route(peer, prefix("10.0.0.0/8"), addr("192.0.2.1"), attrs)?;
        rib.add_route(peer, entry)?;
    }
    let best = rib.lookup_route_exact(&prefix("10.0.0.0/8"))?;
    assert_eq!(
        best.map(|r| r.protocol().name().to_string()),
        Some("peer-b".to_string())
    );
    Ok(())
}

#[test]
fn withdrawn_winner_is_replaced() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    rib.add_egp_table("b1")?;
    rib.add_egp_table("b2")?;
    let consumer = RecordingConsumer::new();
    rib.add_redistributor(Box::new(consumer.clone()))?;
    rib.run_until_idle()?;
    consumer.clear_events();

    for (peer, local_pref) in [("b1", 100), ("b2", 200)] {
        let entry = rib.route(
            peer,
            prefix("10.0.0.0/8"),
            addr("192.0.2.1"),
            BgpAttributes::with_local_pref(local_pref),
        )?;
        rib.add_route(peer, entry)?;
    }
    let Some(b2) = rib.lookup_route_exact(&prefix("10.0.0.0/8"))? else {
        return Err("no winner for 10.0.0.0/8".into());
    };
    assert_eq!(b2.protocol().name(), "b2");
    // b1 came first and was replaced by b2.
    assert_eq!(consumer.events().len(), 2);
    consumer.clear_events();

    rib.delete_route("b2", &prefix("10.0.0.0/8"))?;
    let Some(b1) = rib.lookup_route_exact(&prefix("10.0.0.0/8"))? else {
        return Err("no winner left for 10.0.0.0/8".into());
    };
    assert_eq!(b1.protocol().name(), "b1");
    assert_eq!(consumer.events(), vec![Recorded::Replace(b2, b1)]);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}
