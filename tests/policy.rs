use rotonda_pipeline::errors::FilterError;
use rotonda_pipeline::rib::{Config, RibAf};
use rotonda_pipeline::tables::{FilterVerdict, RouteModification};
use rotonda_pipeline::test_types::{
    addr, prefix, BgpAttributes, Recorded, RecordingConsumer,
};
use rotonda_pipeline::{
    AttributeInterner, IPv4, PolicyTags, RouteEntry,
};

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
type Entry = RouteEntry<IPv4, BgpAttributes>;
type Verdict = Result<FilterVerdict<BgpAttributes>, FilterError>;

// ospf with three routes of increasing metric, and a consumer that has seen
// them all.
fn rib_with_routes(
) -> Result<(Rib, RecordingConsumer<IPv4, BgpAttributes>), Box<dyn std::error::Error>>
{
    let mut rib = Rib::new(Config::default(), AttributeInterner::new());
    rib.add_igp_table("ospf")?;
    let consumer = RecordingConsumer::new();
    rib.add_redistributor(Box::new(consumer.clone()))?;
    rib.run_until_idle()?;

    for (net, metric) in
        [("10.0.0.0/8", 5), ("10.1.0.0/16", 50), ("10.2.0.0/16", 20)]
    {
        let entry = rib
            .route(
                "ospf",
                prefix(net),
                addr("192.0.2.1"),
                BgpAttributes::with_local_pref(100),
            )?
            .with_metric(metric);
        rib.add_route("ospf", entry)?;
    }
    assert_eq!(consumer.routes().len(), 3);
    consumer.clear_events();
    Ok((rib, consumer))
}

fn nets(consumer: &RecordingConsumer<IPv4, BgpAttributes>) -> Vec<String> {
    consumer.routes().keys().map(|n| n.to_string()).collect()
}

#[test]
fn new_filter_is_pushed() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = rib_with_routes()?;
    rib.set_policy_filter(
        "ospf",
        Box::new(|r: &Entry| -> Verdict {
            if r.metric() > 10 {
                Ok(FilterVerdict::Reject)
            } else {
                Ok(FilterVerdict::Accept)
            }
        }),
    )?;

    // Existing routes are re-evaluated in the background.
    assert_eq!(nets(&consumer).len(), 3);
    rib.run_until_idle()?;
    assert_eq!(nets(&consumer), vec!["10.0.0.0/8"]);
    let policy = rib.protocol_tables("ospf")?.policy;
    assert_eq!(rib.pipeline().policy(policy)?.rejected(), 2);

    // New routes go through the new filter right away.
    let entry = rib
        .route(
            "ospf",
            prefix("10.3.0.0/16"),
            addr("192.0.2.1"),
            BgpAttributes::with_local_pref(100),
        )?
        .with_metric(11);
    rib.add_route("ospf", entry)?;
    assert_eq!(nets(&consumer), vec!["10.0.0.0/8"]);
    assert_eq!(rib.lookup_route_exact(&prefix("10.3.0.0/16"))?, None);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn filter_may_rewrite_routes() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = rib_with_routes()?;
    rib.set_policy_filter(
        "ospf",
        Box::new(|_: &Entry| -> Verdict {
            Ok(FilterVerdict::Modify(RouteModification {
                metric: Some(1),
                policy_tags: Some([7, 8].into_iter().collect::<PolicyTags>()),
                ..Default::default()
            }))
        }),
    )?;
    rib.run_until_idle()?;

    let events = consumer.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| matches!(e, Recorded::Replace(_, _))));
    for route in consumer.routes().values() {
        assert_eq!(route.metric(), 1);
        assert!(route.policy_tags().contains(7));
        assert!(route.policy_tags().contains(8));
    }

    // Pushing the same filter again changes nothing.
    consumer.clear_events();
    let policy = rib.protocol_tables("ospf")?.policy;
    rib.pipeline_mut().push_routes(policy)?;
    rib.run_until_idle()?;
    assert!(consumer.events().is_empty());
    Ok(())
}

#[test]
fn filter_errors_reject() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = rib_with_routes()?;
    rib.set_policy_filter(
        "ospf",
        Box::new(|r: &Entry| -> Verdict {
            if r.net().len() == 16 {
                Err(FilterError::new("no /16s"))
            } else {
                Ok(FilterVerdict::Accept)
            }
        }),
    )?;
    rib.run_until_idle()?;
    assert_eq!(nets(&consumer), vec!["10.0.0.0/8"]);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn newer_filter_cancels_the_push() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = rib_with_routes()?;
    rib.set_policy_filter(
        "ospf",
        Box::new(|_: &Entry| -> Verdict { Ok(FilterVerdict::Reject) }),
    )?;
    // Only the first net is handled by a single push step.
    rib.run_once()?;
    assert_eq!(nets(&consumer), vec!["10.1.0.0/16", "10.2.0.0/16"]);

    rib.set_policy_filter(
        "ospf",
        Box::new(|_: &Entry| -> Verdict { Ok(FilterVerdict::Accept) }),
    )?;
    assert_eq!(rib.pending_tasks(), 2);
    rib.run_until_idle()?;

    // The reject-all push never got to the other nets.
    let events = consumer.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events.first(), Some(Recorded::Delete(_))));
    assert!(matches!(events.last(), Some(Recorded::Add(_))));
    assert_eq!(nets(&consumer).len(), 3);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}
