use rotonda_pipeline::rib::{Config, RibAf};
use rotonda_pipeline::test_types::{
    addr, prefix, BgpAttributes, RecordingConsumer,
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

fn announce(rib: &mut Rib, net: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entry = rib.route(
        "ospf",
        prefix(net),
        addr("192.0.2.1"),
        BgpAttributes::with_local_pref(100),
    )?;
    rib.add_route("ospf", entry)?;
    Ok(())
}

fn genids(rib: &Rib) -> Result<Vec<(String, u32)>, Box<dyn std::error::Error>> {
    Ok(rib
        .routes()?
        .into_iter()
        .map(|r| (r.prefix, r.genid))
        .collect())
}

fn loaded_rib(
) -> Result<(Rib, RecordingConsumer<IPv4, BgpAttributes>), Box<dyn std::error::Error>>
{
    let config = Config {
        sweep_batch_size: 1,
        ..Default::default()
    };
    let mut rib = Rib::new(config, AttributeInterner::new());
    rib.add_igp_table("ospf")?;
    let consumer = RecordingConsumer::new();
    rib.add_redistributor(Box::new(consumer.clone()))?;
    rib.run_until_idle()?;
    for net in ["10.1.0.0/16", "10.2.0.0/16", "10.3.0.0/16"] {
        announce(&mut rib, net)?;
    }
    Ok((rib, consumer))
}

#[test]
fn restart_and_sweep() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, consumer) = loaded_rib()?;
    assert_eq!(rib.restart_protocol("ospf")?, 1);

    // Nothing is withdrawn by the restart itself.
    assert_eq!(rib.routes()?.len(), 3);
    announce(&mut rib, "10.2.0.0/16")?;
    rib.sweep_stale_routes("ospf")?;
    rib.run_until_idle()?;

    assert_eq!(genids(&rib)?, vec![("10.2.0.0/16".to_string(), 1)]);
    assert_eq!(consumer.routes().len(), 1);
    assert_eq!(consumer.inconsistencies(), 0);
    Ok(())
}

#[test]
fn registering_again_restarts() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, _consumer) = loaded_rib()?;
    let origin = rib.protocol_tables("ospf")?.origin;
    assert_eq!(rib.add_igp_table("ospf")?, origin);
    assert_eq!(rib.pipeline().origin(origin)?.genid(), 1);
    assert_eq!(rib.protocol_names().count(), 1);
    Ok(())
}

#[test]
fn newer_restart_cancels_the_sweep() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, _consumer) = loaded_rib()?;
    rib.restart_protocol("ospf")?;
    rib.sweep_stale_routes("ospf")?;
    // A single step withdraws 10.1.0.0/16 only.
    rib.run_once()?;
    assert_eq!(rib.routes()?.len(), 2);

    // The protocol restarts once more before the sweep is done. The running
    // sweep belongs to the older generation and stops.
    rib.restart_protocol("ospf")?;
    rib.run_until_idle()?;
    assert_eq!(rib.routes()?.len(), 2);

    // Re-announce one and sweep for the current generation.
    announce(&mut rib, "10.3.0.0/16")?;
    rib.sweep_stale_routes("ospf")?;
    rib.run_until_idle()?;
    assert_eq!(genids(&rib)?, vec![("10.3.0.0/16".to_string(), 2)]);
    Ok(())
}

#[test]
fn sweep_of_an_unknown_protocol() -> Result<(), Box<dyn std::error::Error>> {
    crate::common::init();

    let (mut rib, _consumer) = loaded_rib()?;
    assert_eq!(
        rib.sweep_stale_routes("rip"),
        Err(rotonda_pipeline::errors::RouteTableError::ProtocolNotFound)
    );
    Ok(())
}
