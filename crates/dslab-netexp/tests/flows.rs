use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::Simulation;
use dslab_network::network::DEFAULT_QUEUE_SIZE;
use dslab_network::{DataRate, Delay, LinkSpec, Network, TopologyBuilder, TransportVariant};
use dslab_netexp::{Error, FlowInstaller, FlowSpec, PacingConfig, PacingState};

fn setup() -> (Simulation, FlowInstaller) {
    let mut builder = TopologyBuilder::new();
    for name in ["h1", "h2", "r", "h3", "h4", "x", "y"] {
        builder.add_node(name);
    }
    builder.add_link(LinkSpec::new("h1", "r", DataRate::mbps(100.), Delay::ms(1.)));
    builder.add_link(LinkSpec::new("h2", "r", DataRate::mbps(100.), Delay::ms(1.)));
    builder.add_link(LinkSpec::new("r", "h3", DataRate::mbps(10.), Delay::ms(10.)));
    builder.add_link(LinkSpec::new("x", "y", DataRate::mbps(10.), Delay::ms(10.)));
    let topology = Rc::new(builder.build().unwrap());

    let mut sim = Simulation::new(42);
    let network = Rc::new(RefCell::new(Network::new(
        topology,
        DEFAULT_QUEUE_SIZE,
        sim.create_context("network"),
    )));
    sim.add_handler("network", network.clone());
    let installer = FlowInstaller::new(network, sim.create_context("installer"));
    (sim, installer)
}

fn flow(src: &str, port: u16, count: u64, start: f64, stop: f64) -> FlowSpec {
    FlowSpec {
        src: src.to_string(),
        dst: "h3".to_string(),
        port,
        transport: TransportVariant::Udp,
        pacing: PacingConfig::new(1000, count, DataRate::mbps(1.)),
        start,
        stop,
    }
}

#[test]
fn duplicate_port_installs_nothing() {
    let (mut sim, mut installer) = setup();
    let result = installer.install(&mut sim, vec![flow("h1", 9000, 0, 1., 2.), flow("h2", 9000, 0, 1., 2.)]);
    assert!(matches!(
        result,
        Err(Error::DuplicatePort {
            port: 9000,
            first: 1,
            second: 2,
            ..
        })
    ));
    assert!(installer.flows().is_empty());
    assert_eq!(sim.pending_event_count(), 0);
    assert_eq!(sim.lookup_id("flow1-pacer"), None);
}

#[test]
fn duplicate_port_against_installed_flow() {
    let (mut sim, mut installer) = setup();
    installer.install(&mut sim, vec![flow("h1", 9000, 0, 1., 2.)]).unwrap();
    assert!(matches!(
        installer.install(&mut sim, vec![flow("h2", 9000, 0, 1., 2.)]),
        Err(Error::DuplicatePort { first: 1, second: 2, .. })
    ));
    assert!(installer.install(&mut sim, vec![flow("h2", 9001, 0, 1., 2.)]).is_ok());
    assert_eq!(installer.flows().len(), 2);
}

#[test]
fn activity_window_is_scheduled() {
    let (mut sim, mut installer) = setup();
    installer
        .install(&mut sim, vec![flow("h1", 9000, 0, 1., 2.004), flow("h2", 9001, 0, 1.5, 3.)])
        .unwrap();
    let first = installer.flow(1).unwrap().engine();
    let second = installer.flow(2).unwrap().engine();

    sim.step_until_time(0.5);
    assert_eq!(first.borrow().state(), PacingState::Idle);
    sim.step_until_time(1.7);
    assert_eq!(first.borrow().state(), PacingState::Running);
    assert_eq!(second.borrow().state(), PacingState::Running);
    sim.step_until_time(2.5);
    assert_eq!(first.borrow().state(), PacingState::Stopped);
    assert_eq!(second.borrow().state(), PacingState::Running);
    sim.step_until_time(10.);
    assert_eq!(second.borrow().state(), PacingState::Stopped);

    // 1000 bytes at 1 Mbps is 125 packets per second
    assert_eq!(first.borrow().packets_sent(), 126);
    assert_eq!(second.borrow().packets_sent(), 188);
    assert_eq!(installer.flow(1).unwrap().sink().borrow().rx_packets(), 126);
    assert_eq!(first.borrow().scheduling_races(), 0);
}

#[test]
fn teardown_removes_pending_activity() {
    let (mut sim, mut installer) = setup();
    installer.install(&mut sim, vec![flow("h1", 9000, 0, 1., 100.)]).unwrap();
    let engine = installer.flow(1).unwrap().engine();
    let sink = installer.flow(1).unwrap().sink();
    sim.step_until_time(5.);
    assert!(engine.borrow().is_running());

    installer.teardown(&mut sim);
    installer.teardown(&mut sim);
    assert_eq!(engine.borrow().state(), PacingState::Stopped);
    assert!(installer.flows().is_empty());
    let sent = engine.borrow().packets_sent();
    sim.step_until_time(200.);
    assert_eq!(engine.borrow().packets_sent(), sent);
    assert_eq!(engine.borrow().scheduling_races(), 0);
    assert!(sink.borrow().rx_packets() <= sent);
    assert_eq!(sink.borrow().local_addr(), None);
}

#[test]
fn invalid_flows_are_rejected() {
    let (mut sim, mut installer) = setup();
    let mut zero_rate = flow("h1", 9000, 0, 1., 2.);
    zero_rate.pacing.data_rate = DataRate::mbps(0.);
    assert!(matches!(
        installer.install(&mut sim, vec![zero_rate]),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        installer.install(&mut sim, vec![flow("h1", 9000, 0, 2., 2.)]),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        installer.install(&mut sim, vec![flow("h9", 9000, 0, 1., 2.)]),
        Err(Error::InvalidConfig(_))
    ));
    // h4 has no links
    assert!(matches!(
        installer.install(&mut sim, vec![flow("h4", 9000, 0, 1., 2.)]),
        Err(Error::InvalidConfig(_))
    ));
    let mut unreachable = flow("h1", 9000, 0, 1., 2.);
    unreachable.dst = "y".to_string();
    assert!(matches!(
        installer.install(&mut sim, vec![unreachable]),
        Err(Error::InvalidConfig(msg)) if msg.contains("no route")
    ));
    let mut oversized = flow("h1", 9000, 0, 1., 2.);
    oversized.pacing.packet_size = u32::MAX - 10;
    assert!(matches!(
        installer.install(&mut sim, vec![oversized]),
        Err(Error::InvalidConfig(_))
    ));
    assert!(installer.flows().is_empty());
}
