use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use rstest::rstest;

use dslab_core::{EventCancellationPolicy, Simulation};

use dslab_network::network::DEFAULT_QUEUE_SIZE;
use dslab_network::transport::tcp::SEGMENT_SIZE;
use dslab_network::{
    create_socket, AddressBlock, DataRate, Delay, DropReason, FlowMonitor, LinkSpec, Network, PacketSink,
    SetLinkDelay, Topology, TopologyBuilder, TopologyError, TransportError, TransportVariant,
};

fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!((x - y).abs() < eps, "Values do not match: {:.15} vs {:.15}", x, y);
}

fn two_nodes(link: LinkSpec) -> Topology {
    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_node("b");
    builder.add_link(link);
    builder.build().unwrap()
}

fn dumbbell() -> Topology {
    let mut builder = TopologyBuilder::new();
    for name in ["sender1", "sender2", "switch1", "switch2", "receiver1", "receiver2"] {
        builder.add_node(name);
    }
    let access = |a: &str, b: &str| LinkSpec::new(a, b, DataRate::mbps(50.), Delay::ms(5.));
    builder.add_link(access("sender1", "switch1"));
    builder.add_link(access("sender2", "switch1"));
    builder.add_link(LinkSpec::new("switch1", "switch2", DataRate::mbps(10.), Delay::ms(20.)));
    builder.add_link(access("switch2", "receiver1"));
    builder.add_link(access("switch2", "receiver2"));
    builder.build().unwrap()
}

struct Env {
    sim: Simulation,
    net: Rc<RefCell<Network>>,
    monitor: Rc<RefCell<FlowMonitor>>,
}

fn setup(topology: Topology) -> Env {
    let mut sim = Simulation::new(123);
    let net_ctx = sim.create_context("net");
    let net = Rc::new(RefCell::new(Network::new(Rc::new(topology), DEFAULT_QUEUE_SIZE, net_ctx)));
    sim.add_handler("net", net.clone());
    let monitor = Rc::new(RefCell::new(FlowMonitor::new()));
    net.borrow_mut().install_flow_monitor(monitor.clone());
    Env { sim, net, monitor }
}

fn add_sink(env: &mut Env, node: &str, port: u16) -> Rc<RefCell<PacketSink>> {
    let node_id = env.net.borrow().topology().node_id(node).unwrap();
    let name = format!("sink-{}-{}", node, port);
    let ctx = env.sim.create_context(&name);
    let sink = Rc::new(RefCell::new(PacketSink::new(node_id, port, env.net.clone(), ctx)));
    env.sim.add_handler(&name, sink.clone());
    sink.borrow_mut().listen().unwrap();
    sink
}

#[test]
fn addresses_are_allocated_in_declaration_order() {
    let topology = dumbbell();
    for (idx, link) in topology.links().iter().enumerate() {
        assert_eq!(link.block.to_string(), format!("10.1.{}.0/24", idx + 1));
        assert_eq!(link.addresses[0], Ipv4Addr::new(10, 1, idx as u8 + 1, 1));
        assert_eq!(link.addresses[1], Ipv4Addr::new(10, 1, idx as u8 + 1, 2));
    }
    let receiver2 = topology.node_id("receiver2").unwrap();
    assert_eq!(topology.node_address(receiver2), Some(Ipv4Addr::new(10, 1, 5, 2)));
    assert_eq!(topology.node_by_address(Ipv4Addr::new(10, 1, 3, 1)), topology.node_id("switch1"));
}

#[test]
fn explicit_overlapping_blocks_are_rejected() {
    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_node("b");
    builder.add_node("c");
    builder.add_link(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.)));
    builder.add_link(
        LinkSpec::new("b", "c", DataRate::mbps(1.), Delay::ms(1.)).with_network("10.1.0.0/16".parse().unwrap()),
    );
    match builder.build() {
        Err(TopologyError::AddressSpaceConflict { first, second, .. }) => {
            assert_eq!((first, second), (0, 1));
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
}

#[test]
fn explicit_disjoint_blocks_are_accepted() {
    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_node("b");
    builder.add_node("c");
    let block: AddressBlock = "192.168.0.0/30".parse().unwrap();
    builder.add_link(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.)).with_network(block));
    builder.add_link(LinkSpec::new("b", "c", DataRate::mbps(1.), Delay::ms(1.)));
    let topology = builder.build().unwrap();
    assert_eq!(topology.link(0).addresses, [Ipv4Addr::new(192, 168, 0, 1), Ipv4Addr::new(192, 168, 0, 2)]);
    assert_eq!(topology.link(1).block.to_string(), "10.1.2.0/24");
}

#[rstest]
#[case::self_loop(LinkSpec::new("a", "a", DataRate::mbps(1.), Delay::ms(1.)))]
#[case::error_rate(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.)).with_error_rate(1.5))]
#[case::queue_size(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.)).with_queue_size(0))]
fn invalid_links_are_rejected(#[case] link: LinkSpec) {
    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_node("b");
    builder.add_link(link);
    assert!(matches!(builder.build(), Err(TopologyError::InvalidLink { link: 0, .. })));
}

#[test]
fn unknown_and_duplicate_nodes() {
    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_link(LinkSpec::new("a", "x", DataRate::mbps(1.), Delay::ms(1.)));
    assert_eq!(
        builder.build().err(),
        Some(TopologyError::UnknownNode {
            link: 0,
            node: "x".to_string()
        })
    );

    let mut builder = TopologyBuilder::new();
    builder.add_node("a");
    builder.add_node("a");
    assert_eq!(builder.build().err(), Some(TopologyError::DuplicateNode("a".to_string())));
}

#[test]
fn routes_go_through_bottleneck() {
    let topology = dumbbell();
    let id = |name| topology.node_id(name).unwrap();
    assert_eq!(topology.path(id("sender1"), id("receiver2")), Some(vec![0, 2, 4]));
    assert_eq!(topology.path(id("receiver1"), id("sender2")), Some(vec![3, 2, 1]));
    assert_eq!(topology.path(id("sender1"), id("sender1")), Some(vec![]));
}

#[test]
fn udp_datagram_latency() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(8.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 9);
    let socket = create_socket(TransportVariant::Udp, 0, env.net.clone(), &mut env.sim, "udp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    // 972 bytes of payload + 28 bytes of headers take 1 ms at 8 Mbps
    socket.borrow_mut().send(972).unwrap();
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_packets(), 1);
    assert_eq!(sink.borrow().rx_bytes(), 972);
    let report = env.monitor.borrow().report(env.sim.time());
    assert_eq!(report.flows.len(), 1);
    assert_eq!(report.flows[0].stats.rx_bytes, 1000);
    assert_float_eq(report.flows[0].mean_delay.unwrap(), 0.011, 1e-12);
    assert_float_eq(env.sim.time(), 0.011, 1e-12);
}

#[test]
fn unconnected_socket_refuses_to_send() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(8.), Delay::ms(10.))));
    for variant in [TransportVariant::Udp, TransportVariant::TcpNewReno] {
        let socket = create_socket(variant, 0, env.net.clone(), &mut env.sim, &format!("{}", variant));
        assert_eq!(socket.borrow_mut().send(100), Err(TransportError::NotConnected));
    }
}

#[test]
fn error_model_drops_everything() {
    let link = LinkSpec::new("a", "b", DataRate::mbps(8.), Delay::ms(10.)).with_error_rate(1.);
    let mut env = setup(two_nodes(link));
    let sink = add_sink(&mut env, "b", 9);
    let drops = env.net.borrow_mut().subscribe_drops();
    let socket = create_socket(TransportVariant::Udp, 0, env.net.clone(), &mut env.sim, "udp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    for _ in 0..10 {
        socket.borrow_mut().send(100).unwrap();
    }
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_packets(), 0);
    let drops = drops.drain();
    assert_eq!(drops.len(), 10);
    assert!(drops.iter().all(|(_, d)| d.reason == DropReason::ErrorModel && d.link == Some(0)));
    assert!(drops.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[test]
fn drop_tail_queue_overflow() {
    let link = LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.)).with_queue_size(2);
    let mut env = setup(two_nodes(link));
    let sink = add_sink(&mut env, "b", 9);
    let drops = env
        .net
        .borrow_mut()
        .subscribe_drops_filtered(|d| d.reason == DropReason::QueueOverflow);
    let socket = create_socket(TransportVariant::Udp, 0, env.net.clone(), &mut env.sim, "udp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    for _ in 0..5 {
        socket.borrow_mut().send(100).unwrap();
    }
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_packets(), 2);
    assert_eq!(drops.len(), 3);
    let report = env.monitor.borrow().report(env.sim.time());
    assert_eq!(report.flows[0].stats.lost_packets, 3);
    assert_eq!(report.flows[0].stats.drops.get(&DropReason::QueueOverflow), Some(&3));
}

#[test]
fn packets_to_unbound_port_are_dropped() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.))));
    let drops = env.net.borrow_mut().subscribe_drops();
    let socket = create_socket(TransportVariant::Udp, 0, env.net.clone(), &mut env.sim, "udp");
    socket.borrow_mut().bind().unwrap();
    socket
        .borrow_mut()
        .connect("10.1.1.2:9".parse().unwrap())
        .unwrap();
    socket.borrow_mut().send(100).unwrap();
    socket.borrow_mut().connect("10.9.9.9:9".parse().unwrap()).unwrap();
    socket.borrow_mut().send(100).unwrap();
    env.sim.step_until_no_events();

    let reasons: Vec<DropReason> = drops.drain().into_iter().map(|(_, d)| d.reason).collect();
    assert_eq!(reasons, vec![DropReason::NoRoute, DropReason::NoEndpoint]);
}

#[test]
fn port_binding() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(1.), Delay::ms(1.))));
    let addr = env.net.borrow_mut().bind(1, 8080, None).unwrap();
    assert_eq!(addr.to_string(), "10.1.1.2:8080");
    assert_eq!(
        env.net.borrow_mut().bind(1, 8080, None),
        Err(TransportError::PortInUse(addr))
    );
    // same port on another node is fine
    assert!(env.net.borrow_mut().bind(0, 8080, None).is_ok());
    let first = env.net.borrow_mut().bind_ephemeral(0, None).unwrap();
    let second = env.net.borrow_mut().bind_ephemeral(0, None).unwrap();
    assert_eq!(first.port(), 49153);
    assert_eq!(second.port(), 49154);
    env.net.borrow_mut().unbind(addr);
    assert!(env.net.borrow_mut().bind(1, 8080, None).is_ok());
}

#[test]
fn link_delay_change() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(8.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 9);
    let socket = create_socket(TransportVariant::Udp, 0, env.net.clone(), &mut env.sim, "udp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    let net_id = env.net.borrow().id();
    let mut ctl = env.sim.create_context("ctl");
    ctl.emit(SetLinkDelay { link: 0, delay: 0.1 }, net_id, 1.);
    env.sim.step_until_time(2.);
    assert_float_eq(env.net.borrow().link_delay(0), 0.1, 1e-12);

    socket.borrow_mut().send(972).unwrap();
    env.sim.step_until_no_events();
    assert_float_eq(env.sim.time(), 2.101, 1e-9);
    assert_eq!(sink.borrow().rx_packets(), 1);
}

#[rstest]
#[case(TransportVariant::TcpNewReno)]
#[case(TransportVariant::TcpTahoe)]
fn tcp_delivers_stream(#[case] variant: TransportVariant) {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(10.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 8080);
    let socket = create_socket(variant, 0, env.net.clone(), &mut env.sim, "tcp");
    let cwnd = socket.borrow_mut().cwnd_trace().unwrap();
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    for _ in 0..50 {
        socket.borrow_mut().send(1000).unwrap();
    }
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_bytes(), 50000);
    let changes = cwnd.drain();
    assert!(!changes.is_empty());
    assert_eq!(changes[0].1.old, SEGMENT_SIZE);
    assert_eq!(changes[0].1.new, 2 * SEGMENT_SIZE);
    assert!(changes.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1.new == w[1].1.old));
}

#[rstest]
#[case(TransportVariant::TcpNewReno)]
#[case(TransportVariant::TcpTahoe)]
fn tcp_recovers_from_losses(#[case] variant: TransportVariant) {
    let link = LinkSpec::new("a", "b", DataRate::mbps(10.), Delay::ms(10.)).with_error_rate(0.02);
    let mut env = setup(two_nodes(link));
    let sink = add_sink(&mut env, "b", 8080);
    let drops = env.net.borrow_mut().subscribe_drops();
    let socket = create_socket(variant, 0, env.net.clone(), &mut env.sim, "tcp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    for _ in 0..100 {
        socket.borrow_mut().send(1000).unwrap();
    }
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_bytes(), 100000);
    assert!(!drops.is_empty());
}

#[test]
fn tcp_send_buffer_limit() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(10.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 8080);
    let socket = create_socket(TransportVariant::TcpNewReno, 0, env.net.clone(), &mut env.sim, "tcp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    socket.borrow_mut().send(131000).unwrap();
    assert!(matches!(
        socket.borrow_mut().send(1000),
        Err(TransportError::BufferFull { requested: 1000, available: 72 })
    ));
}

#[test]
fn tcp_close_drains_buffer() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(10.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 8080);
    let socket = create_socket(TransportVariant::TcpNewReno, 0, env.net.clone(), &mut env.sim, "tcp");
    let local = socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    socket.borrow_mut().send(20000).unwrap();
    socket.borrow_mut().close();
    assert_eq!(socket.borrow_mut().send(1), Err(TransportError::Closed));
    env.sim.step_until_no_events();

    assert_eq!(sink.borrow().rx_bytes(), 20000);
    assert_eq!(socket.borrow().local_addr(), None);
    // the port was released
    assert!(env.net.borrow_mut().bind(0, local.port(), None).is_ok());
    socket.borrow_mut().close();
}

#[test]
fn removed_socket_stops_sending() {
    let mut env = setup(two_nodes(LinkSpec::new("a", "b", DataRate::mbps(10.), Delay::ms(10.))));
    let sink = add_sink(&mut env, "b", 8080);
    let socket = create_socket(TransportVariant::TcpNewReno, 0, env.net.clone(), &mut env.sim, "tcp");
    socket.borrow_mut().bind().unwrap();
    socket.borrow_mut().connect(sink.borrow().local_addr().unwrap()).unwrap();
    socket.borrow_mut().send(20000).unwrap();
    env.sim.step_until_time(0.05);
    env.sim.remove_handler("tcp", EventCancellationPolicy::All);
    env.sim.step_until_no_events();
    assert!(sink.borrow().rx_bytes() < 20000);
}
