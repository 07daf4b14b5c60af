//! Installation of paced flows.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::rc::Rc;

use dslab_core::{log_debug, log_info, EventCancellationPolicy, Id, Simulation, SimulationContext};
use dslab_network::{create_socket, Network, NodeId, PacketSink, Socket, TransportVariant};

use crate::error::Error;
use crate::pacing::{PacingConfig, PacingEngine, StartPacing, StopPacing};

/// Declarative description of a flow.
#[derive(Clone, Debug)]
pub struct FlowSpec {
    /// Source node name.
    pub src: String,
    /// Destination node name.
    pub dst: String,
    /// Port of the receiver on the destination node.
    pub port: u16,
    pub transport: TransportVariant,
    pub pacing: PacingConfig,
    /// Time the source starts sending.
    pub start: f64,
    /// Time the source stops sending.
    pub stop: f64,
}

/// A flow with its components registered in the simulation.
pub struct InstalledFlow {
    index: usize,
    spec: FlowSpec,
    src: NodeId,
    dst: NodeId,
    engine: Rc<RefCell<PacingEngine>>,
    engine_id: Id,
    socket: Rc<RefCell<dyn Socket>>,
    sink: Rc<RefCell<PacketSink>>,
    sink_addr: SocketAddrV4,
    components: Vec<String>,
}

impl InstalledFlow {
    /// Flow number, starting from 1.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn spec(&self) -> &FlowSpec {
        &self.spec
    }

    pub fn src_node(&self) -> NodeId {
        self.src
    }

    pub fn dst_node(&self) -> NodeId {
        self.dst
    }

    pub fn engine(&self) -> Rc<RefCell<PacingEngine>> {
        self.engine.clone()
    }

    pub fn engine_id(&self) -> Id {
        self.engine_id
    }

    pub fn socket(&self) -> Rc<RefCell<dyn Socket>> {
        self.socket.clone()
    }

    pub fn sink(&self) -> Rc<RefCell<PacketSink>> {
        self.sink.clone()
    }

    /// Address the flow sends to.
    pub fn sink_addr(&self) -> SocketAddrV4 {
        self.sink_addr
    }

    /// Names of the simulation components created for the flow.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Prefix of component names of the flow.
    pub fn name(&self) -> String {
        flow_name(self.index)
    }
}

fn flow_name(index: usize) -> String {
    format!("flow{}", index)
}

/// Creates receivers, sockets and pacing engines for flows and schedules their activity windows.
pub struct FlowInstaller {
    network: Rc<RefCell<Network>>,
    flows: Vec<InstalledFlow>,
    ctx: SimulationContext,
}

impl FlowInstaller {
    pub fn new(network: Rc<RefCell<Network>>, ctx: SimulationContext) -> Self {
        Self {
            network,
            flows: Vec::new(),
            ctx,
        }
    }

    /// Checks the flows against the topology and the already installed flows.
    pub fn validate(&self, specs: &[FlowSpec]) -> Result<(), Error> {
        let topology = self.network.borrow().topology();
        let mut receivers: HashMap<(NodeId, u16), usize> = self
            .flows
            .iter()
            .map(|f| ((f.dst, f.spec.port), f.index))
            .collect();

        for (i, spec) in specs.iter().enumerate() {
            let index = self.flows.len() + i + 1;
            let invalid = |reason: String| Error::InvalidConfig(format!("flow {}: {}", index, reason));
            let node = |name: &str| {
                topology
                    .node_id(name)
                    .ok_or_else(|| invalid(format!("unknown node `{}`", name)))
            };
            let src = node(&spec.src)?;
            let dst = node(&spec.dst)?;
            for (id, name) in [(src, &spec.src), (dst, &spec.dst)] {
                if topology.node_address(id).is_none() {
                    return Err(invalid(format!("node `{}` is not connected", name)));
                }
            }
            if topology.path(src, dst).is_none() {
                return Err(invalid(format!("no route from `{}` to `{}`", spec.src, spec.dst)));
            }
            if !(spec.start.is_finite() && spec.stop.is_finite() && 0. <= spec.start && spec.start < spec.stop) {
                return Err(invalid(format!(
                    "activity window [{}, {}] is invalid",
                    spec.start, spec.stop
                )));
            }
            spec.pacing.validate().map_err(|e| invalid(e.to_string()))?;
            if let Some(&first) = receivers.get(&(dst, spec.port)) {
                return Err(Error::DuplicatePort {
                    node: spec.dst.clone(),
                    port: spec.port,
                    first,
                    second: index,
                });
            }
            receivers.insert((dst, spec.port), index);
        }
        Ok(())
    }

    /// Installs all flows or none of them.
    ///
    /// Start and stop of each pacing engine are scheduled at the flow's `start` and `stop` times.
    pub fn install(&mut self, sim: &mut Simulation, specs: Vec<FlowSpec>) -> Result<&[InstalledFlow], Error> {
        self.validate(&specs)?;
        let first = self.flows.len();
        for spec in specs {
            let flow = self.install_flow(sim, spec)?;
            self.flows.push(flow);
        }
        Ok(&self.flows[first..])
    }

    fn install_flow(&mut self, sim: &mut Simulation, spec: FlowSpec) -> Result<InstalledFlow, Error> {
        let index = self.flows.len() + 1;
        let name = flow_name(index);
        let topology = self.network.borrow().topology();
        let missing = || Error::InvalidConfig(format!("{}: unknown node", name));
        let src = topology.node_id(&spec.src).ok_or_else(missing)?;
        let dst = topology.node_id(&spec.dst).ok_or_else(missing)?;

        let sink_name = format!("{}-sink", name);
        let sink_ctx = sim.create_context(&sink_name);
        let sink = Rc::new(RefCell::new(PacketSink::new(dst, spec.port, self.network.clone(), sink_ctx)));
        sim.add_handler(&sink_name, sink.clone());
        let sink_addr = sink.borrow_mut().listen()?;

        let socket_name = format!("{}-socket", name);
        let socket = create_socket(spec.transport, src, self.network.clone(), sim, &socket_name);

        let engine_name = format!("{}-pacer", name);
        let mut engine = PacingEngine::new(socket.clone(), sim.create_context(&engine_name));
        engine.configure(spec.pacing.clone(), sink_addr)?;
        let engine = Rc::new(RefCell::new(engine));
        let engine_id = sim.add_handler(&engine_name, engine.clone());

        let now = self.ctx.time();
        self.ctx.emit(StartPacing {}, engine_id, (spec.start - now).max(0.));
        self.ctx.emit(StopPacing {}, engine_id, (spec.stop - now).max(0.));
        log_info!(
            self.ctx,
            "installed {}: {} {} -> {} ({}), {} bytes at {}, active [{}, {}]",
            name,
            spec.transport,
            spec.src,
            spec.dst,
            sink_addr,
            spec.pacing.packet_size,
            spec.pacing.data_rate,
            spec.start,
            spec.stop
        );

        Ok(InstalledFlow {
            index,
            spec,
            src,
            dst,
            engine,
            engine_id,
            socket,
            sink,
            sink_addr,
            components: vec![sink_name, socket_name, engine_name],
        })
    }

    pub fn flows(&self) -> &[InstalledFlow] {
        &self.flows
    }

    pub fn flow(&self, index: usize) -> Option<&InstalledFlow> {
        self.flows.get(index.checked_sub(1)?)
    }

    /// Stops all flows and removes their components together with their pending events.
    ///
    /// Calling it again does nothing.
    pub fn teardown(&mut self, sim: &mut Simulation) {
        for flow in self.flows.drain(..) {
            flow.engine.borrow_mut().stop();
            flow.socket.borrow_mut().close();
            flow.sink.borrow_mut().stop();
            for component in &flow.components {
                sim.remove_handler(component, EventCancellationPolicy::All);
            }
            log_debug!(self.ctx, "removed {}", flow_name(flow.index));
        }
    }
}
