//! Single experiment run.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::{log_info, log_warn, EventCancellationPolicy, Simulation, SimulationContext};
use dslab_network::{FlowMonitor, Network, PacketDrop, SetLinkDelay, TopologyBuilder, TransportVariant};

use crate::config::ExperimentConfig;
use crate::error::Error;
use crate::flows::FlowInstaller;
use crate::throughput::ThroughputSampler;
use crate::trace::{TraceCounts, TraceHarness};

/// Outcome of a flow.
#[derive(Clone, Debug, Serialize)]
pub struct FlowSummary {
    pub flow: usize,
    pub src: String,
    pub dst: String,
    pub transport: TransportVariant,
    /// Packets written by the pacing engine.
    pub packets_sent: u64,
    /// Packets the socket refused to accept.
    pub send_errors: u64,
    pub scheduling_races: u64,
    /// Data packets received by the sink.
    pub rx_packets: u64,
    /// Application bytes received by the sink.
    pub rx_bytes: u64,
    pub traces: TraceCounts,
}

/// Outcome of a run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub run: u64,
    pub end_time: f64,
    pub flows: Vec<FlowSummary>,
    /// Written trace and report files.
    pub files: Vec<PathBuf>,
}

/// Simulation of one experiment run with all its components.
///
/// Everything is built and validated in [`Experiment::new`], before virtual time starts.
pub struct Experiment {
    config: ExperimentConfig,
    sim: Simulation,
    network: Rc<RefCell<Network>>,
    flow_monitor: Rc<RefCell<FlowMonitor>>,
    installer: FlowInstaller,
    traces: TraceHarness,
    samplers: Vec<String>,
    ctx: SimulationContext,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut builder = TopologyBuilder::new();
        for name in config.node_names() {
            builder.add_node(&name);
        }
        for link in &config.links {
            builder.add_link(link.clone());
        }
        let topology = Rc::new(builder.build()?);

        let mut sim = Simulation::with_run(config.seed, config.run);
        let network_ctx = sim.create_context("network");
        let network = Rc::new(RefCell::new(Network::new(topology.clone(), config.queue_size, network_ctx)));
        sim.add_handler("network", network.clone());
        let flow_monitor = Rc::new(RefCell::new(FlowMonitor::new()));
        network.borrow_mut().install_flow_monitor(flow_monitor.clone());

        let mut installer = FlowInstaller::new(network.clone(), sim.create_context("flow-installer"));
        installer.install(&mut sim, config.flow_specs())?;

        let mut traces = TraceHarness::new(&config.output_dir, &config.name);
        traces.set_flow_monitor(flow_monitor.clone());
        let mut samplers = Vec::new();
        for flow in installer.flows() {
            let cwnd = flow.socket().borrow_mut().cwnd_trace();
            let sink_addr = flow.sink_addr();
            let drops = network
                .borrow_mut()
                .subscribe_drops_filtered(move |drop: &PacketDrop| drop.packet.involves(sink_addr));
            let throughput = config.throughput_interval.map(|interval| {
                let name = format!("{}-tput", flow.name());
                let mut sampler = ThroughputSampler::new(flow.sink(), interval, sim.create_context(&name));
                let samples = sampler.subscribe();
                sampler.start();
                sim.add_handler(&name, Rc::new(RefCell::new(sampler)));
                samplers.push(name);
                samples
            });
            traces.attach_flow(cwnd, drops, throughput);
        }

        let mut ctx = sim.create_context("experiment");
        let network_id = network.borrow().id();
        for change in &config.delay_changes {
            ctx.emit(
                SetLinkDelay {
                    link: change.link,
                    delay: change.delay.secs(),
                },
                network_id,
                change.time,
            );
        }
        log_info!(
            ctx,
            "experiment `{}` run {}: {} nodes, {} links, {} flows",
            config.name,
            config.run,
            topology.node_count(),
            topology.link_count(),
            installer.flows().len()
        );

        Ok(Self {
            config,
            sim,
            network,
            flow_monitor,
            installer,
            traces,
            samplers,
            ctx,
        })
    }

    /// Loads config from a YAML file and builds the experiment.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self, Error> {
        Self::new(ExperimentConfig::from_file(path.into())?)
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn simulation(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn network(&self) -> Rc<RefCell<Network>> {
        self.network.clone()
    }

    pub fn flow_monitor(&self) -> Rc<RefCell<FlowMonitor>> {
        self.flow_monitor.clone()
    }

    pub fn installer(&self) -> &FlowInstaller {
        &self.installer
    }

    pub fn traces(&self) -> &TraceHarness {
        &self.traces
    }

    /// Advances the simulation to `time`, not beyond the configured duration.
    pub fn step_until(&mut self, time: f64) {
        self.sim.step_until_time(time.min(self.config.duration));
        self.traces.collect();
    }

    /// Runs the experiment until the configured duration and finishes it.
    pub fn run(&mut self) -> Result<RunSummary, Error> {
        self.sim.step_until_time(self.config.duration);
        self.finish()
    }

    /// Writes traces and the flow statistics report, then removes all flows.
    ///
    /// Flows are removed even if writing fails. Finishing a run twice returns an error.
    pub fn finish(&mut self) -> Result<RunSummary, Error> {
        let end_time = self.sim.time();
        self.traces.collect();
        let flows = self
            .installer
            .flows()
            .iter()
            .map(|flow| {
                let engine = flow.engine();
                let engine = engine.borrow();
                let sink = flow.sink();
                let sink = sink.borrow();
                FlowSummary {
                    flow: flow.index(),
                    src: flow.spec().src.clone(),
                    dst: flow.spec().dst.clone(),
                    transport: flow.spec().transport,
                    packets_sent: engine.packets_sent(),
                    send_errors: engine.send_errors(),
                    scheduling_races: engine.scheduling_races(),
                    rx_packets: sink.rx_packets(),
                    rx_bytes: sink.rx_bytes(),
                    traces: self.traces.counts(flow.index()).unwrap_or_default(),
                }
            })
            .collect::<Vec<_>>();

        let flushed = self.traces.flush(end_time);
        self.installer.teardown(&mut self.sim);
        for name in self.samplers.drain(..) {
            self.sim.remove_handler(&name, EventCancellationPolicy::All);
        }
        let files = match flushed {
            Ok(files) => files,
            Err(err) => {
                log_warn!(self.ctx, "{}", err);
                return Err(err.into());
            }
        };

        for flow in &flows {
            log_info!(
                self.ctx,
                "flow{}: {} packets sent, {} bytes received",
                flow.flow,
                flow.packets_sent,
                flow.rx_bytes
            );
        }
        Ok(RunSummary {
            name: self.config.name.clone(),
            run: self.config.run,
            end_time,
            flows,
            files,
        })
    }
}
