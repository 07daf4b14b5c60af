//! Experiment configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dslab_network::link::LinkId;
use dslab_network::{DataRate, Delay, LinkSpec, TransportVariant};

use crate::error::Error;
use crate::flows::FlowSpec;
use crate::pacing::PacingConfig;

/// Flow description in a config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowConfig {
    pub src: String,
    pub dst: String,
    pub port: u16,
    /// Overrides the experiment transport for this flow.
    #[serde(default)]
    pub transport: Option<TransportVariant>,
    #[serde(flatten)]
    pub pacing: PacingConfig,
    pub start: f64,
    pub stop: f64,
}

/// Scheduled change of a link propagation delay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelayChange {
    /// Time of the change.
    pub time: f64,
    /// Link index in declaration order.
    pub link: LinkId,
    pub delay: Delay,
}

/// Complete description of one experiment run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name, used as the base name of output files.
    pub name: String,
    /// Run index selecting the random stream.
    #[serde(default)]
    pub run: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Transport of flows which do not set their own.
    #[serde(default = "default_transport")]
    pub transport: TransportVariant,
    /// Virtual time the run stops at.
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Default capacity of link queues in packets.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Interval of per-flow throughput sampling, disabled if not set.
    #[serde(default)]
    pub throughput_interval: Option<f64>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Node names, derived from links in the order of appearance if empty.
    #[serde(default)]
    pub nodes: Vec<String>,
    pub links: Vec<LinkSpec>,
    /// Link affected by the error rate and delay overrides, the slowest link if not set.
    #[serde(default)]
    pub bottleneck: Option<LinkId>,
    pub flows: Vec<FlowConfig>,
    #[serde(default)]
    pub delay_changes: Vec<DelayChange>,
}

fn default_seed() -> u64 {
    1
}

fn default_transport() -> TransportVariant {
    TransportVariant::TcpNewReno
}

fn default_duration() -> f64 {
    60.
}

fn default_queue_size() -> usize {
    dslab_network::network::DEFAULT_QUEUE_SIZE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Names of built-in configurations.
pub const PRESETS: [&str; 2] = ["dumbbell", "single"];

impl ExperimentConfig {
    /// Reads config from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Returns a built-in configuration.
    pub fn preset(name: &str) -> Result<Self, Error> {
        match name {
            "dumbbell" => Ok(Self::dumbbell()),
            "single" => Ok(Self::single()),
            _ => Err(Error::InvalidConfig(format!(
                "unknown preset `{}`, available: {}",
                name,
                PRESETS.join(", ")
            ))),
        }
    }

    fn base(name: &str, links: Vec<LinkSpec>, flows: Vec<FlowConfig>) -> Self {
        Self {
            name: name.to_string(),
            run: 0,
            seed: default_seed(),
            transport: default_transport(),
            duration: default_duration(),
            queue_size: default_queue_size(),
            throughput_interval: None,
            output_dir: default_output_dir(),
            nodes: Vec::new(),
            links,
            bottleneck: None,
            flows,
            delay_changes: Vec::new(),
        }
    }

    /// Two senders and two receivers connected through a 10 Mbps bottleneck between two switches.
    pub fn dumbbell() -> Self {
        let access = |a: &str, b: &str| LinkSpec::new(a, b, DataRate::mbps(50.), Delay::ms(5.));
        let links = vec![
            access("sender1", "switch1"),
            access("sender2", "switch1"),
            LinkSpec::new("switch1", "switch2", DataRate::mbps(10.), Delay::ms(20.)),
            access("switch2", "receiver1"),
            access("switch2", "receiver2"),
        ];
        let flow = |src: &str, dst: &str| FlowConfig {
            src: src.to_string(),
            dst: dst.to_string(),
            port: 8080,
            transport: None,
            pacing: PacingConfig::new(1024, 0, DataRate::mbps(20.)),
            start: 1.,
            stop: 60.,
        };
        let mut config = Self::base(
            "both_new_reno",
            links,
            vec![flow("sender1", "receiver1"), flow("sender2", "receiver2")],
        );
        config.nodes = ["sender1", "sender2", "switch1", "switch2", "receiver1", "receiver2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config
    }

    /// A single 10 Mbps link between a sender and a receiver.
    pub fn single() -> Self {
        let link = LinkSpec::new("sender", "receiver", DataRate::mbps(10.), Delay::ms(20.))
            .with_network("192.168.1.0/30".parse().expect("valid address block"));
        let flow = FlowConfig {
            src: "sender".to_string(),
            dst: "receiver".to_string(),
            port: 8080,
            transport: None,
            pacing: PacingConfig::new(1024, 0, DataRate::mbps(1.)),
            start: 1.,
            stop: 30.,
        };
        Self::base("base", vec![link], vec![flow])
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> Vec<String> {
        if !self.nodes.is_empty() {
            return self.nodes.clone();
        }
        let mut names: Vec<String> = Vec::new();
        for link in &self.links {
            for name in [&link.a, &link.b] {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Index of the bottleneck link.
    pub fn bottleneck_link(&self) -> Option<LinkId> {
        if self.bottleneck.is_some() {
            return self.bottleneck;
        }
        self.links
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.rate.bps().total_cmp(&b.rate.bps()))
            .map(|(id, _)| id)
    }

    /// Sets the loss probability of the bottleneck link.
    pub fn set_bottleneck_error_rate(&mut self, error_rate: f64) -> Result<(), Error> {
        let link = self.bottleneck_index()?;
        self.links[link].error_rate = Some(error_rate);
        Ok(())
    }

    /// Sets the propagation delay of the bottleneck link.
    pub fn set_bottleneck_delay(&mut self, delay: Delay) -> Result<(), Error> {
        let link = self.bottleneck_index()?;
        self.links[link].delay = delay;
        Ok(())
    }

    fn bottleneck_index(&self) -> Result<LinkId, Error> {
        match self.bottleneck_link() {
            Some(link) if link < self.links.len() => Ok(link),
            _ => Err(Error::InvalidConfig("no bottleneck link".to_string())),
        }
    }

    /// Flow specifications with the experiment transport applied.
    pub fn flow_specs(&self) -> Vec<FlowSpec> {
        self.flows
            .iter()
            .map(|f| FlowSpec {
                src: f.src.clone(),
                dst: f.dst.clone(),
                port: f.port,
                transport: f.transport.unwrap_or(self.transport),
                pacing: f.pacing.clone(),
                start: f.start,
                stop: f.stop,
            })
            .collect()
    }

    /// Checks parameters not covered by topology and flow validation.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("experiment name is empty".to_string()));
        }
        if !(self.duration.is_finite() && self.duration > 0.) {
            return Err(Error::InvalidConfig(format!("duration must be positive, got {}", self.duration)));
        }
        if self.queue_size == 0 {
            return Err(Error::InvalidConfig("queue size must be positive".to_string()));
        }
        if let Some(interval) = self.throughput_interval {
            if !(interval.is_finite() && interval > 0.) {
                return Err(Error::InvalidConfig(format!(
                    "throughput interval must be positive, got {}",
                    interval
                )));
            }
        }
        if let Some(link) = self.bottleneck {
            if link >= self.links.len() {
                return Err(Error::InvalidConfig(format!("bottleneck link {} does not exist", link)));
            }
        }
        for change in &self.delay_changes {
            if change.link >= self.links.len() {
                return Err(Error::InvalidConfig(format!(
                    "delay change refers to missing link {}",
                    change.link
                )));
            }
            if !(change.time.is_finite() && change.time >= 0.) {
                return Err(Error::InvalidConfig(format!("delay change time {} is invalid", change.time)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_yaml() {
        let config = ExperimentConfig::from_yaml(
            r#"
name: test
run: 3
transport: TcpTahoe
duration: 10
links:
  - { a: h1, b: r, rate: 10Mbps, delay: 5ms }
  - { a: r, b: h2, rate: 1Mbps, delay: 0.02, error_rate: 0.01, queue_size: 10 }
flows:
  - src: h1
    dst: h2
    port: 9
    transport: Udp
    packet_size: 512
    packet_count: 100
    data_rate: 500kbps
    start: 1
    stop: 5
delay_changes:
  - { time: 2, link: 1, delay: 50ms }
"#,
        )
        .unwrap();
        assert_eq!(config.run, 3);
        assert_eq!(config.seed, 1);
        assert_eq!(config.queue_size, 100);
        assert_eq!(config.node_names(), vec!["h1", "r", "h2"]);
        assert_eq!(config.links[1].rate.bps(), 1e6);
        assert_eq!(config.links[1].delay.secs(), 0.02);
        assert_eq!(config.bottleneck_link(), Some(1));
        let flows = config.flow_specs();
        assert_eq!(flows[0].transport, TransportVariant::Udp);
        assert_eq!(flows[0].pacing.packet_count, 100);
        assert_eq!(flows[0].pacing.data_rate.bps(), 5e5);
        assert_eq!(config.delay_changes[0].delay.secs(), 0.05);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = ExperimentConfig::from_yaml("name: x\ntransport: TcpVegas\nlinks: []\nflows: []\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn presets() {
        let dumbbell = ExperimentConfig::preset("dumbbell").unwrap();
        assert_eq!(dumbbell.links.len(), 5);
        assert_eq!(dumbbell.bottleneck_link(), Some(2));
        assert_eq!(dumbbell.flows.len(), 2);
        assert_eq!(dumbbell.duration, 60.);
        let single = ExperimentConfig::preset("single").unwrap();
        assert_eq!(single.flows[0].stop, 30.);
        assert!(matches!(ExperimentConfig::preset("ring"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn bottleneck_overrides() {
        let mut config = ExperimentConfig::dumbbell();
        config.set_bottleneck_error_rate(0.001).unwrap();
        config.set_bottleneck_delay(Delay::ms(100.)).unwrap();
        assert_eq!(config.links[2].error_rate, Some(0.001));
        assert_eq!(config.links[2].delay.secs(), 0.1);
        assert_eq!(config.links[0].error_rate, None);
    }
}
