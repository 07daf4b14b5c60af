//! Per-flow traffic statistics.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddrV4;
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::network::DropReason;
use crate::packet::{Packet, Protocol};

/// Flow classification key (the 5-tuple).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    /// Source endpoint.
    pub src: SocketAddrV4,
    /// Destination endpoint.
    pub dst: SocketAddrV4,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl FlowKey {
    /// Classifies the packet.
    pub fn of(packet: &Packet) -> Self {
        Self {
            src: packet.src,
            dst: packet.dst,
            protocol: packet.protocol,
        }
    }
}

/// Statistics accumulated for a single flow.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FlowStats {
    /// Packets handed to the network by the source.
    pub tx_packets: u64,
    /// Bytes (on the wire) handed to the network by the source.
    pub tx_bytes: u64,
    /// Packets which reached the destination node.
    pub rx_packets: u64,
    /// Bytes (on the wire) which reached the destination node.
    pub rx_bytes: u64,
    /// Packets dropped on the way.
    pub lost_packets: u64,
    /// Dropped packets by drop reason.
    pub drops: BTreeMap<DropReason, u64>,
    /// Sum of one-way delays of received packets.
    pub delay_sum: f64,
    /// Sum of delay differences between consecutive received packets.
    pub jitter_sum: f64,
    /// Time of the first transmission.
    pub time_first_tx: Option<f64>,
    /// Time of the last transmission.
    pub time_last_tx: Option<f64>,
    /// Time of the first reception.
    pub time_first_rx: Option<f64>,
    /// Time of the last reception.
    pub time_last_rx: Option<f64>,
    #[serde(skip)]
    last_delay: Option<f64>,
}

impl FlowStats {
    /// Received bits per second between the first transmission and the last reception.
    pub fn throughput_bps(&self) -> f64 {
        match (self.time_first_tx, self.time_last_rx) {
            (Some(first), Some(last)) if last > first => self.rx_bytes as f64 * 8. / (last - first),
            _ => 0.,
        }
    }

    /// Mean one-way delay of received packets.
    pub fn mean_delay(&self) -> Option<f64> {
        (self.rx_packets > 0).then(|| self.delay_sum / self.rx_packets as f64)
    }

    /// Mean jitter of received packets.
    pub fn mean_jitter(&self) -> Option<f64> {
        (self.rx_packets > 1).then(|| self.jitter_sum / (self.rx_packets - 1) as f64)
    }

    /// Fraction of transmitted packets which were dropped.
    pub fn loss_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            0.
        } else {
            self.lost_packets as f64 / self.tx_packets as f64
        }
    }
}

/// Report entry for a single flow.
#[derive(Debug, Serialize)]
pub struct FlowReport {
    /// Flow number, assigned in the order of first transmission starting from 1.
    pub flow_id: usize,
    /// Flow classification.
    #[serde(flatten)]
    pub key: FlowKey,
    /// Raw counters.
    #[serde(flatten)]
    pub stats: FlowStats,
    /// See [`FlowStats::throughput_bps`].
    pub throughput_bps: f64,
    /// See [`FlowStats::mean_delay`].
    pub mean_delay: Option<f64>,
    /// See [`FlowStats::mean_jitter`].
    pub mean_jitter: Option<f64>,
    /// See [`FlowStats::loss_ratio`].
    pub loss_ratio: f64,
}

/// Aggregate report over all flows observed in a run.
#[derive(Debug, Serialize)]
pub struct FlowMonitorReport {
    /// Time the report was taken at.
    pub time: f64,
    /// Per-flow entries.
    pub flows: Vec<FlowReport>,
}

/// Collects per-flow statistics for every packet passing through the network.
///
/// Installed on the [`Network`](crate::network::Network), which reports every transmission,
/// reception and drop to it.
#[derive(Default)]
pub struct FlowMonitor {
    flows: IndexMap<FlowKey, FlowStats>,
}

impl FlowMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a packet entering the network at its source node.
    pub fn record_tx(&mut self, time: f64, packet: &Packet) {
        let stats = self.flows.entry(FlowKey::of(packet)).or_default();
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size as u64;
        stats.time_first_tx.get_or_insert(time);
        stats.time_last_tx = Some(time);
    }

    /// Records a packet arriving at its destination node.
    pub fn record_rx(&mut self, time: f64, packet: &Packet) {
        let stats = self.flows.entry(FlowKey::of(packet)).or_default();
        let delay = time - packet.sent_at;
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size as u64;
        stats.delay_sum += delay;
        if let Some(last) = stats.last_delay {
            stats.jitter_sum += (delay - last).abs();
        }
        stats.last_delay = Some(delay);
        stats.time_first_rx.get_or_insert(time);
        stats.time_last_rx = Some(time);
    }

    /// Records a packet dropped on the way.
    pub fn record_drop(&mut self, packet: &Packet, reason: DropReason) {
        let stats = self.flows.entry(FlowKey::of(packet)).or_default();
        stats.lost_packets += 1;
        *stats.drops.entry(reason).or_default() += 1;
    }

    /// Returns statistics of the flow.
    pub fn stats(&self, key: &FlowKey) -> Option<&FlowStats> {
        self.flows.get(key)
    }

    /// Returns the number of observed flows.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Builds the aggregate report.
    pub fn report(&self, time: f64) -> FlowMonitorReport {
        FlowMonitorReport {
            time,
            flows: self
                .flows
                .iter()
                .enumerate()
                .map(|(idx, (key, stats))| FlowReport {
                    flow_id: idx + 1,
                    key: *key,
                    stats: stats.clone(),
                    throughput_bps: stats.throughput_bps(),
                    mean_delay: stats.mean_delay(),
                    mean_jitter: stats.mean_jitter(),
                    loss_ratio: stats.loss_ratio(),
                })
                .collect(),
        }
    }

    /// Writes the aggregate report as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, time: f64) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.report(time))?;
        writer.flush()
    }
}
