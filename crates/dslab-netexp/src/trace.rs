//! Trace recording.
//!
//! Notifications are drained from subscriptions into append-only [`TraceSink`]s, which are written out as
//! tab-separated files once at the end of the run:
//!
//! - `<name>-flow<N>.cwnd`: `<time>\t<old cwnd>\t<new cwnd>`
//! - `<name>-flow<N>.drops`: `<time>`
//! - `<name>-flow<N>.tput`: `<time>\t<Mbps>`
//! - `<name>.flowmonitor.json`: aggregate flow statistics

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;

use dslab_core::Subscription;
use dslab_network::{CwndChange, FlowMonitor, PacketDrop};

use crate::error::{FlushError, TraceError};
use crate::throughput::ThroughputSample;

/// Value which can be written as a row of a trace file.
pub trait TraceRow {
    fn write_row<W: Write>(&self, time: f64, out: &mut W) -> io::Result<()>;
}

impl TraceRow for CwndChange {
    fn write_row<W: Write>(&self, time: f64, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}\t{}\t{}", time, self.old, self.new)
    }
}

impl TraceRow for PacketDrop {
    fn write_row<W: Write>(&self, time: f64, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", time)
    }
}

impl TraceRow for ThroughputSample {
    fn write_row<W: Write>(&self, time: f64, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}\t{}", time, self.mbps)
    }
}

/// Append-only sequence of timestamped records destined to one file.
pub struct TraceSink<T> {
    path: PathBuf,
    records: Vec<(f64, T)>,
}

impl<T: TraceRow> TraceSink<T> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Vec::new(),
        }
    }

    /// Appends the record, rejecting it if it is older than the last one.
    pub fn append(&mut self, time: f64, value: T) -> Result<(), TraceError> {
        if let Some((last, _)) = self.records.last() {
            if time < *last {
                return Err(TraceError::OutOfOrder {
                    path: self.path.display().to_string(),
                    time,
                    last: *last,
                });
            }
        }
        self.records.push((time, value));
        Ok(())
    }

    pub fn records(&self) -> &[(f64, T)] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes all records to the file, replacing its contents.
    pub fn write(&self) -> Result<(), TraceError> {
        self.write_rows().map_err(|source| TraceError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn write_rows(&self) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        for (time, value) in &self.records {
            value.write_row(*time, &mut out)?;
        }
        out.flush()
    }
}

struct Traced<T> {
    subscription: Subscription<T>,
    sink: TraceSink<T>,
}

impl<T: TraceRow> Traced<T> {
    fn new(subscription: Subscription<T>, path: PathBuf) -> Self {
        Self {
            subscription,
            sink: TraceSink::new(path),
        }
    }

    fn collect(&mut self, errors: &mut Vec<TraceError>) {
        for (time, value) in self.subscription.drain() {
            if let Err(err) = self.sink.append(time, value) {
                errors.push(err);
            }
        }
    }
}

struct FlowTraces {
    cwnd: Option<Traced<CwndChange>>,
    drops: Traced<PacketDrop>,
    throughput: Option<Traced<ThroughputSample>>,
}

/// Number of records collected for a flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TraceCounts {
    pub cwnd: usize,
    pub drops: usize,
    pub throughput: usize,
}

/// Collects per-flow traces and the flow statistics report of one run.
pub struct TraceHarness {
    output_dir: PathBuf,
    name: String,
    flows: Vec<FlowTraces>,
    flow_monitor: Option<Rc<RefCell<FlowMonitor>>>,
    errors: Vec<TraceError>,
    flushed: bool,
}

impl TraceHarness {
    /// Creates a harness writing files named after the experiment `name` to `output_dir`.
    pub fn new<P: Into<PathBuf>>(output_dir: P, name: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            name: name.to_string(),
            flows: Vec::new(),
            flow_monitor: None,
            errors: Vec::new(),
            flushed: false,
        }
    }

    /// Makes the harness persist the report of the monitor on flush.
    pub fn set_flow_monitor(&mut self, monitor: Rc<RefCell<FlowMonitor>>) {
        self.flow_monitor = Some(monitor);
    }

    fn flow_path(&self, flow: usize, ext: &str) -> PathBuf {
        self.output_dir.join(format!("{}-flow{}.{}", self.name, flow, ext))
    }

    /// Path of the flow statistics report.
    pub fn flow_monitor_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.flowmonitor.json", self.name))
    }

    /// Starts tracing the next flow. Flows are numbered from 1 in the order of attachment.
    pub fn attach_flow(
        &mut self,
        cwnd: Option<Subscription<CwndChange>>,
        drops: Subscription<PacketDrop>,
        throughput: Option<Subscription<ThroughputSample>>,
    ) -> usize {
        let flow = self.flows.len() + 1;
        let traces = FlowTraces {
            cwnd: cwnd.map(|s| Traced::new(s, self.flow_path(flow, "cwnd"))),
            drops: Traced::new(drops, self.flow_path(flow, "drops")),
            throughput: throughput.map(|s| Traced::new(s, self.flow_path(flow, "tput"))),
        };
        self.flows.push(traces);
        flow
    }

    /// Moves pending notifications into the trace sinks.
    pub fn collect(&mut self) {
        if self.flushed {
            return;
        }
        for flow in self.flows.iter_mut() {
            if let Some(cwnd) = flow.cwnd.as_mut() {
                cwnd.collect(&mut self.errors);
            }
            flow.drops.collect(&mut self.errors);
            if let Some(throughput) = flow.throughput.as_mut() {
                throughput.collect(&mut self.errors);
            }
        }
    }

    /// Returns the number of records collected so far for the flow.
    pub fn counts(&self, flow: usize) -> Option<TraceCounts> {
        let traces = self.flows.get(flow.checked_sub(1)?)?;
        Some(TraceCounts {
            cwnd: traces.cwnd.as_ref().map_or(0, |t| t.sink.len()),
            drops: traces.drops.sink.len(),
            throughput: traces.throughput.as_ref().map_or(0, |t| t.sink.len()),
        })
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Writes every trace and the flow statistics report taken at `time`, returns the written files.
    ///
    /// Can be called once per run. Failures of individual files do not prevent writing the others,
    /// all of them are reported together with errors recorded during the run.
    pub fn flush(&mut self, time: f64) -> Result<Vec<PathBuf>, FlushError> {
        if self.flushed {
            return Err(FlushError::AlreadyFlushed);
        }
        self.collect();
        self.flushed = true;

        let mut errors = std::mem::take(&mut self.errors);
        let mut files = Vec::new();
        if let Err(source) = std::fs::create_dir_all(&self.output_dir) {
            errors.push(TraceError::Write {
                path: self.output_dir.display().to_string(),
                source,
            });
        }
        let mut write = |result: Result<(), TraceError>, path: &Path| match result {
            Ok(()) => files.push(path.to_path_buf()),
            Err(err) => errors.push(err),
        };
        for flow in &self.flows {
            if let Some(cwnd) = &flow.cwnd {
                write(cwnd.sink.write(), cwnd.sink.path());
            }
            write(flow.drops.sink.write(), flow.drops.sink.path());
            if let Some(throughput) = &flow.throughput {
                write(throughput.sink.write(), throughput.sink.path());
            }
        }
        if let Some(monitor) = &self.flow_monitor {
            let path = self.flow_monitor_path();
            let result = monitor.borrow().save_to_file(&path, time);
            write(
                result.map_err(|source| TraceError::Write {
                    path: path.display().to_string(),
                    source,
                }),
                &path,
            );
        }

        if errors.is_empty() {
            Ok(files)
        } else {
            Err(FlushError::Failed(errors))
        }
    }
}
