//! Paced traffic generation and trace collection for network experiments.
//!
//! An [`Experiment`] builds a point-to-point topology from an [`ExperimentConfig`], installs flows, each driven by
//! a [`PacingEngine`] writing fixed-size packets into a transport socket at a constant rate, and records congestion
//! window changes, packet drops and throughput of every flow into tab-separated trace files along with a JSON
//! flow statistics report.

pub mod config;
pub mod error;
pub mod experiment;
pub mod flows;
pub mod pacing;
pub mod throughput;
pub mod trace;

pub use config::ExperimentConfig;
pub use error::{Error, FlushError, PacingError, TraceError};
pub use experiment::{Experiment, FlowSummary, RunSummary};
pub use flows::{FlowInstaller, FlowSpec, InstalledFlow};
pub use pacing::{PacingConfig, PacingEngine, PacingState, Scheduler};
pub use trace::{TraceHarness, TraceSink};
