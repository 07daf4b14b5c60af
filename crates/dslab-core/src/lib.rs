#![warn(missing_docs)]
//! Discrete-event simulation core used by the network experiment harness.
//!
//! Components register [`EventHandler`] implementations and exchange events through their
//! [`SimulationContext`]. Events are processed in the order of their virtual time, events with equal
//! time are processed in the order they were emitted.

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
pub mod notify;
pub mod simulation;
mod state;

pub use colored;
pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventId};
pub use handler::{EventCancellationPolicy, EventHandler};
pub use notify::{Publisher, Subscription};
pub use simulation::Simulation;
pub use state::EPSILON;
