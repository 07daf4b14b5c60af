//! Simulation events.

use std::cmp::Ordering;

use downcast_rs::{impl_downcast, Downcast};
use serde::ser::Serialize;

use crate::component::Id;

/// Event identifier, assigned sequentially in the order of event emission.
pub type EventId = u64;

/// Trait for event payloads.
///
/// Implemented automatically for every serializable `'static` type.
pub trait EventData: Downcast + erased_serde::Serialize {}

impl_downcast!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + 'static> EventData for T {}

/// Event delivered to a simulation component.
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Virtual time of event delivery.
    pub time: f64,
    /// Component which emitted the event.
    pub src: Id,
    /// Component the event is destined to.
    pub dst: Id,
    /// Event payload.
    pub data: Box<dyn EventData>,
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// The ordering is inverted to make BinaryHeap a min-heap by (time, id).
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.total_cmp(&self.time).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
