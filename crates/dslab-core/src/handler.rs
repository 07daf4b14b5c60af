//! Event handling.

use crate::event::Event;

/// Trait for consuming events in simulation components.
pub trait EventHandler {
    /// Processes event.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use serde::Serialize;
    /// use dslab_core::{cast, Event, EventHandler, Simulation, SimulationContext};
    ///
    /// #[derive(Clone, Serialize)]
    /// pub struct Tick {
    ///     seq: u32,
    /// }
    ///
    /// pub struct Counter {
    ///     last: u32,
    ///     ctx: SimulationContext,
    /// }
    ///
    /// impl EventHandler for Counter {
    ///     fn on(&mut self, event: Event) {
    ///         cast!(match event.data {
    ///             Tick { seq } => {
    ///                 self.last = seq;
    ///             }
    ///         })
    ///     }
    /// }
    ///
    /// let mut sim = Simulation::new(123);
    /// let mut driver_ctx = sim.create_context("driver");
    /// let counter_ctx = sim.create_context("counter");
    /// let counter = Rc::new(RefCell::new(Counter { last: 0, ctx: counter_ctx }));
    /// let counter_id = sim.add_handler("counter", counter.clone());
    /// driver_ctx.emit(Tick { seq: 7 }, counter_id, 0.5);
    /// sim.step();
    /// assert_eq!(counter.borrow().last, 7);
    /// ```
    fn on(&mut self, event: Event);
}

/// Enables the use of pattern matching syntax for processing different types of events
/// by downcasting the event payload from [`EventData`](crate::event::EventData) to user-defined types.
///
/// Match arms need not be exhaustive. If the event payload does not match any of specified arms,
/// the macro logs the event as unhandled under `ERROR` level.
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}

/// Specifies which pending events are cancelled on event handler removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventCancellationPolicy {
    /// Cancel events destined to the component.
    Incoming,
    /// Cancel events produced by the component.
    Outgoing,
    /// Cancel all events related to the component.
    All,
    /// Do not cancel events.
    None,
}
