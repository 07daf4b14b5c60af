//! Tests of event cancellation policies on event handler removal.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::{Event, EventCancellationPolicy, EventHandler, Simulation};

#[derive(Clone, Serialize)]
struct TestEvent {}

struct Counter {
    received: usize,
}

impl EventHandler for Counter {
    fn on(&mut self, _: Event) {
        self.received += 1;
    }
}

fn prepare_test() -> (Simulation, Rc<RefCell<Counter>>, Rc<RefCell<Counter>>) {
    let mut sim = Simulation::new(123);
    let comp1 = Rc::new(RefCell::new(Counter { received: 0 }));
    let comp2 = Rc::new(RefCell::new(Counter { received: 0 }));
    let comp1_id = sim.add_handler("comp1", comp1.clone());
    let comp2_id = sim.add_handler("comp2", comp2.clone());

    let mut ctx1 = sim.create_context("comp1");
    let mut ctx2 = sim.create_context("comp2");
    ctx1.emit(TestEvent {}, comp2_id, 1.);
    ctx2.emit(TestEvent {}, comp1_id, 1.);
    ctx2.emit(TestEvent {}, comp2_id, 1.);
    ctx1.emit(TestEvent {}, comp1_id, 1.);
    (sim, comp1, comp2)
}

#[test]
fn test_none_policy() {
    let (mut sim, _, comp2) = prepare_test();
    sim.remove_handler("comp1", EventCancellationPolicy::None);
    assert_eq!(sim.pending_event_count(), 4);
    sim.step_until_no_events();
    assert_eq!(comp2.borrow().received, 2);
}

#[test]
fn test_incoming_policy() {
    let (mut sim, _, comp2) = prepare_test();
    sim.remove_handler("comp1", EventCancellationPolicy::Incoming);
    assert_eq!(sim.pending_event_count(), 2);
    sim.step_until_no_events();
    assert_eq!(comp2.borrow().received, 2);
}

#[test]
fn test_outgoing_policy() {
    let (mut sim, _, comp2) = prepare_test();
    sim.remove_handler("comp1", EventCancellationPolicy::Outgoing);
    assert_eq!(sim.pending_event_count(), 2);
    sim.step_until_no_events();
    assert_eq!(comp2.borrow().received, 1);
}

#[test]
fn test_all_policy() {
    let (mut sim, comp1, comp2) = prepare_test();
    sim.remove_handler("comp1", EventCancellationPolicy::All);
    assert_eq!(sim.pending_event_count(), 1);
    sim.step_until_no_events();
    assert_eq!(comp1.borrow().received, 0);
    assert_eq!(comp2.borrow().received, 1);
}
