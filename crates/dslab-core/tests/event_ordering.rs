use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::{cast, Event, EventHandler, Simulation, SimulationContext};

#[derive(Clone, Serialize)]
struct Mark {
    label: u32,
}

#[derive(Clone, Serialize)]
struct CancelPending {}

struct Recorder {
    seen: Vec<(f64, u32)>,
    pending: Option<u64>,
    ctx: SimulationContext,
}

impl EventHandler for Recorder {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Mark { label } => {
                self.seen.push((self.ctx.time(), label));
            }
            CancelPending {} => {
                if let Some(id) = self.pending.take() {
                    self.ctx.cancel_event(id);
                }
            }
        })
    }
}

fn make_recorder(sim: &mut Simulation) -> (Rc<RefCell<Recorder>>, u32) {
    let ctx = sim.create_context("recorder");
    let recorder = Rc::new(RefCell::new(Recorder {
        seen: Vec::new(),
        pending: None,
        ctx,
    }));
    let id = sim.add_handler("recorder", recorder.clone());
    (recorder, id)
}

#[test]
fn test_equal_time_events_are_fifo() {
    let mut sim = Simulation::new(123);
    let (recorder, id) = make_recorder(&mut sim);
    let mut driver = sim.create_context("driver");
    driver.emit(Mark { label: 1 }, id, 2.0);
    driver.emit(Mark { label: 2 }, id, 1.0);
    driver.emit(Mark { label: 3 }, id, 2.0);
    driver.emit(Mark { label: 4 }, id, 1.0);
    sim.step_until_no_events();
    let labels: Vec<u32> = recorder.borrow().seen.iter().map(|(_, l)| *l).collect();
    assert_eq!(labels, vec![2, 4, 1, 3]);
}

#[test]
fn test_cancellation_at_same_timestamp() {
    let mut sim = Simulation::new(123);
    let (recorder, id) = make_recorder(&mut sim);
    let mut driver = sim.create_context("driver");
    // The cancelling event is submitted first, so it runs first at t=1
    // and must suppress the event that is already due at the same time.
    driver.emit(CancelPending {}, id, 1.0);
    let pending = driver.emit(Mark { label: 7 }, id, 1.0);
    recorder.borrow_mut().pending = Some(pending);
    sim.step_until_no_events();
    assert!(recorder.borrow().seen.is_empty());
    assert_eq!(sim.time(), 1.0);
}

#[test]
fn test_step_until_time_stops_at_boundary() {
    let mut sim = Simulation::new(123);
    let (recorder, id) = make_recorder(&mut sim);
    let mut driver = sim.create_context("driver");
    for i in 0..10 {
        driver.emit(Mark { label: i }, id, i as f64);
    }
    assert!(sim.step_until_time(4.0));
    assert_eq!(recorder.borrow().seen.len(), 5);
    assert_eq!(sim.time(), 4.0);
    assert_eq!(sim.pending_event_count(), 5);
    assert!(!sim.step_until_time(100.0));
    assert_eq!(recorder.borrow().seen.len(), 10);
}

#[test]
fn test_run_index_selects_random_stream() {
    let draw = |run: u64| {
        let mut sim = Simulation::with_run(1, run);
        (0..5).map(|_| sim.rand()).collect::<Vec<f64>>()
    };
    assert_eq!(draw(0), draw(0));
    assert_ne!(draw(0), draw(1));
    let mut sim = Simulation::new(1);
    assert_eq!((0..5).map(|_| sim.rand()).collect::<Vec<f64>>(), draw(0));
}

#[test]
fn test_steps_and_step_for_duration() {
    let mut sim = Simulation::new(123);
    let (recorder, id) = make_recorder(&mut sim);
    let mut driver = sim.create_context("driver");
    for i in 0..10 {
        driver.emit(Mark { label: i }, id, i as f64);
    }
    assert!(sim.steps(3));
    assert_eq!(recorder.borrow().seen.len(), 3);
    assert_eq!(sim.time(), 2.0);
    // events at 3, 4 and 5
    assert!(sim.step_for_duration(3.5));
    assert_eq!(recorder.borrow().seen.len(), 6);
    assert_eq!(sim.time(), 5.0);
    assert!(!sim.steps(10));
    assert_eq!(recorder.borrow().seen.len(), 10);
    assert!(!sim.step_for_duration(1.0));
}

#[test]
fn test_gen_range_is_reproducible() {
    let draw = || {
        let mut sim = Simulation::new(7);
        (0..20).map(|_| sim.gen_range(10..20)).collect::<Vec<u32>>()
    };
    let values = draw();
    assert!(values.iter().all(|v| (10..20).contains(v)));
    assert_eq!(values, draw());
}
