//! Periodic throughput measurement at a receiver.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::notify::{Publisher, Subscription};
use dslab_core::{cast, log_trace, Event, EventHandler, SimulationContext};
use dslab_network::PacketSink;

/// Throughput over the last sampling interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThroughputSample {
    pub mbps: f64,
}

#[derive(Clone, Serialize)]
pub struct TakeSample {}

/// Samples bytes received by a sink every `interval` seconds.
pub struct ThroughputSampler {
    sink: Rc<RefCell<PacketSink>>,
    interval: f64,
    last_bytes: u64,
    samples: Publisher<ThroughputSample>,
    ctx: SimulationContext,
}

impl ThroughputSampler {
    pub fn new(sink: Rc<RefCell<PacketSink>>, interval: f64, ctx: SimulationContext) -> Self {
        Self {
            sink,
            interval,
            last_bytes: 0,
            samples: Publisher::new(),
            ctx,
        }
    }

    /// Schedules the first sample one interval from now.
    pub fn start(&mut self) {
        self.last_bytes = self.sink.borrow().rx_bytes();
        self.ctx.emit_self(TakeSample {}, self.interval);
    }

    pub fn subscribe(&mut self) -> Subscription<ThroughputSample> {
        self.samples.subscribe()
    }

    fn take_sample(&mut self) {
        let bytes = self.sink.borrow().rx_bytes();
        let mbps = (bytes - self.last_bytes) as f64 * 8. / self.interval / 1e6;
        self.last_bytes = bytes;
        log_trace!(self.ctx, "throughput {:.3} Mbps", mbps);
        self.samples.publish(self.ctx.time(), ThroughputSample { mbps });
        self.ctx.emit_self(TakeSample {}, self.interval);
    }
}

impl EventHandler for ThroughputSampler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            TakeSample {} => {
                self.take_sample();
            }
        })
    }
}
