//! Rate-paced packet source.
//!
//! A [`PacingEngine`] writes fixed-size packets into a transport [`Socket`] at the interval
//! `packet_size * 8 / data_rate`. The first packet is written immediately on start, every next one is
//! written by a self-scheduled `SendPacket` event. At most one such event is pending at any time, and
//! stopping the engine cancels it.

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use dslab_core::notify::{Publisher, Subscription};
use dslab_core::{cast, log_debug, log_error, log_warn, Event, EventHandler, EventId, SimulationContext};
use dslab_network::{DataRate, Socket};

use crate::error::PacingError;

/// Largest application payload of a single packet, the payload limit of a UDP datagram.
pub const MAX_PACKET_SIZE: u32 = 65507;

/// Parameters of a traffic source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Application payload of each packet in bytes.
    pub packet_size: u32,
    /// Number of packets to send, zero means unbounded.
    #[serde(default)]
    pub packet_count: u64,
    /// Target send rate.
    pub data_rate: DataRate,
}

impl PacingConfig {
    pub fn new(packet_size: u32, packet_count: u64, data_rate: DataRate) -> Self {
        Self {
            packet_size,
            packet_count,
            data_rate,
        }
    }

    pub fn validate(&self) -> Result<(), PacingError> {
        if self.packet_size == 0 {
            return Err(PacingError::InvalidConfig("packet size must be positive".to_string()));
        }
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(PacingError::InvalidConfig(format!(
                "packet size {} exceeds {} bytes",
                self.packet_size, MAX_PACKET_SIZE
            )));
        }
        let bps = self.data_rate.bps();
        if !bps.is_finite() || bps <= 0. {
            return Err(PacingError::InvalidConfig(format!("data rate must be positive, got {}", bps)));
        }
        Ok(())
    }

    /// Time between consecutive packets.
    pub fn interval(&self) -> f64 {
        self.data_rate.transmission_time(self.packet_size)
    }

    pub fn is_bounded(&self) -> bool {
        self.packet_count > 0
    }
}

/// Capability of scheduling the next emission of a pacing engine.
///
/// Scheduled emissions are delivered back to the engine via [`PacingEngine::on_send_event`].
pub trait Scheduler {
    /// Current virtual time.
    fn time(&self) -> f64;
    /// Name used in log messages.
    fn name(&self) -> &str;
    /// Schedules an emission after `delay` and returns its handle.
    fn schedule(&mut self, delay: f64) -> EventId;
    /// Cancels a scheduled emission. Cancelled emissions are never delivered.
    fn cancel(&mut self, event: EventId);
}

impl Scheduler for SimulationContext {
    fn time(&self) -> f64 {
        SimulationContext::time(self)
    }

    fn name(&self) -> &str {
        SimulationContext::name(self)
    }

    fn schedule(&mut self, delay: f64) -> EventId {
        self.emit_self(SendPacket {}, delay)
    }

    fn cancel(&mut self, event: EventId) {
        self.cancel_event(event)
    }
}

#[derive(Clone, Serialize)]
pub struct StartPacing {}

#[derive(Clone, Serialize)]
pub struct StopPacing {}

#[derive(Clone, Serialize)]
pub struct SendPacket {}

/// Lifecycle state of a pacing engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PacingState {
    Idle,
    Running,
    Stopped,
}

/// Packet handed to the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Emission {
    /// Sequence number within the current run of the engine, starting from 1.
    pub seq: u64,
    /// Payload size in bytes.
    pub size: u32,
}

pub struct PacingEngine<S: Scheduler = SimulationContext> {
    config: Option<PacingConfig>,
    destination: Option<SocketAddrV4>,
    socket: Rc<RefCell<dyn Socket>>,
    state: PacingState,
    packets_sent: u64,
    pending_event: Option<EventId>,
    send_errors: u64,
    scheduling_races: u64,
    emissions: Publisher<Emission>,
    scheduler: S,
}

impl<S: Scheduler> PacingEngine<S> {
    pub fn new(socket: Rc<RefCell<dyn Socket>>, scheduler: S) -> Self {
        Self {
            config: None,
            destination: None,
            socket,
            state: PacingState::Idle,
            packets_sent: 0,
            pending_event: None,
            send_errors: 0,
            scheduling_races: 0,
            emissions: Publisher::new(),
            scheduler,
        }
    }

    /// Sets the traffic parameters and the endpoint to send to.
    ///
    /// Parameters cannot be changed while the engine is running.
    pub fn configure(&mut self, config: PacingConfig, destination: SocketAddrV4) -> Result<(), PacingError> {
        config.validate()?;
        if self.state == PacingState::Running {
            return Err(PacingError::AlreadyRunning);
        }
        self.config = Some(config);
        self.destination = Some(destination);
        Ok(())
    }

    /// Binds and connects the socket, sends the first packet and schedules the next one.
    pub fn start(&mut self) -> Result<(), PacingError> {
        if self.state == PacingState::Running {
            return Err(PacingError::AlreadyRunning);
        }
        let (Some(config), Some(destination)) = (self.config.as_ref(), self.destination) else {
            return Err(PacingError::NotConfigured);
        };
        let interval = config.interval();
        {
            let mut socket = self.socket.borrow_mut();
            socket.bind()?;
            socket.connect(destination)?;
        }
        self.packets_sent = 0;
        self.state = PacingState::Running;
        log_debug!(self.scheduler, "started pacing to {}, interval {:.6}s", destination, interval);
        self.send_next();
        Ok(())
    }

    /// Stops pacing, cancels the pending emission and closes the socket.
    ///
    /// Does nothing unless the engine is running.
    pub fn stop(&mut self) {
        if self.state != PacingState::Running {
            return;
        }
        self.state = PacingState::Stopped;
        if let Some(event) = self.pending_event.take() {
            self.scheduler.cancel(event);
        }
        self.socket.borrow_mut().close();
        log_debug!(self.scheduler, "stopped after {} packets", self.packets_sent);
    }

    /// Handles a scheduled emission.
    ///
    /// An emission which is not the pending one of a running engine is dropped.
    pub fn on_send_event(&mut self, event: EventId) -> Result<(), PacingError> {
        if self.state != PacingState::Running || self.pending_event != Some(event) {
            self.scheduling_races += 1;
            let err = PacingError::SchedulingRace {
                event,
                state: format!("{:?}", self.state),
            };
            log_error!(self.scheduler, "{}", err);
            return Err(err);
        }
        self.pending_event = None;
        self.send_next();
        Ok(())
    }

    fn send_next(&mut self) {
        let Some(config) = self.config.as_ref() else {
            return;
        };
        let (size, interval) = (config.packet_size, config.interval());
        let has_more = |sent: u64| !config.is_bounded() || sent < config.packet_count;

        if let Err(err) = self.socket.borrow_mut().send(size) {
            self.send_errors += 1;
            log_warn!(self.scheduler, "failed to send packet {}: {}", self.packets_sent + 1, err);
        }
        self.packets_sent += 1;
        self.emissions.publish(
            self.scheduler.time(),
            Emission {
                seq: self.packets_sent,
                size,
            },
        );
        if has_more(self.packets_sent) {
            self.pending_event = Some(self.scheduler.schedule(interval));
        } else {
            log_debug!(self.scheduler, "sent all {} packets", self.packets_sent);
        }
    }

    pub fn state(&self) -> PacingState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PacingState::Running
    }

    /// Number of packets sent since the last start.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Number of packets the socket refused to accept.
    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// Number of dropped emissions which fired out of turn.
    pub fn scheduling_races(&self) -> u64 {
        self.scheduling_races
    }

    pub fn pending_event(&self) -> Option<EventId> {
        self.pending_event
    }

    pub fn config(&self) -> Option<&PacingConfig> {
        self.config.as_ref()
    }

    pub fn socket(&self) -> Rc<RefCell<dyn Socket>> {
        self.socket.clone()
    }

    /// Subscribes to packets written by the engine.
    pub fn subscribe_emissions(&mut self) -> Subscription<Emission> {
        self.emissions.subscribe()
    }
}

impl EventHandler for PacingEngine<SimulationContext> {
    fn on(&mut self, event: Event) {
        let event_id = event.id;
        cast!(match event.data {
            StartPacing {} => {
                if let Err(err) = self.start() {
                    log_error!(self.scheduler, "failed to start: {}", err);
                }
            }
            StopPacing {} => {
                self.stop();
            }
            SendPacket {} => {
                // races are logged and counted by the engine
                let _ = self.on_send_event(event_id);
            }
        })
    }
}
