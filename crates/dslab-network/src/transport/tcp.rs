//! Reliable byte-stream sender with window-based congestion control.

use std::cell::RefCell;
use std::net::SocketAddrV4;
use std::rc::Rc;

use serde::Serialize;

use dslab_core::notify::{Publisher, Subscription};
use dslab_core::{cast, log_debug, log_trace, Event, EventHandler, EventId, SimulationContext};

use crate::network::{Network, PacketReceived};
use crate::node::NodeId;
use crate::packet::{Packet, Segment};
use crate::transport::{CwndChange, Socket, TransportError};

/// Payload bytes per segment.
pub const SEGMENT_SIZE: u32 = 536;
/// Send buffer capacity in bytes.
pub const SEND_BUFFER_SIZE: u64 = 131072;
/// Initial slow start threshold in bytes.
pub const INITIAL_SSTHRESH: u32 = 65535;
/// Number of duplicate acknowledgments triggering fast retransmit.
pub const DUPACK_THRESHOLD: u32 = 3;

const INITIAL_RTO: f64 = 1.;
const MIN_RTO: f64 = 1.;
const MAX_RTO: f64 = 60.;

/// Reaction to loss signalled by duplicate acknowledgments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionControl {
    /// Fast retransmit followed by fast recovery, partial acknowledgments retransmit the next hole.
    NewReno,
    /// Fast retransmit followed by slow start from one segment.
    Tahoe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Bound,
    Established,
    Closing,
}

#[derive(Clone, Serialize)]
pub struct RetransmitTimeout {}

/// Sending endpoint of a TCP-like connection.
///
/// Stream positions are byte offsets starting at zero. The receiving side is a [`PacketSink`](crate::sink::PacketSink)
/// which acknowledges data cumulatively.
pub struct TcpSocket {
    cc: CongestionControl,
    node: NodeId,
    network: Rc<RefCell<Network>>,
    state: State,
    local: Option<SocketAddrV4>,
    peer: Option<SocketAddrV4>,
    // oldest unacknowledged byte
    snd_una: u64,
    // next byte to transmit
    snd_nxt: u64,
    // highest byte ever transmitted
    snd_max: u64,
    // end of data written by the application
    buffer_end: u64,
    cwnd: u32,
    ssthresh: u32,
    dupacks: u32,
    in_recovery: bool,
    recover: u64,
    rto: f64,
    srtt: Option<f64>,
    rttvar: f64,
    rtt_probe: Option<(u64, f64)>,
    rto_event: Option<EventId>,
    cwnd_changes: Publisher<CwndChange>,
    ctx: SimulationContext,
}

impl TcpSocket {
    pub fn new(cc: CongestionControl, node: NodeId, network: Rc<RefCell<Network>>, ctx: SimulationContext) -> Self {
        Self {
            cc,
            node,
            network,
            state: State::Closed,
            local: None,
            peer: None,
            snd_una: 0,
            snd_nxt: 0,
            snd_max: 0,
            buffer_end: 0,
            cwnd: SEGMENT_SIZE,
            ssthresh: INITIAL_SSTHRESH,
            dupacks: 0,
            in_recovery: false,
            recover: 0,
            rto: INITIAL_RTO,
            srtt: None,
            rttvar: 0.,
            rtt_probe: None,
            rto_event: None,
            cwnd_changes: Publisher::new(),
            ctx,
        }
    }

    /// Returns the current congestion window in bytes.
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    /// Returns the slow start threshold in bytes.
    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Returns the number of bytes acknowledged by the receiver.
    pub fn bytes_acked(&self) -> u64 {
        self.snd_una
    }

    /// Returns the number of bytes written and not yet acknowledged.
    pub fn bytes_in_buffer(&self) -> u64 {
        self.buffer_end - self.snd_una
    }

    fn reset(&mut self) {
        self.snd_una = 0;
        self.snd_nxt = 0;
        self.snd_max = 0;
        self.buffer_end = 0;
        self.ssthresh = INITIAL_SSTHRESH;
        self.dupacks = 0;
        self.in_recovery = false;
        self.recover = 0;
        self.rto = INITIAL_RTO;
        self.srtt = None;
        self.rttvar = 0.;
        self.rtt_probe = None;
        self.set_cwnd(SEGMENT_SIZE);
    }

    fn set_cwnd(&mut self, cwnd: u32) {
        let cwnd = cwnd.max(SEGMENT_SIZE);
        if cwnd != self.cwnd {
            let old = self.cwnd;
            self.cwnd = cwnd;
            self.cwnd_changes.publish(self.ctx.time(), CwndChange { old, new: cwnd });
        }
    }

    fn flight_size(&self) -> u64 {
        self.snd_max - self.snd_una
    }

    fn reduced_ssthresh(&self) -> u32 {
        let half = (self.flight_size() / 2).min(u32::MAX as u64) as u32;
        half.max(2 * SEGMENT_SIZE)
    }

    fn transmit_segment(&mut self, seq: u64) -> u32 {
        let len = (self.buffer_end - seq).min(SEGMENT_SIZE as u64) as u32;
        let (Some(local), Some(peer)) = (self.local, self.peer) else {
            return 0;
        };
        if self.rtt_probe.is_none() && seq >= self.snd_max {
            self.rtt_probe = Some((seq + len as u64, self.ctx.time()));
        }
        self.network
            .borrow_mut()
            .transmit(self.node, Packet::tcp(local, peer, Segment::Data { seq, len }));
        if seq + len as u64 > self.snd_max {
            self.snd_max = seq + len as u64;
        }
        if self.rto_event.is_none() {
            self.arm_timer();
        }
        len
    }

    fn retransmit(&mut self) {
        log_trace!(self.ctx, "retransmit seq {}", self.snd_una);
        // a retransmitted segment cannot be used for rtt measurement
        self.rtt_probe = None;
        self.transmit_segment(self.snd_una);
    }

    fn send_pending(&mut self) {
        while self.snd_nxt < self.buffer_end {
            let in_flight = self.snd_nxt - self.snd_una;
            let window = self.cwnd as u64;
            let len = (self.buffer_end - self.snd_nxt).min(SEGMENT_SIZE as u64);
            if in_flight + len > window {
                break;
            }
            let sent = self.transmit_segment(self.snd_nxt);
            if sent == 0 {
                break;
            }
            self.snd_nxt += sent as u64;
        }
    }

    fn arm_timer(&mut self) {
        if let Some(event) = self.rto_event.take() {
            self.ctx.cancel_event(event);
        }
        if self.snd_una < self.snd_max {
            self.rto_event = Some(self.ctx.emit_self(RetransmitTimeout {}, self.rto));
        }
    }

    fn update_rtt(&mut self, sample: f64) {
        // RFC 6298
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2.;
            }
            Some(srtt) => {
                self.rttvar = 0.75 * self.rttvar + 0.25 * (srtt - sample).abs();
                self.srtt = Some(0.875 * srtt + 0.125 * sample);
            }
        }
        let srtt = self.srtt.unwrap_or(sample);
        self.rto = (srtt + 4. * self.rttvar).clamp(MIN_RTO, MAX_RTO);
    }

    fn on_ack(&mut self, ack: u64) {
        if self.state == State::Closed || ack > self.snd_max {
            return;
        }
        if ack > self.snd_una {
            self.on_new_ack(ack);
        } else if ack == self.snd_una && self.snd_una < self.snd_max {
            self.on_dupack();
        }
    }

    fn on_new_ack(&mut self, ack: u64) {
        let acked = ack - self.snd_una;
        if let Some((probe_end, sent_at)) = self.rtt_probe {
            if ack >= probe_end {
                self.update_rtt(self.ctx.time() - sent_at);
                self.rtt_probe = None;
            }
        }
        self.snd_una = ack;
        if self.snd_nxt < ack {
            self.snd_nxt = ack;
        }

        if self.in_recovery {
            if ack >= self.recover {
                self.in_recovery = false;
                self.dupacks = 0;
                self.set_cwnd(self.ssthresh);
                log_trace!(self.ctx, "recovery finished, cwnd {}", self.cwnd);
            } else {
                // partial ack
                self.retransmit();
                let deflated = (self.cwnd as u64).saturating_sub(acked) as u32 + SEGMENT_SIZE;
                self.set_cwnd(deflated);
            }
        } else {
            self.dupacks = 0;
            if self.cwnd < self.ssthresh {
                self.set_cwnd(self.cwnd.saturating_add(SEGMENT_SIZE));
            } else {
                let inc = (SEGMENT_SIZE * SEGMENT_SIZE / self.cwnd).max(1);
                self.set_cwnd(self.cwnd.saturating_add(inc));
            }
        }

        self.arm_timer();
        if self.state == State::Closing && self.snd_una >= self.buffer_end {
            self.finish_close();
            return;
        }
        self.send_pending();
    }

    fn on_dupack(&mut self) {
        self.dupacks += 1;
        if self.in_recovery {
            self.set_cwnd(self.cwnd.saturating_add(SEGMENT_SIZE));
            self.send_pending();
            return;
        }
        if self.dupacks != DUPACK_THRESHOLD || self.snd_una < self.recover {
            return;
        }
        self.ssthresh = self.reduced_ssthresh();
        self.recover = self.snd_max;
        match self.cc {
            CongestionControl::NewReno => {
                log_debug!(self.ctx, "fast retransmit, entering recovery at {}", self.snd_una);
                self.in_recovery = true;
                self.retransmit();
                self.set_cwnd(self.ssthresh + DUPACK_THRESHOLD * SEGMENT_SIZE);
            }
            CongestionControl::Tahoe => {
                log_debug!(self.ctx, "fast retransmit at {}", self.snd_una);
                self.dupacks = 0;
                self.rtt_probe = None;
                self.set_cwnd(SEGMENT_SIZE);
                self.snd_nxt = self.snd_una;
                self.send_pending();
            }
        }
    }

    fn on_timeout(&mut self, event_id: EventId) {
        if self.rto_event != Some(event_id) {
            return;
        }
        self.rto_event = None;
        if self.snd_una >= self.snd_max {
            return;
        }
        log_debug!(self.ctx, "retransmission timeout at {}, rto {:.3}", self.snd_una, self.rto);
        self.ssthresh = self.reduced_ssthresh();
        self.recover = self.snd_max;
        self.in_recovery = false;
        self.dupacks = 0;
        self.rtt_probe = None;
        self.rto = (self.rto * 2.).min(MAX_RTO);
        self.set_cwnd(SEGMENT_SIZE);
        self.snd_nxt = self.snd_una;
        self.send_pending();
    }

    fn finish_close(&mut self) {
        if let Some(event) = self.rto_event.take() {
            self.ctx.cancel_event(event);
        }
        if let Some(local) = self.local.take() {
            self.network.borrow_mut().unbind(local);
        }
        self.peer = None;
        self.state = State::Closed;
        log_debug!(self.ctx, "closed, {} bytes acknowledged", self.snd_una);
    }
}

impl Socket for TcpSocket {
    fn bind(&mut self) -> Result<SocketAddrV4, TransportError> {
        match self.state {
            State::Bound | State::Established => {
                return self.local.ok_or(TransportError::NotBound);
            }
            State::Closing => self.finish_close(),
            State::Closed => {}
        }
        self.reset();
        let local = self.network.borrow_mut().bind_ephemeral(self.node, Some(self.ctx.id()))?;
        self.local = Some(local);
        self.state = State::Bound;
        Ok(local)
    }

    fn connect(&mut self, peer: SocketAddrV4) -> Result<(), TransportError> {
        match self.state {
            State::Bound => {
                self.peer = Some(peer);
                self.state = State::Established;
                log_debug!(self.ctx, "connected to {}", peer);
                Ok(())
            }
            State::Closed => Err(TransportError::NotBound),
            State::Established | State::Closing => Err(TransportError::Closed),
        }
    }

    fn send(&mut self, size: u32) -> Result<(), TransportError> {
        match self.state {
            State::Established => {}
            State::Closing => return Err(TransportError::Closed),
            State::Closed | State::Bound => return Err(TransportError::NotConnected),
        }
        let available = SEND_BUFFER_SIZE - self.bytes_in_buffer();
        if size as u64 > available {
            return Err(TransportError::BufferFull {
                requested: size,
                available,
            });
        }
        self.buffer_end += size as u64;
        self.send_pending();
        Ok(())
    }

    fn close(&mut self) {
        match self.state {
            State::Closed | State::Closing => {}
            State::Bound => self.finish_close(),
            State::Established => {
                if self.snd_una >= self.buffer_end {
                    self.finish_close();
                } else {
                    log_debug!(self.ctx, "closing, {} bytes to deliver", self.bytes_in_buffer());
                    self.state = State::Closing;
                }
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local
    }

    fn cwnd_trace(&mut self) -> Option<Subscription<CwndChange>> {
        Some(self.cwnd_changes.subscribe())
    }
}

impl EventHandler for TcpSocket {
    fn on(&mut self, event: Event) {
        let event_id = event.id;
        cast!(match event.data {
            PacketReceived { packet } => {
                if let Some(Segment::Ack { ack }) = packet.segment {
                    self.on_ack(ack);
                }
            }
            RetransmitTimeout {} => {
                self.on_timeout(event_id);
            }
        })
    }
}
