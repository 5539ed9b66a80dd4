//! A compact TCP-like reliable transfer: cumulative ACKs, slow start, congestion avoidance,
//! fast retransmit and retransmission timeouts, with go-back-N recovery.

use crate::constants::{INIT_CWND_PKTS, SZ_SEGMENT, SZ_SNDBUF};
use crate::event::EventId;
use crate::network::types::{Flow, FlowId, NodeId};
use crate::routing::FlowKey;
use crate::units::{Bytes, Millisecs, Nanosecs, Secs};

const DUPACK_THRESHOLD: u32 = 3;

/// Transport parameters shared by every connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Payload bytes per data segment.
    pub segment_size: Bytes,
    /// Initial congestion window in segments.
    pub initial_cwnd_pkts: u64,
    /// Send buffer size. The congestion window never exceeds it.
    pub snd_buf: Bytes,
    pub min_rto: Nanosecs,
    pub initial_rto: Nanosecs,
    pub max_rto: Nanosecs,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            segment_size: SZ_SEGMENT,
            initial_cwnd_pkts: INIT_CWND_PKTS,
            snd_buf: SZ_SNDBUF,
            min_rto: Millisecs::new(200).into(),
            initial_rto: Secs::new(1).into(),
            max_rto: Secs::new(60).into(),
        }
    }
}

/// What an ACK did to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// The ACK acknowledged new data.
    Advanced { complete: bool },
    /// The third duplicate ACK; the sender rewound to the first unacknowledged byte.
    FastRetransmit,
    /// Nothing changed.
    Ignored,
}

/// The state of one connection. Sequence numbers are byte offsets into the flow.
#[derive(Debug)]
pub(crate) struct Conn {
    pub(crate) flow: FlowId,
    pub(crate) src: NodeId,
    pub(crate) dst: NodeId,
    pub(crate) size: u64,
    pub(crate) mss: u64,
    pub(crate) data_key: FlowKey,
    pub(crate) ack_key: FlowKey,

    // Sender
    pub(crate) snd_una: u64,
    pub(crate) snd_nxt: u64,
    high_tx: u64,
    cwnd: u64,
    ssthresh: u64,
    snd_buf: u64,
    dupacks: u32,
    srtt: Option<f64>,
    rttvar: f64,
    rto: Nanosecs,
    min_rto: Nanosecs,
    max_rto: Nanosecs,
    rtt_probe: Option<(u64, Nanosecs)>,
    pub(crate) rto_timer: Option<EventId>,
    pub(crate) completion: Option<EventId>,

    // Receiver
    rcv_nxt: u64,
}

impl Conn {
    pub(crate) fn new(flow: &Flow, config: &TcpConfig, keys: (FlowKey, FlowKey)) -> Self {
        let mss = flow
            .overrides
            .segment_size
            .unwrap_or(config.segment_size)
            .into_u64();
        let init_cwnd_pkts = flow
            .overrides
            .initial_cwnd_pkts
            .unwrap_or(config.initial_cwnd_pkts);
        let snd_buf = config.snd_buf.into_u64().max(mss);
        Self {
            flow: flow.id,
            src: flow.src,
            dst: flow.dst,
            size: flow.size.into_u64(),
            mss,
            data_key: keys.0,
            ack_key: keys.1,
            snd_una: 0,
            snd_nxt: 0,
            high_tx: 0,
            cwnd: (init_cwnd_pkts.max(1) * mss).min(snd_buf),
            ssthresh: u64::MAX,
            snd_buf,
            dupacks: 0,
            srtt: None,
            rttvar: 0.0,
            rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            rtt_probe: None,
            rto_timer: None,
            completion: None,
            rcv_nxt: 0,
        }
    }

    pub(crate) fn acked(&self) -> Bytes {
        Bytes::new(self.snd_una)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.snd_una >= self.size
    }

    pub(crate) fn has_outstanding(&self) -> bool {
        self.snd_una < self.snd_nxt
    }

    pub(crate) fn cwnd(&self) -> Bytes {
        Bytes::new(self.cwnd)
    }

    pub(crate) fn rto(&self) -> Nanosecs {
        self.rto
    }

    fn in_flight(&self) -> u64 {
        self.snd_nxt - self.snd_una
    }

    /// The next segment the window allows, as `(seq, len)`. Marks it as sent.
    pub(crate) fn next_segment(&mut self, now: Nanosecs) -> Option<(u64, u64)> {
        if self.snd_nxt >= self.size {
            return None;
        }
        let len = self.mss.min(self.size - self.snd_nxt);
        if self.in_flight() > 0 && self.in_flight() + len > self.cwnd {
            return None;
        }
        let seq = self.snd_nxt;
        self.snd_nxt += len;
        // Karn: only time segments that were never sent before
        if seq >= self.high_tx {
            self.high_tx = self.snd_nxt;
            if self.rtt_probe.is_none() {
                self.rtt_probe = Some((self.snd_nxt, now));
            }
        }
        Some((seq, len))
    }

    pub(crate) fn on_ack(&mut self, ack: u64, now: Nanosecs) -> AckOutcome {
        if ack > self.snd_una {
            let newly = ack - self.snd_una;
            self.snd_una = ack;
            self.snd_nxt = self.snd_nxt.max(ack);
            self.dupacks = 0;
            if let Some((end, sent)) = self.rtt_probe {
                if ack >= end {
                    self.sample_rtt(now.saturating_sub(sent));
                    self.rtt_probe = None;
                }
            }
            if self.cwnd < self.ssthresh {
                self.cwnd += newly.min(self.mss);
            } else {
                self.cwnd += (self.mss * self.mss / self.cwnd).max(1);
            }
            self.cwnd = self.cwnd.min(self.snd_buf);
            AckOutcome::Advanced {
                complete: self.is_complete(),
            }
        } else if ack == self.snd_una && self.has_outstanding() {
            self.dupacks += 1;
            if self.dupacks == DUPACK_THRESHOLD {
                self.ssthresh = (self.in_flight() / 2).max(2 * self.mss);
                self.cwnd = self.ssthresh;
                self.rewind();
                AckOutcome::FastRetransmit
            } else {
                AckOutcome::Ignored
            }
        } else {
            AckOutcome::Ignored
        }
    }

    pub(crate) fn on_timeout(&mut self) {
        self.ssthresh = (self.in_flight() / 2).max(2 * self.mss);
        self.cwnd = self.mss;
        self.dupacks = 0;
        self.rto = (self.rto + self.rto).min(self.max_rto);
        self.rewind();
    }

    fn rewind(&mut self) {
        self.snd_nxt = self.snd_una;
        self.rtt_probe = None;
    }

    fn sample_rtt(&mut self, rtt: Nanosecs) {
        let r = rtt.into_f64();
        let (srtt, rttvar) = match self.srtt {
            None => (r, r / 2.0),
            Some(srtt) => (
                0.875 * srtt + 0.125 * r,
                0.75 * self.rttvar + 0.25 * (srtt - r).abs(),
            ),
        };
        self.srtt = Some(srtt);
        self.rttvar = rttvar;
        let rto = Nanosecs::new((srtt + (4.0 * rttvar).max(1.0)).ceil() as u64);
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }

    /// Receives a data segment and returns the cumulative ACK. Out-of-order data is
    /// discarded.
    pub(crate) fn on_data(&mut self, seq: u64, len: u64) -> u64 {
        if seq == self.rcv_nxt {
            self.rcv_nxt += len;
        }
        self.rcv_nxt
    }
}
