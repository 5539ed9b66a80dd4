//! Packet-format and transport constants shared by the transport model and the optimizer.

use crate::units::Bytes;

/// The header size added to every data segment.
pub const SZ_PKTHDR: Bytes = Bytes::new(48);

/// The ACK size.
pub const SZ_ACK: Bytes = Bytes::new(60);

/// The default segment (payload) size.
pub const SZ_SEGMENT: Bytes = Bytes::new(1380);

/// The default send buffer, which also caps the congestion window.
pub const SZ_SNDBUF: Bytes = Bytes::new(128 * 1024 * 1024);

/// The default initial congestion window, in segments.
pub const INIT_CWND_PKTS: u64 = 10;
