use crate::{filter::FilterProgram, networkaddress::Address, timestamp::TimestampPair};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::Connection;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
pub use fallback::Connection;

/// Whether this platform provides timestamped link-layer connections.
pub const fn is_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Setup options for a [`Connection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", deny_unknown_fields))]
pub struct Config {
    /// Installed on the receiving socket before it is bound.
    #[cfg_attr(feature = "serde", serde(default))]
    pub filter: Option<FilterProgram>,
}

/// Whether frames are exchanged with or without their link-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SocketKind {
    /// Full frames, header included (`SOCK_RAW`).
    #[default]
    Raw,
    /// Payload only, the kernel builds and strips the header (`SOCK_DGRAM`).
    Datagram,
}

impl SocketKind {
    #[cfg(target_os = "linux")]
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            SocketKind::Raw => libc::SOCK_RAW,
            SocketKind::Datagram => libc::SOCK_DGRAM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecvResult {
    pub bytes_read: usize,
    /// Absent for frames echoed back from the error queue.
    pub remote_addr: Option<Address>,
    pub timestamps: TimestampPair,
}

/// Receive counters of a connection since they were last read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketStatistics {
    /// Frames that reached the socket, dropped ones included.
    pub packets: u32,
    /// Frames dropped because the receive queue was full.
    pub drops: u32,
    /// Times the receive queue was frozen.
    pub queue_freezes: u32,
}

impl PacketStatistics {
    // struct tpacket_stats_v3 { unsigned int tp_packets, tp_drops, tp_freeze_q_cnt; };
    #[cfg_attr(not(target_os = "linux"), allow(unused))]
    pub(crate) fn from_bytes(bytes: [u8; 12]) -> Self {
        let word = |offset: usize| {
            let mut buf = [0; 4];
            buf.copy_from_slice(&bytes[offset..][..4]);
            u32::from_ne_bytes(buf)
        };

        PacketStatistics {
            packets: word(0),
            drops: word(4),
            queue_freezes: word(8),
        }
    }
}
