use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

/// Linux ABI values identifying an `SCM_TIMESTAMPING` control message.
pub(crate) mod abi {
    pub(crate) const SOL_SOCKET: libc::c_int = 1;
    pub(crate) const SCM_TIMESTAMPING: libc::c_int = 37;

    /// Size of the `scm_timestamping` record: three `timespec`s.
    pub(crate) const RECORD_LEN: usize = 48;

    pub(crate) const SOFTWARE_SECONDS: usize = 0;
    pub(crate) const SOFTWARE_NANOS: usize = 8;
    pub(crate) const HARDWARE_SECONDS: usize = 32;
    pub(crate) const HARDWARE_NANOS: usize = 40;
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// An instant relative to the Unix epoch, with nanosecond resolution.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    /// Build a timestamp from a `(seconds, nanoseconds)` pair as the kernel
    /// reports it. A nanosecond field outside `0..1_000_000_000` carries into
    /// the seconds.
    pub fn from_parts(seconds: i64, nanos: i64) -> Self {
        Self {
            seconds: seconds.saturating_add(nanos.div_euclid(NANOS_PER_SECOND)),
            nanos: nanos.rem_euclid(NANOS_PER_SECOND) as u32,
        }
    }

    pub fn is_unix_epoch(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }

    /// Nanoseconds since the Unix epoch.
    pub fn as_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SECOND as i128 + self.nanos as i128
    }
}

impl From<Timestamp> for SystemTime {
    fn from(value: Timestamp) -> Self {
        let since_epoch = Duration::new(value.seconds.unsigned_abs(), 0);
        let base = if value.seconds >= 0 {
            SystemTime::UNIX_EPOCH + since_epoch
        } else {
            SystemTime::UNIX_EPOCH - since_epoch
        };
        base + Duration::from_nanos(value.nanos as u64)
    }
}

/// The software and hardware timestamps reported for one packet.
///
/// A field is `None` when the kernel did not provide that kind of timestamp;
/// the kernel's all-zero placeholder is never surfaced as a 1970 instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimestampPair {
    pub software: Option<Timestamp>,
    pub hardware: Option<Timestamp>,
}

// the record is native-endian, which is little-endian on every common Linux target
fn read_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_ne_bytes(bytes)
}

fn present(timestamp: Timestamp) -> Option<Timestamp> {
    (!timestamp.is_unix_epoch()).then_some(timestamp)
}

/// Decode the payload of a control message into a [`TimestampPair`].
///
/// `level` and `kind` are the control message header's level and type. Any
/// message other than `SOL_SOCKET`/`SCM_TIMESTAMPING`, or one too short to
/// hold the timestamping record, yields [`Error::NoTimestamp`].
pub fn decode_timestamping(
    level: libc::c_int,
    kind: libc::c_int,
    data: &[u8],
) -> Result<TimestampPair> {
    if level != abi::SOL_SOCKET || kind != abi::SCM_TIMESTAMPING {
        return Err(Error::NoTimestamp);
    }

    if data.len() < abi::RECORD_LEN {
        tracing::debug!(len = data.len(), "timestamping control message too short");
        return Err(Error::NoTimestamp);
    }

    // the middle timespec is deprecated and always zero
    let software = Timestamp::from_parts(
        read_i64(data, abi::SOFTWARE_SECONDS),
        read_i64(data, abi::SOFTWARE_NANOS),
    );
    let hardware = Timestamp::from_parts(
        read_i64(data, abi::HARDWARE_SECONDS),
        read_i64(data, abi::HARDWARE_NANOS),
    );

    Ok(TimestampPair {
        software: present(software),
        hardware: present(hardware),
    })
}
