//! Network interfaces and their timestamping capability.

use std::str::FromStr;

use crate::{error::Result, networkaddress::Address};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::enable_hardware_timestamping;

#[cfg(not(target_os = "linux"))]
mod fallback;

/// `SOF_TIMESTAMPING_*` bits from `linux/net_tstamp.h`.
pub(crate) mod sof {
    pub(crate) const TX_HARDWARE: u32 = 1 << 0;
    pub(crate) const TX_SOFTWARE: u32 = 1 << 1;
    pub(crate) const RX_HARDWARE: u32 = 1 << 2;
    pub(crate) const RX_SOFTWARE: u32 = 1 << 3;
    pub(crate) const SOFTWARE: u32 = 1 << 4;
    pub(crate) const RAW_HARDWARE: u32 = 1 << 6;

    pub(crate) const ALL_SOFTWARE: u32 = SOFTWARE | RX_SOFTWARE | TX_SOFTWARE;
    pub(crate) const ALL_HARDWARE: u32 = RAW_HARDWARE | RX_HARDWARE | TX_HARDWARE;
}

/// `hwtstamp_tx_types` and `hwtstamp_rx_filters` values from `linux/net_tstamp.h`.
pub(crate) mod hwtstamp {
    pub(crate) const TX_OFF: u32 = 0;
    pub(crate) const TX_ON: u32 = 1;
    pub(crate) const FILTER_NONE: u32 = 0;
    pub(crate) const FILTER_ALL: u32 = 1;
}

/// What an interface reports about its timestamping support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimestampingCapability {
    /// Supported `SOF_TIMESTAMPING_*` flags.
    pub so_timestamping: u32,
    /// Index of the hardware clock, `/dev/ptp<index>`.
    pub phc_index: Option<u32>,
    /// Bit set of supported `HWTSTAMP_TX_*` types.
    pub tx_types: u32,
    /// Bit set of supported `HWTSTAMP_FILTER_*` modes.
    pub rx_filters: u32,
}

impl TimestampingCapability {
    /// Whether the interface can timestamp every transmitted frame.
    pub fn hardware_tx(&self) -> bool {
        self.tx_types & (1 << hwtstamp::TX_ON) != 0
    }

    /// Whether the interface can timestamp every received frame.
    pub fn hardware_rx_all(&self) -> bool {
        self.rx_filters & (1 << hwtstamp::FILTER_ALL) != 0
    }

    /// Flags for `SO_TIMESTAMPING` and `PACKET_TIMESTAMP`: software timestamps
    /// always, hardware timestamps where the interface reports them.
    pub(crate) fn socket_flags(&self) -> u32 {
        sof::ALL_SOFTWARE | (self.so_timestamping & sof::ALL_HARDWARE)
    }
}

/// A network interface, resolved once by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interface {
    name: InterfaceName,
    index: u32,
    hardware_addr: Option<Address>,
}

impl Interface {
    /// Look up the index and hardware address of the interface called `name`.
    pub fn from_name(name: InterfaceName) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            linux::lookup(name)
        }

        #[cfg(not(target_os = "linux"))]
        {
            fallback::lookup(name)
        }
    }

    pub fn name(&self) -> InterfaceName {
        self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The interface's own hardware address, if it has one.
    pub fn hardware_addr(&self) -> Option<&Address> {
        self.hardware_addr.as_ref()
    }

    /// Query the timestamping capability of this interface.
    pub fn timestamping_capability(&self) -> Result<TimestampingCapability> {
        #[cfg(target_os = "linux")]
        {
            linux::query_capability(self.name)
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(crate::error::Error::Unsupported)
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceName {
    bytes: [u8; libc::IFNAMSIZ],
}

impl InterfaceName {
    #[cfg(all(test, target_os = "linux"))]
    pub const LOOPBACK: Self = Self {
        bytes: *b"lo\0\0\0\0\0\0\0\0\0\0\0\0\0\0",
    };

    #[cfg(test)]
    pub const INVALID: Self = Self {
        bytes: *b"123412341234123\0",
    };

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.bytes.as_slice())
            .unwrap_or_default()
            .trim_end_matches('\0')
    }

    pub fn as_cstr(&self) -> &std::ffi::CStr {
        // it is an invariant of InterfaceName that the bytes are null-terminated
        let first_null = self.bytes.iter().position(|b| *b == 0).unwrap_or_default();
        std::ffi::CStr::from_bytes_with_nul(&self.bytes[..=first_null]).unwrap_or_default()
    }

    pub fn to_ifr_name(self) -> [libc::c_char; libc::IFNAMSIZ] {
        let mut it = self.bytes.iter().copied();
        [0; libc::IFNAMSIZ].map(|_| it.next().unwrap_or(0) as libc::c_char)
    }

    pub fn get_index(&self) -> Option<libc::c_uint> {
        // # SAFETY
        //
        // self lives for the duration of the call, and is null terminated.
        match unsafe { libc::if_nametoindex(self.as_cstr().as_ptr()) } {
            0 => None,
            n => Some(n),
        }
    }
}

impl std::fmt::Debug for InterfaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InterfaceName")
            .field(&self.as_str())
            .finish()
    }
}

impl std::fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for InterfaceName {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0; libc::IFNAMSIZ];

        // >= so that we always retain a NUL byte at the end
        if s.len() >= bytes.len() {
            return Err(());
        }

        if s.is_empty() || s.bytes().any(|b| b == 0) {
            return Err(());
        }

        let mut it = s.bytes();
        bytes = bytes.map(|_| it.next().unwrap_or_default());

        Ok(Self { bytes })
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for InterfaceName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(|_| serde::de::Error::custom("invalid interface name"))
    }
}
