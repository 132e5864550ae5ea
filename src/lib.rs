//! Raw link-layer connections with per-packet hardware and software timestamps.
//!
//! A [`Connection`] owns two `AF_PACKET` sockets bound to the same interface:
//! one for sending, one for receiving. Transmit timestamps are read back from
//! the sender's error queue, so waiting for one never stalls a data receive.
//!
//! Only Linux provides the required kernel interfaces. On every other platform
//! [`is_supported`] returns `false` and every operation fails with
//! [`Error::Unsupported`].

mod connection;
mod error;
mod filter;
mod interface;
mod networkaddress;
mod timestamp;

#[cfg(target_os = "linux")]
mod control_message;
#[cfg(target_os = "linux")]
mod raw_socket;

pub use connection::{is_supported, Config, Connection, PacketStatistics, RecvResult, SocketKind};
pub use error::{CloseError, Error, Result, SocketOption, SocketRole};
pub use filter::{FilterProgram, Instruction};
pub use interface::{Interface, InterfaceName, TimestampingCapability};
pub use networkaddress::{Address, MacAddress, ParseAddressError, MAX_HARDWARE_ADDRESS_LEN};
pub use timestamp::{decode_timestamping, Timestamp, TimestampPair};

#[cfg(target_os = "linux")]
pub(crate) fn cerr(t: libc::c_int) -> std::io::Result<libc::c_int> {
    match t {
        -1 => Err(std::io::Error::last_os_error()),
        _ => Ok(t),
    }
}
