use std::str::FromStr;

use crate::{
    cerr,
    error::{Error, Result},
    networkaddress::{Address, MAX_HARDWARE_ADDRESS_LEN},
    raw_socket::RawSocket,
};

use super::{hwtstamp, Interface, InterfaceName, TimestampingCapability};

const ETHTOOL_GET_TS_INFO: u32 = 0x41;

/// Size of `struct ethtool_ts_info`.
const TS_INFO_LEN: usize = 44;

/// Size of `struct hwtstamp_config`.
const HWTSTAMP_CONFIG_LEN: usize = 12;

// struct ethtool_ts_info {
//     u32 cmd;                0
//     u32 so_timestamping;    4
//     s32 phc_index;          8
//     u32 tx_types;          12
//     u32 tx_reserved[3];    16
//     u32 rx_filters;        28
//     u32 rx_reserved[3];    32
// };
mod ts_info {
    pub(super) const CMD: usize = 0;
    pub(super) const SO_TIMESTAMPING: usize = 4;
    pub(super) const PHC_INDEX: usize = 8;
    pub(super) const TX_TYPES: usize = 12;
    pub(super) const RX_FILTERS: usize = 28;
}

fn ts_info_request() -> [u8; TS_INFO_LEN] {
    let mut buf = [0; TS_INFO_LEN];
    buf[ts_info::CMD..][..4].copy_from_slice(&ETHTOOL_GET_TS_INFO.to_ne_bytes());
    buf[ts_info::PHC_INDEX..][..4].copy_from_slice(&(-1i32).to_ne_bytes());
    buf
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&buf[offset..][..4]);
    u32::from_ne_bytes(bytes)
}

fn decode_ts_info(buf: &[u8; TS_INFO_LEN]) -> TimestampingCapability {
    let phc_index = read_u32(buf, ts_info::PHC_INDEX) as i32;

    TimestampingCapability {
        so_timestamping: read_u32(buf, ts_info::SO_TIMESTAMPING),
        phc_index: u32::try_from(phc_index).ok(),
        tx_types: read_u32(buf, ts_info::TX_TYPES),
        rx_filters: read_u32(buf, ts_info::RX_FILTERS),
    }
}

// struct hwtstamp_config { int flags; int tx_type; int rx_filter; };
fn hwtstamp_config(tx_type: u32, rx_filter: u32) -> [u8; HWTSTAMP_CONFIG_LEN] {
    let mut buf = [0; HWTSTAMP_CONFIG_LEN];
    buf[4..8].copy_from_slice(&tx_type.to_ne_bytes());
    buf[8..12].copy_from_slice(&rx_filter.to_ne_bytes());
    buf
}

fn query(socket: &RawSocket, interface: InterfaceName) -> std::io::Result<TimestampingCapability> {
    let mut buf = ts_info_request();
    socket.interface_ioctl(interface, libc::SIOCETHTOOL as _, &mut buf)?;
    Ok(decode_ts_info(&buf))
}

fn control_socket() -> std::io::Result<RawSocket> {
    RawSocket::open(libc::AF_INET, libc::SOCK_DGRAM, 0)
}

pub(super) fn query_capability(interface: InterfaceName) -> Result<TimestampingCapability> {
    control_socket()
        .and_then(|socket| query(&socket, interface))
        .map_err(|source| Error::CapabilityQuery { interface, source })
}

/// Query the capability of `interface` and switch on every hardware
/// timestamping mode it supports.
///
/// Interfaces without hardware support are left alone; the returned
/// capability then only describes software timestamping.
pub(crate) fn enable_hardware_timestamping(
    interface: InterfaceName,
) -> Result<TimestampingCapability> {
    let socket =
        control_socket().map_err(|source| Error::CapabilityQuery { interface, source })?;
    let capability =
        query(&socket, interface).map_err(|source| Error::CapabilityQuery { interface, source })?;

    tracing::debug!(
        %interface,
        so_timestamping = capability.so_timestamping,
        tx_types = capability.tx_types,
        rx_filters = capability.rx_filters,
        phc_index = ?capability.phc_index,
        "timestamping capability"
    );

    let tx_type = match capability.hardware_tx() {
        true => hwtstamp::TX_ON,
        false => hwtstamp::TX_OFF,
    };
    let rx_filter = match capability.hardware_rx_all() {
        true => hwtstamp::FILTER_ALL,
        false => hwtstamp::FILTER_NONE,
    };

    if tx_type == hwtstamp::TX_OFF && rx_filter == hwtstamp::FILTER_NONE {
        tracing::debug!(%interface, "no hardware timestamping available");
        return Ok(capability);
    }

    let mut config = hwtstamp_config(tx_type, rx_filter);
    socket
        .interface_ioctl(interface, libc::SIOCSHWTSTAMP as _, &mut config)
        .map_err(|source| Error::EnableHardwareTimestamping { interface, source })?;

    tracing::debug!(%interface, tx_type, rx_filter, "enabled hardware timestamping");

    Ok(capability)
}

pub(super) fn lookup(name: InterfaceName) -> Result<Interface> {
    let index = name.get_index().ok_or(Error::InterfaceNotFound(name))?;

    let hardware_addr = match InterfaceIterator::new() {
        Ok(iter) => iter
            .filter(|entry| entry.name == name)
            .find_map(|entry| entry.hardware_addr),
        Err(error) => {
            tracing::warn!(%name, %error, "could not list interface addresses");
            None
        }
    };

    Ok(Interface {
        name,
        index,
        hardware_addr,
    })
}

// Invariants:
// self.base always contains a pointer received from libc::getifaddrs that is not NULL. The region pointed to is never modified in rust code.
// self.next always contains either a pointer pointing to a valid ifaddr received from libc::getifaddrs or null.
//
// These invariants are setup by InterfaceIterator::new and guaranteed by drop and next, which are the only places these pointers are used.
struct InterfaceIterator {
    base: *mut libc::ifaddrs,
    next: *const libc::ifaddrs,
}

impl InterfaceIterator {
    fn new() -> std::io::Result<Self> {
        let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();

        // Safety:
        // addrs lives for the duration of the call to getifaddrs.
        cerr(unsafe { libc::getifaddrs(&mut addrs) })?;

        // Invariant preservation:
        // an empty list still has to be freed, but there is nothing to free
        // when getifaddrs hands back NULL
        if addrs.is_null() {
            return Err(std::io::ErrorKind::NotFound.into());
        }

        Ok(Self {
            base: addrs,
            next: addrs,
        })
    }
}

impl Drop for InterfaceIterator {
    fn drop(&mut self) {
        // Safety:
        // By the invariants, self.base is guaranteed to point to a memory region allocated by getifaddrs
        unsafe { libc::freeifaddrs(self.base) };
    }
}

struct InterfaceEntry {
    name: InterfaceName,
    hardware_addr: Option<Address>,
}

impl Iterator for InterfaceIterator {
    type Item = InterfaceEntry;

    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        loop {
            // Safety:
            // By the invariants, self.next is guaranteed to be a valid pointer to an ifaddrs struct or null.
            let ifaddr = unsafe { self.next.as_ref() }?;

            // Invariant preservation
            // By the guarantees given by getifaddrs, ifaddr.ifa_next is either null or points to a valid
            // ifaddr.
            self.next = ifaddr.ifa_next;

            // Safety:
            // getifaddrs guarantees that ifa_name is not null and points to a valid C string.
            let ifname = unsafe { std::ffi::CStr::from_ptr(ifaddr.ifa_name) };
            let Some(name) = ifname
                .to_str()
                .ok()
                .and_then(|name| InterfaceName::from_str(name).ok())
            else {
                tracing::debug!(?ifname, "skipping interface with unusable name");
                continue;
            };

            // Safety:
            // getifaddrs guarantees that ifa_addr either points to a valid address or is NULL.
            let family = unsafe { ifaddr.ifa_addr.as_ref() }.map(|a| a.sa_family);

            let hardware_addr = if family == Some(libc::AF_PACKET as _) {
                // Safety: getifaddrs ensures that, if an address is present, it is valid. A valid address
                // of type AF_PACKET is always reinterpret castable to sockaddr_ll, and we know an address
                // is present since family is not None
                let sockaddr_ll: libc::sockaddr_ll =
                    unsafe { std::ptr::read_unaligned(ifaddr.ifa_addr as *const _) };

                let len = (sockaddr_ll.sll_halen as usize).min(MAX_HARDWARE_ADDRESS_LEN);
                Some(Address::new(&sockaddr_ll.sll_addr[..len]))
            } else {
                None
            };

            return Some(InterfaceEntry {
                name,
                hardware_addr,
            });
        }
    }
}
