use std::{fmt, str::FromStr};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::link_layer_sockaddr;

/// Largest hardware address that fits in a link-layer socket address.
pub const MAX_HARDWARE_ADDRESS_LEN: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress([u8; 6]);

impl From<[u8; 6]> for MacAddress {
    fn from(value: [u8; 6]) -> Self {
        MacAddress(value)
    }
}

impl AsRef<[u8]> for MacAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl MacAddress {
    pub const fn new(address: [u8; 6]) -> Self {
        MacAddress(address)
    }
}

/// The hardware address of a link-layer peer.
///
/// Addresses of any length can be held, but only those of at most
/// [`MAX_HARDWARE_ADDRESS_LEN`] bytes can be used as a destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address {
    hardware_addr: Vec<u8>,
}

impl Address {
    pub fn new(hardware_addr: impl Into<Vec<u8>>) -> Self {
        Address {
            hardware_addr: hardware_addr.into(),
        }
    }

    pub fn hardware_addr(&self) -> &[u8] {
        &self.hardware_addr
    }

    pub fn len(&self) -> usize {
        self.hardware_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hardware_addr.is_empty()
    }

    /// The address as a MAC address, if it is exactly six bytes long.
    pub fn mac(&self) -> Option<MacAddress> {
        <[u8; 6]>::try_from(self.hardware_addr.as_slice())
            .ok()
            .map(MacAddress)
    }
}

impl From<MacAddress> for Address {
    fn from(value: MacAddress) -> Self {
        Address::new(value.0)
    }
}

impl From<[u8; 6]> for Address {
    fn from(value: [u8; 6]) -> Self {
        Address::new(value)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.hardware_addr
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.hardware_addr.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid hardware address {0:?}")]
pub struct ParseAddressError(String);

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAddressError(s.to_owned());

        if s.is_empty() {
            return Err(invalid());
        }

        s.split(|c| c == ':' || c == '-')
            .map(|part| match part.len() {
                2 => u8::from_str_radix(part, 16).map_err(|_| invalid()),
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Address::new)
    }
}
