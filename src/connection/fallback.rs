use std::time::Instant;

use crate::{
    error::{Error, Result},
    filter::FilterProgram,
    interface::{Interface, TimestampingCapability},
    networkaddress::Address,
};

use super::{Config, PacketStatistics, RecvResult, SocketKind};

// no connection can exist on this platform
#[derive(Debug)]
enum Private {}

/// Timestamped link-layer connections need `AF_PACKET` sockets, which this
/// platform does not have. Every operation fails with [`Error::Unsupported`].
#[derive(Debug)]
pub struct Connection {
    _private: Private,
}

impl Connection {
    pub fn open(
        _interface: &Interface,
        _kind: SocketKind,
        _protocol: u16,
        _config: &Config,
    ) -> Result<Connection> {
        Err(Error::Unsupported)
    }

    pub async fn read(&self, _buf: &mut [u8]) -> Result<(usize, Option<Address>)> {
        Err(Error::Unsupported)
    }

    pub async fn write(&self, _buf: &[u8], _destination: &Address) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub async fn receive_rx_timestamps(&self, _buf: &mut [u8]) -> Result<RecvResult> {
        Err(Error::Unsupported)
    }

    pub async fn receive_tx_timestamps(&self, _buf: &mut [u8]) -> Result<RecvResult> {
        Err(Error::Unsupported)
    }

    pub fn set_deadline(&self, _deadline: Option<Instant>) {}

    pub fn set_read_deadline(&self, _deadline: Option<Instant>) {}

    pub fn set_write_deadline(&self, _deadline: Option<Instant>) {}

    pub fn set_filter(&self, _program: &FilterProgram) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn clear_filter(&self) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn stats(&self) -> Result<PacketStatistics> {
        Err(Error::Unsupported)
    }

    pub fn local_addr(&self) -> Option<&Address> {
        match self._private {}
    }

    pub fn interface(&self) -> &Interface {
        match self._private {}
    }

    pub fn protocol(&self) -> u16 {
        match self._private {}
    }

    pub fn capability(&self) -> TimestampingCapability {
        match self._private {}
    }

    pub fn close(self) -> Result<()> {
        Err(Error::Unsupported)
    }
}
