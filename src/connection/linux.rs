use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use tokio::io::{unix::AsyncFd, Interest};

use crate::{
    control_message::{find_timestamps, ControlBuffer, MessageQueue},
    error::{CloseError, Error, Result, SocketOption, SocketRole},
    filter::FilterProgram,
    interface::{enable_hardware_timestamping, Interface, TimestampingCapability},
    networkaddress::{link_layer_sockaddr, Address},
    raw_socket::RawSocket,
};

use super::{Config, PacketStatistics, RecvResult, SocketKind};

/// A pair of `AF_PACKET` sockets on one interface, with timestamping enabled.
///
/// Frames are sent on one socket and received on the other, so waiting for a
/// transmit timestamp on the sender's error queue never holds up a receive.
/// Every operation takes `&self`; the four receive and send operations may run
/// concurrently from different tasks.
///
/// Deadlines are absolute and sampled when an operation starts. An expired
/// deadline fails the operation with [`std::io::ErrorKind::TimedOut`].
#[derive(Debug)]
pub struct Connection {
    interface: Interface,
    protocol: u16,
    capability: TimestampingCapability,
    sender: AsyncFd<RawSocket>,
    receiver: AsyncFd<RawSocket>,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
}

impl Connection {
    /// Enable timestamping on `interface` and open a connection exchanging
    /// frames of ethertype `protocol` (host byte order).
    ///
    /// Hardware timestamping is switched on for the whole interface when the
    /// driver supports it. Must be called from within a tokio runtime.
    pub fn open(
        interface: &Interface,
        kind: SocketKind,
        protocol: u16,
        config: &Config,
    ) -> Result<Connection> {
        let capability = enable_hardware_timestamping(interface.name())?;
        let flags = capability.socket_flags();
        let if_index = interface.index() as libc::c_int;

        let sender = open_socket(SocketRole::Sender, kind, flags)?;
        // protocol 0 keeps the sender from receiving any frames
        sender
            .bind(link_layer_sockaddr(if_index, 0))
            .map_err(|source| Error::Bind {
                role: SocketRole::Sender,
                source,
            })?;

        let receiver = open_socket(SocketRole::Receiver, kind, flags)?;
        if let Some(filter) = &config.filter {
            receiver
                .attach_filter(&filter.to_sock_filters())
                .map_err(Error::FilterRejected)?;
            tracing::debug!(instructions = filter.len(), "attached receive filter");
        }
        receiver
            .bind(link_layer_sockaddr(if_index, protocol))
            .map_err(|source| Error::Bind {
                role: SocketRole::Receiver,
                source,
            })?;

        tracing::debug!(
            interface = %interface.name(),
            protocol,
            ?kind,
            flags,
            "opened connection"
        );

        Ok(Connection {
            interface: interface.clone(),
            protocol,
            capability,
            sender: AsyncFd::new(sender)?,
            receiver: AsyncFd::new(receiver)?,
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
        })
    }

    /// Receive one frame, returning its length and the sender's hardware
    /// address.
    pub async fn read(&self, buf: &mut [u8]) -> Result<(usize, Option<Address>)> {
        let deadline = self.read_deadline();

        let (bytes_read, addr) = with_deadline(
            deadline,
            self.receiver
                .async_io(Interest::READABLE, |socket| socket.receive_from(buf)),
        )
        .await?;

        Ok((bytes_read, Address::from_sockaddr(&addr)))
    }

    /// Send one frame to `destination` on this connection's interface.
    ///
    /// An address that cannot be represented fails before anything is sent.
    pub async fn write(&self, buf: &[u8], destination: &Address) -> Result<usize> {
        let addr = destination.to_sockaddr(self.interface.index() as _, self.protocol)?;
        let deadline = self.write_deadline();

        let sent = with_deadline(
            deadline,
            self.sender
                .async_io(Interest::WRITABLE, |socket| socket.send_to(buf, addr)),
        )
        .await?;

        Ok(sent)
    }

    /// Receive one frame together with its receive timestamps.
    pub async fn receive_rx_timestamps(&self, buf: &mut [u8]) -> Result<RecvResult> {
        receive_timestamped(
            &self.receiver,
            Interest::READABLE,
            MessageQueue::Normal,
            self.read_deadline(),
            buf,
        )
        .await
    }

    /// Receive the next frame echoed back on the sender's error queue,
    /// together with its transmit timestamps.
    pub async fn receive_tx_timestamps(&self, buf: &mut [u8]) -> Result<RecvResult> {
        // the timestamp being available triggers the error interest
        receive_timestamped(
            &self.sender,
            Interest::ERROR,
            MessageQueue::Error,
            self.write_deadline(),
            buf,
        )
        .await
    }

    /// Set both the read and the write deadline. `None` clears them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Deadline for [`read`](Self::read) and
    /// [`receive_rx_timestamps`](Self::receive_rx_timestamps).
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    /// Deadline for [`write`](Self::write) and
    /// [`receive_tx_timestamps`](Self::receive_tx_timestamps).
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    /// Replace the receive filter.
    pub fn set_filter(&self, program: &FilterProgram) -> Result<()> {
        self.receiver
            .get_ref()
            .attach_filter(&program.to_sock_filters())
            .map_err(Error::FilterRejected)?;
        tracing::debug!(instructions = program.len(), "replaced receive filter");
        Ok(())
    }

    /// Remove the receive filter, if any.
    pub fn clear_filter(&self) -> Result<()> {
        self.receiver.get_ref().detach_filter()?;
        Ok(())
    }

    /// Receive counters since the previous call. Reading resets them.
    pub fn stats(&self) -> Result<PacketStatistics> {
        let bytes = self.receiver.get_ref().packet_statistics()?;
        Ok(PacketStatistics::from_bytes(bytes))
    }

    /// The hardware address of this connection's interface.
    pub fn local_addr(&self) -> Option<&Address> {
        self.interface.hardware_addr()
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// The capability found when the connection was opened.
    pub fn capability(&self) -> TimestampingCapability {
        self.capability
    }

    /// Close the sender, then the receiver.
    ///
    /// Both are always closed. When both fail, the sender's error is the one
    /// reported; see [`CloseError`].
    pub fn close(self) -> Result<()> {
        let sender = self.sender.into_inner().close();
        let receiver = self.receiver.into_inner().close();

        CloseError::from_results(sender, receiver)?;
        Ok(())
    }

    fn read_deadline(&self) -> Option<Instant> {
        *self
            .read_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_deadline(&self) -> Option<Instant> {
        *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_socket(role: SocketRole, kind: SocketKind, flags: u32) -> Result<RawSocket> {
    let create_error = |source: std::io::Error| Error::CreateSocket { role, source };
    let option_error = |option: SocketOption| {
        move |source: std::io::Error| Error::SocketOption {
            role,
            option,
            source,
        }
    };

    // protocol 0 receives nothing until the socket is bound
    let socket = RawSocket::open(libc::AF_PACKET, kind.as_raw(), 0).map_err(create_error)?;
    socket.set_nonblocking(true).map_err(create_error)?;

    socket
        .packet_version_v3()
        .map_err(option_error(SocketOption::PacketVersion))?;
    socket
        .so_timestamping(flags)
        .map_err(option_error(SocketOption::Timestamping))?;
    socket
        .packet_timestamp(flags)
        .map_err(option_error(SocketOption::PacketTimestamp))?;

    Ok(socket)
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    operation: impl Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    match deadline {
        None => operation.await,
        Some(deadline) if deadline <= Instant::now() => Err(std::io::ErrorKind::TimedOut.into()),
        Some(deadline) => tokio::time::timeout_at(deadline.into(), operation).await?,
    }
}

async fn receive_timestamped(
    socket: &AsyncFd<RawSocket>,
    interest: Interest,
    queue: MessageQueue,
    deadline: Option<Instant>,
    buf: &mut [u8],
) -> Result<RecvResult> {
    let (bytes_read, remote_addr, timestamps) = with_deadline(
        deadline,
        socket.async_io(interest, |socket| {
            let mut control_buf = ControlBuffer::new();
            let (bytes_read, control_messages, addr) =
                socket.receive_message(buf, control_buf.as_mut_slice(), queue)?;

            Ok((
                bytes_read,
                Address::from_sockaddr(&addr),
                find_timestamps(control_messages),
            ))
        }),
    )
    .await?;

    Ok(RecvResult {
        bytes_read,
        remote_addr,
        timestamps: timestamps?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{filter::Instruction, interface::InterfaceName, MAX_HARDWARE_ADDRESS_LEN};

    use super::*;

    // IEEE 802 local experimental ethertype
    const PROTOCOL: u16 = 0x88b5;

    /// Open a connection on loopback, or `None` when the environment does not
    /// allow packet sockets.
    fn open_loopback(config: &Config) -> Option<Connection> {
        let interface = Interface::from_name(InterfaceName::LOOPBACK).ok()?;

        match Connection::open(&interface, SocketKind::Datagram, PROTOCOL, config) {
            Ok(connection) => Some(connection),
            Err(Error::CreateSocket { .. } | Error::CapabilityQuery { .. }) => None,
            Err(e) => panic!("could not open loopback connection: {e:?}"),
        }
    }

    fn loopback_peer() -> Address {
        Address::from([0; 6])
    }

    /// Read frames until one carrying `payload` arrives.
    async fn receive_payload(connection: &Connection, payload: &[u8]) -> RecvResult {
        let mut buf = [0; 256];
        loop {
            let result = connection.receive_rx_timestamps(&mut buf).await.unwrap();
            if &buf[..result.bytes_read] == payload {
                return result;
            }
        }
    }

    #[tokio::test]
    async fn loopback_round_trip_with_timestamps() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };
        connection.set_deadline(Some(Instant::now() + Duration::from_secs(5)));

        assert_eq!(connection.protocol(), PROTOCOL);
        assert_eq!(connection.interface().name(), InterfaceName::LOOPBACK);

        let payload = b"timestamped round trip";
        let sent = connection.write(payload, &loopback_peer()).await.unwrap();
        assert_eq!(sent, payload.len());

        let received = receive_payload(&connection, payload).await;
        assert_eq!(received.remote_addr, Some(loopback_peer()));
        assert!(received.timestamps.software.is_some());
        // loopback has no hardware clock
        assert_eq!(received.timestamps.hardware, None);

        let mut buf = [0; 256];
        let echoed = connection.receive_tx_timestamps(&mut buf).await.unwrap();
        assert_eq!(echoed.remote_addr, None);
        assert!(echoed.timestamps.software.is_some());

        let stats = connection.stats().unwrap();
        assert!(stats.packets >= 1);

        connection.close().unwrap();
    }

    #[tokio::test]
    async fn plain_read_reports_source() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };
        connection.set_deadline(Some(Instant::now() + Duration::from_secs(5)));

        connection.write(b"plain", &loopback_peer()).await.unwrap();

        let mut buf = [0; 64];
        let (bytes_read, source) = connection.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..bytes_read], b"plain");
        assert_eq!(source, Some(loopback_peer()));
    }

    #[tokio::test]
    async fn expired_deadline_fails_immediately() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };
        connection.set_read_deadline(Some(Instant::now()));

        let mut buf = [0; 64];
        assert!(connection.read(&mut buf).await.unwrap_err().is_timeout());
        assert!(connection
            .receive_rx_timestamps(&mut buf)
            .await
            .unwrap_err()
            .is_timeout());

        // the write direction is unaffected
        connection.write(b"still open", &loopback_peer()).await.unwrap();
    }

    #[tokio::test]
    async fn deadline_elapses_without_traffic() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };
        connection.set_write_deadline(Some(Instant::now() + Duration::from_millis(50)));

        // nothing was sent, so nothing is echoed back
        let mut buf = [0; 64];
        let error = connection.receive_tx_timestamps(&mut buf).await.unwrap_err();
        assert!(error.is_timeout());

        connection.set_deadline(None);
    }

    #[tokio::test]
    async fn oversized_address_fails_before_sending() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };
        // an expired deadline would fail any socket call with a timeout
        connection.set_write_deadline(Some(Instant::now()));

        let address = Address::new([0xaa; MAX_HARDWARE_ADDRESS_LEN + 1]);
        assert!(matches!(
            connection.write(b"frame", &address).await,
            Err(Error::InvalidAddress { len: 9 })
        ));
    }

    #[tokio::test]
    async fn filter_replacement() {
        let config = Config {
            filter: Some(FilterProgram::reject_all()),
        };
        let Some(connection) = open_loopback(&config) else {
            return;
        };

        let mut buf = [0; 64];
        connection.write(b"dropped", &loopback_peer()).await.unwrap();
        connection.set_read_deadline(Some(Instant::now() + Duration::from_millis(100)));
        assert!(connection.read(&mut buf).await.unwrap_err().is_timeout());

        connection.set_filter(&FilterProgram::accept_all()).unwrap();
        connection.set_read_deadline(Some(Instant::now() + Duration::from_secs(5)));
        connection.write(b"admitted", &loopback_peer()).await.unwrap();
        let (bytes_read, _) = connection.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..bytes_read], b"admitted");

        connection.clear_filter().unwrap();
        // detaching twice is not an error
        connection.clear_filter().unwrap();
    }

    #[tokio::test]
    async fn malformed_filter_is_rejected() {
        let Ok(interface) = Interface::from_name(InterfaceName::LOOPBACK) else {
            return;
        };
        let config = Config {
            filter: Some(FilterProgram::new([Instruction::new(0xffff, 0, 0, 0)])),
        };

        match Connection::open(&interface, SocketKind::Raw, PROTOCOL, &config) {
            Err(Error::FilterRejected(_)) => {}
            Err(Error::CreateSocket { .. } | Error::CapabilityQuery { .. }) => {}
            other => panic!("expected the filter to be rejected, got {other:?}"),
        }
    }

    fn open_descriptors() -> usize {
        std::fs::read_dir("/proc/self/fd").map_or(0, |entries| entries.count())
    }

    #[tokio::test]
    async fn failed_setup_releases_sockets() {
        // other tests open sockets concurrently, so repeat the failure often
        // enough that even one leaked socket per attempt stands out
        const ATTEMPTS: usize = 64;

        let Ok(interface) = Interface::from_name(InterfaceName::LOOPBACK) else {
            return;
        };
        let config = Config {
            filter: Some(FilterProgram::new([Instruction::new(0xffff, 0, 0, 0)])),
        };

        let before = open_descriptors();
        for _ in 0..ATTEMPTS {
            match Connection::open(&interface, SocketKind::Raw, PROTOCOL, &config) {
                Err(Error::FilterRejected(_)) => {}
                Err(Error::CreateSocket { .. } | Error::CapabilityQuery { .. }) => return,
                other => panic!("expected the filter to be rejected, got {other:?}"),
            }
        }
        let after = open_descriptors();

        assert!(
            after < before + ATTEMPTS,
            "descriptors grew from {before} to {after}"
        );
    }

    #[tokio::test]
    async fn loopback_addressing() {
        let Some(connection) = open_loopback(&Config::default()) else {
            return;
        };

        if let Some(local) = connection.local_addr() {
            assert_eq!(local, &loopback_peer());
        }
        // software timestamping is always requested
        assert_eq!(
            connection.capability().socket_flags() & crate::interface::sof::ALL_SOFTWARE,
            crate::interface::sof::ALL_SOFTWARE
        );
    }
}
