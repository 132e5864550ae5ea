use std::fmt;

use crate::interface::InterfaceName;

pub type Result<T> = std::result::Result<T, Error>;

/// Which of the two sockets of a connection an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    Sender,
    Receiver,
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketRole::Sender => f.write_str("sender"),
            SocketRole::Receiver => f.write_str("receiver"),
        }
    }
}

/// The socket option that was being applied when setup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// `PACKET_VERSION` at `SOL_PACKET`
    PacketVersion,
    /// `SO_TIMESTAMPING` at `SOL_SOCKET`
    Timestamping,
    /// `PACKET_TIMESTAMP` at `SOL_PACKET`
    PacketTimestamp,
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketOption::PacketVersion => f.write_str("PACKET_VERSION"),
            SocketOption::Timestamping => f.write_str("SO_TIMESTAMPING"),
            SocketOption::PacketTimestamp => f.write_str("PACKET_TIMESTAMP"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("raw link-layer timestamping is not supported on {}", std::env::consts::OS)]
    Unsupported,
    #[error("interface {0} does not exist")]
    InterfaceNotFound(InterfaceName),
    #[error("could not query timestamping capability of {interface}")]
    CapabilityQuery {
        interface: InterfaceName,
        #[source]
        source: std::io::Error,
    },
    #[error("could not enable hardware timestamping on {interface}")]
    EnableHardwareTimestamping {
        interface: InterfaceName,
        #[source]
        source: std::io::Error,
    },
    #[error("could not create {role} socket")]
    CreateSocket {
        role: SocketRole,
        #[source]
        source: std::io::Error,
    },
    #[error("could not set {option} on {role} socket")]
    SocketOption {
        role: SocketRole,
        option: SocketOption,
        #[source]
        source: std::io::Error,
    },
    #[error("could not bind {role} socket")]
    Bind {
        role: SocketRole,
        #[source]
        source: std::io::Error,
    },
    #[error("filter program rejected")]
    FilterRejected(#[source] std::io::Error),
    #[error("no timestamp control message")]
    NoTimestamp,
    #[error("hardware address of {len} bytes cannot be represented")]
    InvalidAddress { len: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Close(#[from] CloseError),
}

impl Error {
    /// True for the expected "timestamp not present this time" condition,
    /// which does not indicate a problem with the connection.
    pub fn is_no_timestamp(&self) -> bool {
        matches!(self, Error::NoTimestamp)
    }

    /// True when a deadline set on the connection expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }
}

/// Failure to release one or both sockets of a connection.
///
/// Both sockets are always closed. When both closes fail, the sender's error
/// is the one reported through `Display` and `source`; the receiver's error
/// remains available through [`CloseError::receiver`].
#[derive(Debug)]
pub struct CloseError {
    pub(crate) sender: Option<std::io::Error>,
    pub(crate) receiver: Option<std::io::Error>,
}

impl CloseError {
    /// Combine the results of closing the sender and the receiver.
    pub(crate) fn from_results(
        sender: std::io::Result<()>,
        receiver: std::io::Result<()>,
    ) -> std::result::Result<(), CloseError> {
        match (sender, receiver) {
            (Ok(()), Ok(())) => Ok(()),
            (sender, receiver) => Err(CloseError {
                sender: sender.err(),
                receiver: receiver.err(),
            }),
        }
    }

    pub fn sender(&self) -> Option<&std::io::Error> {
        self.sender.as_ref()
    }

    pub fn receiver(&self) -> Option<&std::io::Error> {
        self.receiver.as_ref()
    }

    fn primary(&self) -> Option<(SocketRole, &std::io::Error)> {
        match (&self.sender, &self.receiver) {
            (Some(e), _) => Some((SocketRole::Sender, e)),
            (None, Some(e)) => Some((SocketRole::Receiver, e)),
            (None, None) => None,
        }
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.primary() {
            Some((role, error)) => write!(f, "could not close {role} socket: {error}"),
            None => f.write_str("could not close socket"),
        }
    }
}

impl std::error::Error for CloseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.primary()
            .map(|(_, e)| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io::{self, ErrorKind};

    use super::*;

    #[test]
    fn close_succeeds_when_both_succeed() {
        assert!(CloseError::from_results(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn close_reports_sender_when_both_fail() {
        let error = CloseError::from_results(
            Err(io::Error::from(ErrorKind::BrokenPipe)),
            Err(io::Error::from(ErrorKind::NotConnected)),
        )
        .unwrap_err();

        let source = error.source().unwrap().downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), ErrorKind::BrokenPipe);
        assert!(error.to_string().starts_with("could not close sender socket"));

        // the receiver's failure is kept rather than dropped
        assert_eq!(error.receiver().unwrap().kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn close_reports_receiver_alone() {
        let error =
            CloseError::from_results(Ok(()), Err(io::Error::from(ErrorKind::NotConnected)))
                .unwrap_err();

        assert!(error.sender().is_none());
        assert!(error.to_string().starts_with("could not close receiver socket"));
    }

    #[test]
    fn error_classification() {
        assert!(Error::NoTimestamp.is_no_timestamp());
        assert!(!Error::Unsupported.is_no_timestamp());
        assert!(Error::from(io::Error::from(ErrorKind::TimedOut)).is_timeout());
        assert!(!Error::InvalidAddress { len: 9 }.is_timeout());
    }

    #[test]
    fn setup_errors_name_the_stage() {
        let error = Error::SocketOption {
            role: SocketRole::Receiver,
            option: SocketOption::PacketTimestamp,
            source: io::Error::from(ErrorKind::InvalidInput),
        };
        assert_eq!(
            error.to_string(),
            "could not set PACKET_TIMESTAMP on receiver socket"
        );
    }
}
