use std::marker::PhantomData;

use crate::{
    error::{Error, Result},
    timestamp::{decode_timestamping, TimestampPair},
};

pub(crate) const fn control_message_space<T>() -> usize {
    // Safety: CMSG_SPACE is safe to call
    (unsafe { libc::CMSG_SPACE((std::mem::size_of::<T>()) as _) }) as usize
}

/// Room for a timestamping record plus the extended error that accompanies
/// error queue messages.
pub(crate) const EXPECTED_MAX_CMSG_SIZE: usize = control_message_space::<[libc::timespec; 3]>()
    + control_message_space::<(libc::sock_extended_err, libc::sockaddr_storage)>();

/// `PACKET_TX_TIMESTAMP`, the `SOL_PACKET` type of error queue messages.
const PACKET_TX_TIMESTAMP: libc::c_int = 16;

/// Control message space with the alignment `cmsghdr` requires.
#[repr(C, align(8))]
pub(crate) struct ControlBuffer([u8; EXPECTED_MAX_CMSG_SIZE]);

impl ControlBuffer {
    pub(crate) fn new() -> Self {
        Self([0; EXPECTED_MAX_CMSG_SIZE])
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum MessageQueue {
    Normal,
    Error,
}

// Invariants:
// self.mhdr points to a valid libc::msghdr with a valid control
// message region.
// self.next_msg points to one of the control messages
// in the region described by self.mhdr or is NULL
//
// These invariants are guaranteed from the safety conditions on
// calling ControlMessageIterator::new, the fact that next preserves
// these invariants and that the fields of ControlMessageIterator
// are not modified outside these two functions.
pub(crate) struct ControlMessageIterator<'a> {
    mhdr: libc::msghdr,
    next_msg: *const libc::cmsghdr,
    phantom: PhantomData<&'a [u8]>,
}

impl ControlMessageIterator<'_> {
    // Safety assumptions:
    // mhdr has a control and controllen field
    // that together describe a memory region
    // with lifetime 'a containing valid control
    // messages, or MSG_CTRUNC is set.
    pub(crate) unsafe fn new(mhdr: libc::msghdr) -> Self {
        // Safety:
        // mhdr's control and controllen fields are valid and point
        // to valid control messages.
        let current_msg = if mhdr.msg_flags & libc::MSG_CTRUNC == 0 {
            unsafe { libc::CMSG_FIRSTHDR(&mhdr) }
        } else {
            std::ptr::null()
        };

        Self {
            mhdr,
            next_msg: current_msg,
            phantom: PhantomData,
        }
    }
}

pub(crate) enum ControlMessage {
    Timestamping(Result<TimestampPair>),
    ReceiveError(libc::sock_extended_err),
    Other {
        level: libc::c_int,
        kind: libc::c_int,
    },
}

impl Iterator for ControlMessageIterator<'_> {
    type Item = ControlMessage;

    fn next(&mut self) -> Option<Self::Item> {
        // Safety:
        // By the invariants, self.current_msg either points to a valid control message
        // or is NULL
        let current_msg = unsafe { self.next_msg.as_ref() }?;

        // Safety:
        // The previous statement would have returned if self.next_msg were NULL,
        // therefore both passed pointers are valid for use with CMSG_NXTHDR.
        // CMSG_NXTHDR returns either a pointer to the next valid control message in the
        // control message region described by self.mhdr, or NULL
        self.next_msg = unsafe { libc::CMSG_NXTHDR(&self.mhdr, self.next_msg) };

        // Safety: CMSG_LEN is safe to call
        let header_len = unsafe { libc::CMSG_LEN(0) } as usize;
        let data_len = (current_msg.cmsg_len as usize).saturating_sub(header_len);

        Some(match (current_msg.cmsg_level, current_msg.cmsg_type) {
            (libc::SOL_SOCKET, libc::SCM_TIMESTAMPING) => {
                // Safety:
                // current_msg points to a valid control message, whose data
                // region is cmsg_len - CMSG_LEN(0) bytes long
                let data = unsafe {
                    std::slice::from_raw_parts(libc::CMSG_DATA(current_msg), data_len)
                };

                ControlMessage::Timestamping(decode_timestamping(
                    current_msg.cmsg_level,
                    current_msg.cmsg_type,
                    data,
                ))
            }

            (libc::SOL_PACKET, PACKET_TX_TIMESTAMP)
                if data_len >= std::mem::size_of::<libc::sock_extended_err>() =>
            {
                // Safety:
                // current_msg was constructed from a pointer that pointed to a valid
                // control message, large enough to hold a sock_extended_err
                let error = unsafe {
                    let ptr = libc::CMSG_DATA(current_msg) as *const libc::sock_extended_err;
                    std::ptr::read_unaligned(ptr)
                };

                ControlMessage::ReceiveError(error)
            }

            (level, kind) => ControlMessage::Other { level, kind },
        })
    }
}

/// The timestamps from the first timestamping message among `messages`.
pub(crate) fn find_timestamps(
    messages: impl Iterator<Item = ControlMessage>,
) -> Result<TimestampPair> {
    for msg in messages {
        match msg {
            ControlMessage::Timestamping(timestamps) => {
                tracing::trace!(?timestamps, "timestamping control message");
                return timestamps;
            }

            ControlMessage::ReceiveError(error) => {
                // the timestamping does not set a message; if there is a message, that means
                // something else is wrong, and we want to know about it.
                if error.ee_errno as libc::c_int != libc::ENOMSG {
                    tracing::warn!(
                        error.ee_errno,
                        error.ee_data,
                        "error message on the MSG_ERRQUEUE"
                    );
                }
            }

            ControlMessage::Other { level, kind } => {
                tracing::debug!(level, kind, "unexpected control message");
            }
        }
    }

    Err(Error::NoTimestamp)
}

pub(crate) fn zeroed_sockaddr_storage() -> libc::sockaddr_storage {
    // a zeroed-out sockaddr storage is semantically valid, because a ss_family with
    // value 0 is libc::AF_UNSPEC. Hence the rest of the data does not come with
    // any constraints Safety:
    // the MaybeUninit is zeroed before assumed to be initialized
    unsafe { std::mem::MaybeUninit::zeroed().assume_init() }
}

pub(crate) fn empty_msghdr() -> libc::msghdr {
    // On `target_env = "musl"`, there are several private padding fields.
    // the position of these padding fields depends on the system endianness,
    // so keeping making them public does not really help.
    //
    // Safety:
    //
    // all fields are either integer or pointer types. For those types, 0 is a valid
    // value
    unsafe { std::mem::MaybeUninit::<libc::msghdr>::zeroed().assume_init() }
}

#[cfg(test)]
mod tests {
    use crate::timestamp::Timestamp;

    use super::*;

    /// Aligned buffer that control messages are written into.
    struct MessageWriter {
        buf: [u64; 64],
        used: usize,
    }

    impl MessageWriter {
        fn new() -> Self {
            Self {
                buf: [0; 64],
                used: 0,
            }
        }

        fn push(&mut self, level: libc::c_int, kind: libc::c_int, data: &[u8]) {
            // Safety: CMSG_* are safe to call, and the buffer is large enough for the
            // messages these tests construct
            unsafe {
                let start = (self.buf.as_mut_ptr() as *mut u8).add(self.used);
                let header = start as *mut libc::cmsghdr;
                (*header).cmsg_len = libc::CMSG_LEN(data.len() as _) as _;
                (*header).cmsg_level = level;
                (*header).cmsg_type = kind;
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    libc::CMSG_DATA(header),
                    data.len(),
                );
                self.used += libc::CMSG_SPACE(data.len() as _) as usize;
            }
        }

        fn messages(&mut self, flags: libc::c_int) -> Vec<ControlMessage> {
            let mut mhdr = empty_msghdr();
            mhdr.msg_control = self.buf.as_mut_ptr().cast();
            mhdr.msg_controllen = self.used as _;
            mhdr.msg_flags = flags;

            // Safety: the buffer contains valid control messages of total length used
            unsafe { ControlMessageIterator::new(mhdr) }.collect()
        }
    }

    fn timestamping_record(software: (i64, i64), hardware: (i64, i64)) -> [u8; 48] {
        let mut data = [0; 48];
        data[0..8].copy_from_slice(&software.0.to_ne_bytes());
        data[8..16].copy_from_slice(&software.1.to_ne_bytes());
        data[32..40].copy_from_slice(&hardware.0.to_ne_bytes());
        data[40..48].copy_from_slice(&hardware.1.to_ne_bytes());
        data
    }

    fn extended_err_bytes(errno: u32, data: u32) -> Vec<u8> {
        // Safety: sock_extended_err is plain old data, zero is valid for every field
        let mut error: libc::sock_extended_err = unsafe { std::mem::zeroed() };
        error.ee_errno = errno;
        error.ee_data = data;
        // Safety: error lives for the duration of the borrow
        unsafe {
            std::slice::from_raw_parts(
                &error as *const _ as *const u8,
                std::mem::size_of_val(&error),
            )
        }
        .to_vec()
    }

    #[test]
    fn finds_timestamp_after_extended_error() {
        let mut buffer = MessageWriter::new();
        buffer.push(
            libc::SOL_PACKET,
            PACKET_TX_TIMESTAMP,
            &extended_err_bytes(libc::ENOMSG as u32, 0),
        );
        buffer.push(
            libc::SOL_SOCKET,
            libc::SCM_TIMESTAMPING,
            &timestamping_record((1_700_000_000, 250), (1_700_000_000, 125)),
        );

        let messages = buffer.messages(0);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ControlMessage::ReceiveError(_)));

        let pair = find_timestamps(messages.into_iter()).unwrap();
        assert_eq!(
            pair.software,
            Some(Timestamp {
                seconds: 1_700_000_000,
                nanos: 250
            })
        );
        assert_eq!(
            pair.hardware,
            Some(Timestamp {
                seconds: 1_700_000_000,
                nanos: 125
            })
        );
    }

    #[test]
    fn no_timestamp_among_other_messages() {
        let mut buffer = MessageWriter::new();
        // SCM_TIMESTAMPNS carries a single timespec and is not the extended record
        buffer.push(
            libc::SOL_SOCKET,
            libc::SCM_TIMESTAMPNS,
            &timestamping_record((5, 5), (5, 5))[..16],
        );
        buffer.push(libc::SOL_IP, libc::IP_TTL, &64i32.to_ne_bytes());

        let result = find_timestamps(buffer.messages(0).into_iter());
        assert!(matches!(result, Err(Error::NoTimestamp)));
    }

    #[test]
    fn empty_and_truncated_buffers() {
        let mut buffer = MessageWriter::new();
        assert!(buffer.messages(0).is_empty());

        buffer.push(
            libc::SOL_SOCKET,
            libc::SCM_TIMESTAMPING,
            &timestamping_record((1, 0), (0, 0)),
        );
        assert!(buffer.messages(libc::MSG_CTRUNC).is_empty());
        assert!(matches!(
            find_timestamps(buffer.messages(libc::MSG_CTRUNC).into_iter()),
            Err(Error::NoTimestamp)
        ));
    }

    #[test]
    fn software_only_record() {
        let mut buffer = MessageWriter::new();
        buffer.push(
            libc::SOL_SOCKET,
            libc::SCM_TIMESTAMPING,
            &timestamping_record((42, 7), (0, 0)),
        );

        let pair = find_timestamps(buffer.messages(0).into_iter()).unwrap();
        assert_eq!(pair.software, Some(Timestamp { seconds: 42, nanos: 7 }));
        assert_eq!(pair.hardware, None);
    }
}
