use std::{
    io::IoSliceMut,
    os::fd::{AsRawFd, RawFd},
};

use libc::{c_void, sockaddr, sockaddr_storage};

use crate::{
    cerr,
    control_message::{
        empty_msghdr, zeroed_sockaddr_storage, ControlMessage, ControlMessageIterator, MessageQueue,
    },
    interface::InterfaceName,
};

/// `SOL_PACKET` option numbers and values from `linux/if_packet.h`.
pub(crate) mod packet {
    pub(crate) const PACKET_STATISTICS: libc::c_int = 6;
    pub(crate) const PACKET_VERSION: libc::c_int = 10;
    pub(crate) const PACKET_TIMESTAMP: libc::c_int = 17;

    pub(crate) const TPACKET_V3: libc::c_int = 2;

    /// Size of `struct tpacket_stats_v3`.
    pub(crate) const STATISTICS_LEN: usize = 12;
}

// A struct providing safe wrappers around various socket api calls
#[derive(Debug, Hash)]
pub(crate) struct RawSocket {
    fd: RawFd,
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl RawSocket {
    pub(crate) fn open(
        domain: libc::c_int,
        ty: libc::c_int,
        protocol: libc::c_int,
    ) -> std::io::Result<Self> {
        // Safety: libc::socket is always safe to call
        Ok(RawSocket {
            fd: cerr(unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, protocol) })?,
        })
    }

    pub(crate) fn bind(&self, addr: sockaddr_storage) -> std::io::Result<()> {
        // Safety: addr lives for the duration of the call, and the passed length matches it
        cerr(unsafe {
            libc::bind(
                self.fd,
                &addr as *const _ as *const _,
                std::mem::size_of::<libc::sockaddr_ll>() as _,
            )
        })?;
        Ok(())
    }

    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        let nonblocking = nonblocking as libc::c_int;
        // Safety: nonblocking lives for the duration of the call, and is 4 bytes long as expected for FIONBIO
        cerr(unsafe { libc::ioctl(self.fd, libc::FIONBIO, &nonblocking) }).map(drop)
    }

    fn setsockopt_int(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: libc::c_int,
    ) -> std::io::Result<()> {
        // SAFETY:
        //
        // - the socket is provided by (safe) rust, and will outlive the call
        // - the value pointer outlives the call
        // - the `option_len` corresponds with the value pointer
        unsafe {
            cerr(libc::setsockopt(
                self.fd,
                level,
                name,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of_val(&value) as libc::socklen_t,
            ))
        }?;
        Ok(())
    }

    /// Select the `TPACKET_V3` frame format, which carries queue and drop
    /// statistics.
    pub(crate) fn packet_version_v3(&self) -> std::io::Result<()> {
        self.setsockopt_int(libc::SOL_PACKET, packet::PACKET_VERSION, packet::TPACKET_V3)
    }

    pub(crate) fn so_timestamping(&self, options: u32) -> std::io::Result<()> {
        // Documentation on the timestamping calls:
        //
        // - linux: https://www.kernel.org/doc/Documentation/networking/timestamping.txt
        //
        // Only some bits are valid to set in `options`, but setting invalid bits is
        // perfectly safe
        //
        // > Setting other bit returns EINVAL and does not change the current state.
        self.setsockopt_int(libc::SOL_SOCKET, libc::SO_TIMESTAMPING, options as _)
    }

    pub(crate) fn packet_timestamp(&self, options: u32) -> std::io::Result<()> {
        self.setsockopt_int(libc::SOL_PACKET, packet::PACKET_TIMESTAMP, options as _)
    }

    pub(crate) fn attach_filter(&self, program: &[libc::sock_filter]) -> std::io::Result<()> {
        let fprog = libc::sock_fprog {
            len: u16::try_from(program.len()).map_err(|_| std::io::ErrorKind::InvalidInput)?,
            filter: program.as_ptr() as *mut _,
        };

        // Safety:
        // fprog and the program it points to outlive the call. The kernel copies
        // the instructions and never writes through the pointer.
        cerr(unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &fprog as *const _ as *const libc::c_void,
                std::mem::size_of_val(&fprog) as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    pub(crate) fn detach_filter(&self) -> std::io::Result<()> {
        match self.setsockopt_int(libc::SOL_SOCKET, libc::SO_DETACH_FILTER, 0) {
            // no filter was attached
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    /// The raw `tpacket_stats_v3` record. Reading resets the kernel counters.
    pub(crate) fn packet_statistics(&self) -> std::io::Result<[u8; packet::STATISTICS_LEN]> {
        let mut stats = [0u8; packet::STATISTICS_LEN];
        let mut len = stats.len() as libc::socklen_t;

        // Safety: stats and len live for the duration of the call, and len holds
        // the size of stats
        cerr(unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_PACKET,
                packet::PACKET_STATISTICS,
                stats.as_mut_ptr() as *mut libc::c_void,
                &mut len,
            )
        })?;

        Ok(stats)
    }

    /// Issue an interface-scoped ioctl whose `ifreq` carries a pointer to `data`.
    pub(crate) fn interface_ioctl(
        &self,
        interface: InterfaceName,
        request: libc::c_ulong,
        data: &mut [u8],
    ) -> std::io::Result<()> {
        let mut ifreq = libc::ifreq {
            ifr_name: interface.to_ifr_name(),
            ifr_ifru: libc::__c_anonymous_ifr_ifru {
                ifru_data: data.as_mut_ptr() as *mut libc::c_char,
            },
        };

        // Safety: ifreq and the data it points to are live for the duration of the call,
        // and data is sized for the request by the caller
        cerr(unsafe { libc::ioctl(self.fd, request as _, &mut ifreq) })?;
        Ok(())
    }

    pub(crate) fn receive_message<'a>(
        &self,
        packet_buf: &mut [u8],
        control_buf: &'a mut [u8],
        queue: MessageQueue,
    ) -> std::io::Result<(
        usize,
        impl Iterator<Item = ControlMessage> + 'a,
        sockaddr_storage,
    )> {
        let mut buf_slice = IoSliceMut::new(packet_buf);
        let mut addr = zeroed_sockaddr_storage();

        let mut mhdr = empty_msghdr();

        mhdr.msg_control = control_buf.as_mut_ptr().cast::<libc::c_void>();
        mhdr.msg_controllen = control_buf.len() as _;
        mhdr.msg_iov = (&mut buf_slice as *mut IoSliceMut).cast::<libc::iovec>();
        mhdr.msg_iovlen = 1;
        mhdr.msg_flags = 0;
        mhdr.msg_name = (&mut addr as *mut libc::sockaddr_storage).cast::<libc::c_void>();
        mhdr.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as u32;

        let receive_flags = match queue {
            MessageQueue::Normal => 0,
            MessageQueue::Error => libc::MSG_ERRQUEUE,
        };

        // Safety:
        // We have a mutable reference to the control buffer for the duration of the
        // call, and controllen is also set to it's length.
        // IoSliceMut is ABI compatible with iovec, and we only have 1 which matches
        // iovlen msg_name is initialized to point to an owned sockaddr_storage and
        // msg_namelen is the size of sockaddr_storage
        // If one of the buffers is too small, recvmsg cuts off data at appropriate
        // boundary
        let received_bytes = loop {
            match cerr(unsafe { libc::recvmsg(self.fd, &mut mhdr, receive_flags) } as _) {
                Err(e) if std::io::ErrorKind::Interrupted == e.kind() => {
                    // retry when the recv was interrupted
                    continue;
                }
                Err(e) => return Err(e),
                Ok(received) => break received as usize,
            }
        };

        if mhdr.msg_flags & libc::MSG_TRUNC > 0 {
            tracing::info!(
                "truncated packet because it was larger than expected: {} bytes",
                packet_buf.len(),
            );
        }

        if mhdr.msg_flags & libc::MSG_CTRUNC > 0 {
            tracing::info!("truncated control messages");
        }

        // Clear out the fields for which we are giving up the reference
        mhdr.msg_iov = std::ptr::null_mut();
        mhdr.msg_iovlen = 0;
        mhdr.msg_name = std::ptr::null_mut();
        mhdr.msg_namelen = 0;

        // Safety:
        // recvmsg ensures that the control buffer contains
        // a set of valid control messages and that controllen is
        // the length these take up in the buffer.
        Ok((
            received_bytes,
            unsafe { ControlMessageIterator::new(mhdr) },
            addr,
        ))
    }

    pub(crate) fn receive_from(
        &self,
        packet_buf: &mut [u8],
    ) -> std::io::Result<(usize, sockaddr_storage)> {
        let mut addr = zeroed_sockaddr_storage();
        let mut addr_len = std::mem::size_of_val(&addr) as libc::socklen_t;

        // Safety:
        // packet_buf points to a block of memory of length packet_buf.len(), addr
        // and addr_len outlive the call and addr_len holds the size of addr
        let received_bytes = loop {
            match cerr(unsafe {
                libc::recvfrom(
                    self.fd,
                    packet_buf.as_mut_ptr() as *mut c_void,
                    packet_buf.len(),
                    0,
                    &mut addr as *mut _ as *mut sockaddr,
                    &mut addr_len,
                )
            } as _)
            {
                Err(e) if std::io::ErrorKind::Interrupted == e.kind() => continue,
                Err(e) => return Err(e),
                Ok(received) => break received as usize,
            }
        };

        Ok((received_bytes, addr))
    }

    pub(crate) fn send_to(&self, msg: &[u8], addr: sockaddr_storage) -> std::io::Result<usize> {
        // Safety:
        // the socket will outlive the call.
        // msg points to a block of memory of length msg.len()
        // addr points to a block of memory of length addrlen
        // with flags=0, the other arguments don't matter for safety
        let sent = cerr(unsafe {
            libc::sendto(
                self.fd,
                msg as *const _ as *const c_void,
                msg.len(),
                0,
                &addr as *const _ as *const sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as _,
            ) as _
        })?;
        Ok(sent as usize)
    }

    /// Close the descriptor, reporting failure instead of ignoring it as drop does.
    pub(crate) fn close(self) -> std::io::Result<()> {
        let fd = self.fd;
        std::mem::forget(self);
        // Safety: fd is owned by this socket, which is consumed and will not close it again
        cerr(unsafe { libc::close(fd) })?;
        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        // Safety: close is always safe to call on a file descriptor
        unsafe { libc::close(self.fd) };
    }
}
