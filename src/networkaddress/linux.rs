use crate::{
    control_message::zeroed_sockaddr_storage,
    error::{Error, Result},
};

use super::{Address, MAX_HARDWARE_ADDRESS_LEN};

const _: () = assert!(
    std::mem::size_of::<libc::sockaddr_storage>() >= std::mem::size_of::<libc::sockaddr_ll>()
);
const _: () = assert!(
    std::mem::align_of::<libc::sockaddr_storage>() >= std::mem::align_of::<libc::sockaddr_ll>()
);

/// Byte offset of `sll_addr` within `sockaddr_ll`.
const SLL_ADDR_OFFSET: usize = 12;

impl Address {
    /// The kernel address for sending to this address through interface
    /// `if_index`. `protocol` is in host byte order.
    pub(crate) fn to_sockaddr(
        &self,
        if_index: libc::c_int,
        protocol: u16,
    ) -> Result<libc::sockaddr_storage> {
        if self.hardware_addr.len() > MAX_HARDWARE_ADDRESS_LEN {
            return Err(Error::InvalidAddress {
                len: self.hardware_addr.len(),
            });
        }

        let mut result = link_layer_sockaddr(if_index, protocol);
        // Safety: the module level assertions guarantee that alignment and size are correct.
        // the resulting reference won't outlast the function, and result lives the entire
        // duration of the function
        let out = unsafe { &mut (*(&mut result as *mut _ as *mut libc::sockaddr_ll)) };

        out.sll_halen = self.hardware_addr.len() as _;
        out.sll_addr[..self.hardware_addr.len()].copy_from_slice(&self.hardware_addr);

        Ok(result)
    }

    /// The hardware address carried by a kernel address, or `None` when it is
    /// not a link-layer address.
    pub(crate) fn from_sockaddr(addr: &libc::sockaddr_storage) -> Option<Self> {
        if addr.ss_family != libc::AF_PACKET as _ {
            return None;
        }

        // Safety: the module level assertions guarantee that alignment and size are correct
        // the resulting reference won't outlast the function, and addr lives the entire
        // duration of the function
        let input = unsafe { &(*(addr as *const _ as *const libc::sockaddr_ll)) };

        // the kernel writes addresses longer than sll_addr past its end, which
        // still lies within the sockaddr_storage
        // Safety: addr is a valid reference to sockaddr_storage, which is plain old data
        let storage = unsafe {
            std::slice::from_raw_parts(
                addr as *const _ as *const u8,
                std::mem::size_of::<libc::sockaddr_storage>(),
            )
        };
        let available = storage.len() - SLL_ADDR_OFFSET;
        let len = (input.sll_halen as usize).min(available);

        Some(Address::new(
            &storage[SLL_ADDR_OFFSET..SLL_ADDR_OFFSET + len],
        ))
    }
}

/// An `AF_PACKET` address without hardware address, as used for binding.
pub(crate) fn link_layer_sockaddr(if_index: libc::c_int, protocol: u16) -> libc::sockaddr_storage {
    let mut result = zeroed_sockaddr_storage();
    // Safety: the module level assertions guarantee that alignment and size are correct.
    // the resulting reference won't outlast the function, and result lives the entire
    // duration of the function
    let out = unsafe { &mut (*(&mut result as *mut _ as *mut libc::sockaddr_ll)) };

    out.sll_family = libc::AF_PACKET as _;
    out.sll_protocol = u16::from_ne_bytes(protocol.to_be_bytes());
    out.sll_ifindex = if_index;

    result
}
