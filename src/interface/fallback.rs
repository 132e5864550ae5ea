use crate::error::{Error, Result};

use super::{Interface, InterfaceName};

pub(super) fn lookup(name: InterfaceName) -> Result<Interface> {
    match name.get_index() {
        None => Err(Error::InterfaceNotFound(name)),
        Some(_) => Err(Error::Unsupported),
    }
}
