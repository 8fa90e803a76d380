//! Built-in host modules a VM can register on construction.

pub mod process;
pub mod wasi;

use crate::config::HostRegistration;
use crate::import::ImportObject;

/// Creates a fresh import object for `kind`.
pub fn import_object(kind: HostRegistration) -> ImportObject {
    match kind {
        HostRegistration::Wasi => wasi::import_object(),
        HostRegistration::Process => process::import_object(),
    }
}
