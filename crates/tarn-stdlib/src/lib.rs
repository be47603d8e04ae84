//! Tarn standard library.

pub mod base;

use tarn_core::vm::Vm;

/// Register every standard global into the VM.
pub fn register_all(vm: &mut Vm) {
    base::register(vm);
}
