//! FerriteOS Kernel Library
//!
//! Core of a small protected-mode i686 teaching kernel: physical and virtual
//! memory management, interrupt dispatch, privilege enforcement, and a
//! cooperative process scheduler. The library form exists so the allocator,
//! paging, validation, and scheduler logic can be unit tested on the host;
//! the `ferrite-kernel` binary links it for the bare-metal target.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(all(test, target_os = "none"), feature(custom_test_frameworks))]
#![cfg_attr(
    all(test, target_os = "none"),
    test_runner(crate::test_framework::test_runner)
)]
#![cfg_attr(all(test, target_os = "none"), reexport_test_harness_main = "test_main")]

extern crate alloc;

// Host target: link std so unit tests can run under the standard harness
// and allocate through the system allocator.
#[cfg(not(target_os = "none"))]
extern crate std;

/// Kernel heap, doubling as the global allocator on bare metal. It stays a
/// plain static on the host so tests exercise the same type while `Vec` and
/// friends go through the system allocator.
#[cfg_attr(target_os = "none", global_allocator)]
pub static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::empty();

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod collections;
pub mod drivers;
pub mod error;
pub mod irq;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod security;
pub mod services;
pub mod syscall;
pub mod test_framework;

pub use error::{KernelError, KernelResult};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Allocation failure in the kernel is unrecoverable; the freelist already
/// panics on exhaustion, so this only fires for pathological layouts.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
