//! Bare-metal test scaffolding
//!
//! Host unit tests use the standard harness; this module only matters when
//! the test binary runs under QEMU, where results go out over serial and
//! the exit code through the isa-debug-exit device.

use core::panic::PanicInfo;

use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Trait that all testable functions must implement.
pub trait Testable {
    fn run(&self) -> Result<(), KernelError>;
}

impl<T> Testable for T
where
    T: Fn() -> Result<(), KernelError>,
{
    fn run(&self) -> Result<(), KernelError> {
        serial_print!("{}...\t", core::any::type_name::<T>());
        match self() {
            Ok(()) => {
                serial_println!("[ok]");
                Ok(())
            }
            Err(e) => {
                serial_println!("[failed]: {}", e);
                Err(e)
            }
        }
    }
}

/// Custom test runner for the bare-metal harness.
#[cfg(all(test, target_os = "none"))]
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    let mut failed = 0;

    for test in tests {
        if test.run().is_err() {
            failed += 1;
        }
    }

    serial_println!("\nTest results: {} passed, {} failed", tests.len() - failed, failed);

    if failed == 0 {
        exit_qemu(QemuExitCode::Success)
    } else {
        exit_qemu(QemuExitCode::Failed)
    }
}

/// Panic handler for the bare-metal test harness.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed)
}

/// Leave QEMU, reporting `exit_code` through the isa-debug-exit device.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    #[cfg(target_arch = "x86")]
    // SAFETY: port 0xF4 is the QEMU debug-exit device; QEMU terminates on
    // the write, so nothing runs afterwards.
    unsafe {
        crate::arch::x86::port::Port::<u32>::new(0xF4).write(exit_code as u32);
    }
    let _ = exit_code;
    crate::arch::x86::halt_loop()
}
