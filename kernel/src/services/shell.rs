//! Interactive kernel shell
//!
//! A single-line reader over the blocking keyboard with a handful of
//! commands for poking at the kernel's security machinery. Runs in the
//! boot context; it never returns.

use crate::{
    arch::x86::vga::{self, Color},
    drivers::keyboard,
    mm::user_validation::validate_user_ptr,
    security::{self, audit},
};

const MAX_COMMAND_LEN: usize = 256;

/// Print the boot banner.
pub fn print_welcome() {
    vga::set_color(Color::LightCyan, Color::Black);
    println!("{}", "=".repeat(80));
    vga::set_color(Color::LightGreen, Color::Black);
    println!("{:^80}", concat!("FerriteOS ", env!("CARGO_PKG_VERSION")));
    vga::set_color(Color::LightCyan, Color::Black);
    println!("{}", "=".repeat(80));
    println!();

    vga::set_color(Color::White, Color::Black);
    println!("Security features:");
    vga::set_color(Color::LightGray, Color::Black);
    println!("  [+] Ring-based protection (ring 0 / ring 3)");
    println!("  [+] Memory isolation and paging");
    println!("  [+] Stack canary protection");
    println!("  [+] Input validation and sanitization");
    println!("  [+] Security audit log");
    println!();
    vga::set_color(Color::White, Color::Black);
    println!("Kernel initialized successfully!");
    println!();
    vga::set_color(Color::LightGray, Color::Black);
}

fn prompt() {
    vga::set_color(Color::LightGreen, Color::Black);
    print!("kernel> ");
    vga::set_color(Color::White, Color::Black);
}

/// Read and execute commands forever.
pub fn run() -> ! {
    let mut command = [0u8; MAX_COMMAND_LEN];
    let mut len = 0;

    prompt();
    loop {
        let ch = keyboard::getchar();
        match ch {
            b'\n' => {
                println!();
                if let Ok(line) = core::str::from_utf8(&command[..len]) {
                    execute(line);
                }
                len = 0;
                prompt();
            }
            0x08 => {
                if len > 0 {
                    len -= 1;
                    vga::write_bytes(&[0x08]);
                }
            }
            ch => {
                if len < MAX_COMMAND_LEN - 1 {
                    command[len] = ch;
                    len += 1;
                    vga::write_bytes(&[ch]);
                }
            }
        }
    }
}

/// Dispatch one command line.
pub fn execute(line: &str) {
    match line.trim() {
        "help" => {
            vga::set_color(Color::LightCyan, Color::Black);
            println!("\nAvailable commands:");
            vga::set_color(Color::LightGray, Color::Black);
            println!("  help    - Show this help message");
            println!("  clear   - Clear the screen");
            println!("  info    - Display system information");
            println!("  test    - Run security self-checks");
            println!("  audit   - Display the security audit log");
            println!("  reboot  - Reboot the system");
            println!();
        }
        "clear" => {
            vga::clear();
            print_welcome();
        }
        "info" => {
            vga::set_color(Color::LightCyan, Color::Black);
            println!("\nSystem information:");
            vga::set_color(Color::LightGray, Color::Black);
            println!("  Kernel: FerriteOS {}", env!("CARGO_PKG_VERSION"));
            println!("  Architecture: x86 (32-bit)");
            println!("  Memory protection: enabled");
            println!("  Paging: enabled");
            println!("  Interrupts: enabled");
            println!("  Audit events retained: {}", audit::len());
            println!();
        }
        "test" => run_self_checks(),
        "audit" => audit::print_log(),
        "reboot" => reboot(),
        "" => {}
        unknown => {
            vga::set_color(Color::LightRed, Color::Black);
            println!("Unknown command: {}", unknown);
            println!("Type 'help' for available commands.\n");
            vga::set_color(Color::LightGray, Color::Black);
        }
    }
}

fn run_self_checks() {
    vga::set_color(Color::Yellow, Color::Black);
    println!("\nRunning security self-checks...");

    let mut passed = true;

    if security::check_canary(security::canary()) {
        report_pass("Stack canary validation");
    }

    if security::validate_privilege(security::RING_KERNEL) {
        report_pass("Privilege level check (ring 0)");
    } else {
        report_fail("Privilege level check (ring 0)");
        passed = false;
    }

    if !validate_user_ptr(crate::mm::KERNEL_VIRTUAL_BASE, 4096) {
        report_pass("Kernel memory protection");
    } else {
        report_fail("Kernel memory protection");
        passed = false;
    }

    vga::set_color(Color::LightGray, Color::Black);
    if passed {
        println!("\nAll tests passed!\n");
    } else {
        println!("\nSome tests FAILED.\n");
    }
}

fn report_pass(name: &str) {
    vga::set_color(Color::LightGreen, Color::Black);
    println!("  [PASS] {}", name);
}

fn report_fail(name: &str) {
    vga::set_color(Color::LightRed, Color::Black);
    println!("  [FAIL] {}", name);
}

fn reboot() -> ! {
    println!("\nRebooting...");
    // SAFETY: writing 0xFE to the keyboard controller command port pulses
    // the CPU reset line.
    unsafe {
        crate::arch::x86::port::Port::<u8>::new(0x64).write(0xFE);
    }
    crate::arch::x86::halt_loop();
}
