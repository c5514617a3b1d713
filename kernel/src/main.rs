//! FerriteOS kernel binary
//!
//! Multiboot entry, staged bring-up, and the panic handler. Everything of
//! substance lives in the `ferrite_kernel` library.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod kernel {
    use core::panic::PanicInfo;

    use ferrite_kernel::{
        arch::{
            self,
            x86::{gdt, idt, vga},
        },
        logger, mm, print, println, process,
        security::{self, audit},
        services::shell,
        syscall,
    };

    /// Physical memory handed to the allocators.
    const MANAGED_MEMORY: usize = 32 * 1024 * 1024;

    const BOOT_STACK_SIZE: usize = 16 * 1024;

    // Multiboot header plus the entry stub: establish a boot stack, then
    // hand the multiboot registers to kernel_main.
    core::arch::global_asm!(
        r#"
.section .multiboot
.align 4
.long 0x1BADB002
.long 0x00000003
.long -(0x1BADB002 + 0x00000003)

.section .bss
.align 16
boot_stack_bottom:
.skip {stack_size}
boot_stack_top:

.section .text
.global _start
_start:
    mov esp, offset boot_stack_top
    push ebx
    push eax
    call kernel_main
2:
    hlt
    jmp 2b
"#,
        stack_size = const BOOT_STACK_SIZE,
    );

    #[no_mangle]
    pub extern "C" fn kernel_main(_magic: u32, _multiboot_info: u32) -> ! {
        vga::init();
        logger::init();
        println!("FerriteOS {} booting...", env!("CARGO_PKG_VERSION"));

        gdt::init();
        mm::init(MANAGED_MEMORY);
        idt::init();
        security::init();
        ferrite_kernel::drivers::keyboard::init();
        process::init();
        syscall::init();

        arch::x86::enable_interrupts();
        log::info!("boot: interrupts enabled");

        shell::print_welcome();
        shell::run()
    }

    /// Fatal error path: no unwinding, no cleanup. Interrupts off, a red
    /// banner, one audit record if the log is free, then a HLT loop.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        arch::x86::disable_interrupts();
        audit::log_event_from_panic([0; 4]);

        vga::set_color(vga::Color::White, vga::Color::Red);
        println!("\n\n*** KERNEL PANIC ***");
        println!("{}", info);
        print!("\nSystem halted.");

        arch::x86::halt_loop()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("ferrite-kernel only runs on the bare-metal x86-ferrite target");
}
