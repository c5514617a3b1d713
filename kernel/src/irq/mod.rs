//! Interrupt routing
//!
//! The trampolines deliver every vector to [`dispatch`] with a saved
//! register frame. Vectors below 32 are CPU exceptions: a registered
//! handler may claim them, otherwise the canonical name is printed and the
//! kernel panics. Vectors 32..=47 are hardware interrupts: the PIC is
//! acknowledged first, then a registered handler runs if present. Anything
//! else (the system-call gate) goes straight to its registered handler.

use spin::Mutex;

use crate::arch::x86::{idt::Registers, pic};

/// A registered interrupt handler. One per vector; registration overwrites.
pub type InterruptHandler = fn(&mut Registers);

static HANDLERS: Mutex<[Option<InterruptHandler>; 256]> = Mutex::new([None; 256]);

const EXCEPTION_NAMES: [&str; 32] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Into Detected Overflow",
    "Out of Bounds",
    "Invalid Opcode",
    "No Coprocessor",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Bad TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Unknown Interrupt",
    "Coprocessor Fault",
    "Alignment Check",
    "Machine Check",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

/// First hardware interrupt vector after the PIC remap.
pub const IRQ_BASE: u32 = pic::MASTER_VECTOR_BASE as u32;
/// One past the last hardware interrupt vector.
pub const IRQ_LIMIT: u32 = IRQ_BASE + 16;

/// Install `handler` for `vector`, replacing any previous one.
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    HANDLERS.lock()[vector as usize] = Some(handler);
}

/// Drop every registered handler. Part of descriptor-table bring-up.
pub fn clear_handlers() {
    *HANDLERS.lock() = [None; 256];
}

fn handler_for(vector: usize) -> Option<InterruptHandler> {
    // Copy the fn pointer out so the handler runs without the table lock
    // held and may itself (re)register handlers.
    HANDLERS.lock()[vector]
}

/// Route one saved register frame. Called from the common trampoline stub.
pub fn dispatch(regs: &mut Registers) {
    let vector = regs.int_no;

    if vector < 32 {
        match handler_for(vector as usize) {
            Some(handler) => handler(regs),
            None => unhandled_exception(regs),
        }
        return;
    }

    if (IRQ_BASE..IRQ_LIMIT).contains(&vector) {
        // Acknowledge before handling; the gate keeps interrupts masked so
        // the handler cannot be re-entered either way.
        pic::end_of_interrupt(vector as u8);
        if let Some(handler) = handler_for(vector as usize) {
            handler(regs);
        }
        return;
    }

    // Software vectors (the system-call gate) have no PIC to acknowledge.
    if let Some(handler) = handler_for(vector as usize) {
        handler(regs);
    }
}

fn unhandled_exception(regs: &mut Registers) -> ! {
    use crate::arch::x86::vga::{self, Color};

    vga::set_color(Color::LightRed, Color::Black);
    println!("\n!!! EXCEPTION: {} !!!", EXCEPTION_NAMES[regs.int_no as usize]);
    println!("Error Code: {:#x}", regs.err_code);
    println!("EIP: {:#010x}  CS: {:#06x}  EFLAGS: {:#010x}", regs.eip, regs.cs, regs.eflags);
    panic!("unhandled exception: {}", EXCEPTION_NAMES[regs.int_no as usize]);
}

/// C-ABI entry used by the trampoline stub.
#[cfg(target_arch = "x86")]
#[no_mangle]
extern "C" fn interrupt_dispatch(regs: &mut Registers) {
    dispatch(regs);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn registered_handler_receives_the_frame() {
        static SEEN_VECTOR: AtomicU32 = AtomicU32::new(0);
        fn record(regs: &mut Registers) {
            SEEN_VECTOR.store(regs.int_no, Ordering::SeqCst);
            regs.eax = 0x1234;
        }

        register_handler(45, record);
        let mut regs = Registers {
            int_no: 45,
            ..Registers::default()
        };
        dispatch(&mut regs);
        assert_eq!(SEEN_VECTOR.load(Ordering::SeqCst), 45);
        // Handlers may mutate the frame that will be restored on return.
        assert_eq!(regs.eax, 0x1234);
    }

    #[test]
    fn registration_overwrites_previous_handler() {
        static SECOND_RAN: AtomicU32 = AtomicU32::new(0);
        fn first(regs: &mut Registers) {
            regs.ebx = 1;
        }
        fn second(_regs: &mut Registers) {
            SECOND_RAN.store(1, Ordering::SeqCst);
        }

        register_handler(46, first);
        register_handler(46, second);
        let mut regs = Registers {
            int_no: 46,
            ..Registers::default()
        };
        dispatch(&mut regs);
        assert_eq!(SECOND_RAN.load(Ordering::SeqCst), 1);
        // The replaced handler never ran.
        assert_eq!(regs.ebx, 0);
    }

    #[test]
    fn unregistered_irq_is_acknowledged_and_ignored() {
        let mut regs = Registers {
            int_no: 47,
            ..Registers::default()
        };
        // Must not panic: IRQs without handlers are EOI'd and dropped.
        dispatch(&mut regs);
    }

    #[test]
    #[should_panic(expected = "unhandled exception")]
    fn unregistered_exception_panics() {
        let mut regs = Registers {
            int_no: 6,
            ..Registers::default()
        };
        dispatch(&mut regs);
    }
}
