//! Interrupt Descriptor Table and trampolines
//!
//! 256 gates. Vectors 0..32 are CPU exceptions, 32..48 the remapped PIC
//! lines, and 128 the system-call gate (the only descriptor reachable from
//! ring 3). Each installed vector gets a tiny asm trampoline that pushes
//! its number (plus a dummy error code when the CPU does not supply one)
//! and funnels into a common stub. The stub materializes a [`Registers`]
//! frame and calls `interrupt_dispatch` in the `irq` module.

use spin::Mutex;

use super::pic;

/// Gate flags: present, 32-bit interrupt gate, DPL 0.
pub const RING0_INTERRUPT_GATE: u8 = 0x8E;
/// Gate flags: present, 32-bit interrupt gate, DPL 3 (system-call gate).
pub const RING3_INTERRUPT_GATE: u8 = 0xEE;

/// The register frame a trampoline saves on entry, in stack order.
///
/// `ds` is pushed last (lowest address); `useresp`/`ss` are only valid when
/// the interrupt crossed from ring 3.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

/// One IDT gate in hardware layout.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct IdtEntry {
    base_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    base_high: u16,
}

impl IdtEntry {
    pub const fn missing() -> Self {
        Self {
            base_low: 0,
            selector: 0,
            zero: 0,
            flags: 0,
            base_high: 0,
        }
    }

    pub fn new(base: u32, selector: u16, flags: u8) -> Self {
        Self {
            base_low: (base & 0xFFFF) as u16,
            selector,
            zero: 0,
            flags,
            base_high: ((base >> 16) & 0xFFFF) as u16,
        }
    }

    pub fn base_low(&self) -> u16 {
        self.base_low
    }

    pub fn base_high(&self) -> u16 {
        self.base_high
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }
}

static IDT: Mutex<[IdtEntry; 256]> = Mutex::new([IdtEntry::missing(); 256]);

/// Install one gate. Overwrites whatever was there.
pub fn set_gate(n: u8, base: usize, selector: u16, flags: u8) {
    IDT.lock()[n as usize] = IdtEntry::new(base as u32, selector, flags);
}

/// Zero the table, remap the PIC, install the trampolines, and load IDTR.
pub fn init() {
    {
        let mut idt = IDT.lock();
        *idt = [IdtEntry::missing(); 256];
    }
    crate::irq::clear_handlers();

    pic::remap();

    #[cfg(target_arch = "x86")]
    install_trampolines();

    #[cfg(target_arch = "x86")]
    load();

    log::info!(
        "idt: exceptions 0..32, irqs 32..48, syscall gate {}",
        crate::syscall::SYSCALL_VECTOR
    );
}

#[cfg(target_arch = "x86")]
fn load() {
    use core::mem::size_of;

    use super::DescriptorTablePointer;

    let idt = IDT.lock();
    let pointer = DescriptorTablePointer {
        limit: (size_of::<IdtEntry>() * 256 - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    // SAFETY: the pointer references the fully populated static table; its
    // address stays valid for the kernel's lifetime.
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

// The CPU pushes an error code for vectors 8, 10..=14 and 17; every other
// trampoline pushes a dummy zero so the frame layout is uniform.

#[cfg(target_arch = "x86")]
macro_rules! trampoline_no_error_code {
    ($vector:literal, $name:ident) => {
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "push 0\n",
            "push ",
            $vector,
            "\n",
            "jmp interrupt_common\n",
        ));
        extern "C" {
            fn $name();
        }
    };
}

#[cfg(target_arch = "x86")]
macro_rules! trampoline_error_code {
    ($vector:literal, $name:ident) => {
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "push ",
            $vector,
            "\n",
            "jmp interrupt_common\n",
        ));
        extern "C" {
            fn $name();
        }
    };
}

// Common stub: save the register frame, switch to kernel data segments,
// dispatch, restore, drop vector + error code, return.
#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    r#"
.global interrupt_common
interrupt_common:
    pusha
    mov ax, ds
    push eax
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call interrupt_dispatch
    add esp, 4
    pop eax
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    popa
    add esp, 8
    iretd
"#
);

#[cfg(target_arch = "x86")]
trampoline_no_error_code!(0, isr0);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(1, isr1);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(2, isr2);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(3, isr3);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(4, isr4);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(5, isr5);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(6, isr6);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(7, isr7);
#[cfg(target_arch = "x86")]
trampoline_error_code!(8, isr8);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(9, isr9);
#[cfg(target_arch = "x86")]
trampoline_error_code!(10, isr10);
#[cfg(target_arch = "x86")]
trampoline_error_code!(11, isr11);
#[cfg(target_arch = "x86")]
trampoline_error_code!(12, isr12);
#[cfg(target_arch = "x86")]
trampoline_error_code!(13, isr13);
#[cfg(target_arch = "x86")]
trampoline_error_code!(14, isr14);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(15, isr15);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(16, isr16);
#[cfg(target_arch = "x86")]
trampoline_error_code!(17, isr17);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(18, isr18);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(19, isr19);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(20, isr20);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(21, isr21);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(22, isr22);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(23, isr23);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(24, isr24);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(25, isr25);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(26, isr26);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(27, isr27);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(28, isr28);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(29, isr29);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(30, isr30);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(31, isr31);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(32, irq0);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(33, irq1);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(34, irq2);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(35, irq3);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(36, irq4);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(37, irq5);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(38, irq6);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(39, irq7);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(40, irq8);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(41, irq9);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(42, irq10);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(43, irq11);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(44, irq12);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(45, irq13);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(46, irq14);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(47, irq15);
#[cfg(target_arch = "x86")]
trampoline_no_error_code!(128, isr128);

#[cfg(target_arch = "x86")]
fn install_trampolines() {
    use super::gdt::KERNEL_CODE_SELECTOR;

    let exceptions: [unsafe extern "C" fn(); 32] = [
        isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
        isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
        isr27, isr28, isr29, isr30, isr31,
    ];
    let irqs: [unsafe extern "C" fn(); 16] = [
        irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
        irq14, irq15,
    ];

    for (vector, entry) in exceptions.iter().enumerate() {
        set_gate(
            vector as u8,
            *entry as usize,
            KERNEL_CODE_SELECTOR,
            RING0_INTERRUPT_GATE,
        );
    }
    for (offset, entry) in irqs.iter().enumerate() {
        set_gate(
            32 + offset as u8,
            *entry as usize,
            KERNEL_CODE_SELECTOR,
            RING0_INTERRUPT_GATE,
        );
    }
    // User code may invoke the system-call gate directly.
    set_gate(
        crate::syscall::SYSCALL_VECTOR,
        isr128 as unsafe extern "C" fn() as usize,
        KERNEL_CODE_SELECTOR,
        RING3_INTERRUPT_GATE,
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_packs_handler_address() {
        let entry = IdtEntry::new(0x1234_5678, 0x08, RING0_INTERRUPT_GATE);
        assert_eq!(entry.base_low(), 0x5678);
        assert_eq!(entry.base_high(), 0x1234);
        assert_eq!(entry.selector(), 0x08);
        assert_eq!(entry.flags(), 0x8E);
    }

    #[test]
    fn syscall_gate_flags_allow_ring3() {
        // DPL bits 5..6 must be 3 for the gate to be reachable from user code.
        assert_eq!((RING3_INTERRUPT_GATE >> 5) & 3, 3);
        assert_eq!((RING0_INTERRUPT_GATE >> 5) & 3, 0);
    }
}
