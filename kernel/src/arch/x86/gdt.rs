//! Global Descriptor Table and task state
//!
//! Six descriptors: null, kernel code/data, user code/data, and one TSS.
//! All four segments are flat 4 GiB views; protection comes from paging and
//! the ring bits. The TSS exists solely to publish the ring-0 stack pointer
//! for ring 3 -> ring 0 transitions; the scheduler updates it on every
//! switch via [`set_kernel_stack`].

use core::mem::size_of;

use bitflags::bitflags;
use spin::Mutex;

use super::DescriptorTablePointer;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18;
pub const USER_DATA_SELECTOR: u16 = 0x20;
pub const TSS_SELECTOR: u16 = 0x28;

bitflags! {
    /// Access byte of a segment descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GdtAccess: u8 {
        const ACCESSED   = 1;
        const READ_WRITE = 1 << 1;
        const EXECUTABLE = 1 << 3;
        const SEGMENT    = 1 << 4;
        const DPL_USER   = 3 << 5;
        const PRESENT    = 1 << 7;
    }
}

impl GdtAccess {
    /// 0x9A: present ring-0 code, readable.
    pub const KERNEL_CODE: GdtAccess = GdtAccess::PRESENT
        .union(GdtAccess::SEGMENT)
        .union(GdtAccess::EXECUTABLE)
        .union(GdtAccess::READ_WRITE);
    /// 0x92: present ring-0 data, writable.
    pub const KERNEL_DATA: GdtAccess = GdtAccess::PRESENT
        .union(GdtAccess::SEGMENT)
        .union(GdtAccess::READ_WRITE);
    /// 0xFA: present ring-3 code, readable.
    pub const USER_CODE: GdtAccess = GdtAccess::KERNEL_CODE.union(GdtAccess::DPL_USER);
    /// 0xF2: present ring-3 data, writable.
    pub const USER_DATA: GdtAccess = GdtAccess::KERNEL_DATA.union(GdtAccess::DPL_USER);
    /// 0xE9: present 32-bit TSS, reachable from ring 3.
    pub const TSS: GdtAccess = GdtAccess::PRESENT
        .union(GdtAccess::DPL_USER)
        .union(GdtAccess::EXECUTABLE)
        .union(GdtAccess::ACCESSED);
}

/// Page granularity, 32-bit operand size (high nibble of the granularity
/// byte; the low nibble carries limit bits 16..19).
pub const GRANULARITY_FLAT: u8 = 0xC0;

/// One GDT descriptor in hardware layout.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    pub const fn missing() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    pub fn new(base: u32, limit: u32, access: GdtAccess, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access: access.bits(),
            granularity: (((limit >> 16) & 0x0F) as u8) | (granularity & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    pub fn access(&self) -> u8 {
        self.access
    }

    pub fn granularity(&self) -> u8 {
        self.granularity
    }

    pub fn limit_low(&self) -> u16 {
        self.limit_low
    }

    pub fn base_low(&self) -> u16 {
        self.base_low
    }
}

/// 32-bit task state segment. Only `ss0`/`esp0` and the segment registers
/// matter here; the hardware task-switch fields stay zero.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct TaskStateSegment {
    prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    pub const fn new() -> Self {
        // SAFETY: the TSS is a plain-old-data hardware structure; all-zero
        // is a valid (inactive) state.
        unsafe { core::mem::zeroed() }
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

static GDT: Mutex<[GdtEntry; 6]> = Mutex::new([GdtEntry::missing(); 6]);
static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

/// Build and load the GDT and TSS.
pub fn init() {
    let tss_base = {
        let mut tss = TSS.lock();
        *tss = TaskStateSegment::new();
        tss.ss0 = KERNEL_DATA_SELECTOR as u32;
        tss.esp0 = 0;
        // Ring-3 visible selectors carry RPL 3 so iret back to user mode
        // passes the privilege checks.
        tss.cs = (KERNEL_CODE_SELECTOR | 3) as u32;
        let data = (KERNEL_DATA_SELECTOR | 3) as u32;
        tss.ss = data;
        tss.ds = data;
        tss.es = data;
        tss.fs = data;
        tss.gs = data;
        &*tss as *const TaskStateSegment as usize
    };

    let mut gdt = GDT.lock();
    gdt[0] = GdtEntry::missing();
    gdt[1] = GdtEntry::new(0, 0xFFFFF, GdtAccess::KERNEL_CODE, GRANULARITY_FLAT);
    gdt[2] = GdtEntry::new(0, 0xFFFFF, GdtAccess::KERNEL_DATA, GRANULARITY_FLAT);
    gdt[3] = GdtEntry::new(0, 0xFFFFF, GdtAccess::USER_CODE, GRANULARITY_FLAT);
    gdt[4] = GdtEntry::new(0, 0xFFFFF, GdtAccess::USER_DATA, GRANULARITY_FLAT);
    // The TSS descriptor is byte-granular with an exact limit.
    gdt[5] = GdtEntry::new(
        tss_base as u32,
        (size_of::<TaskStateSegment>() - 1) as u32,
        GdtAccess::TSS,
        0x00,
    );

    let pointer = DescriptorTablePointer {
        limit: (size_of::<GdtEntry>() * 6 - 1) as u16,
        base: gdt.as_ptr() as u32,
    };

    #[cfg(target_arch = "x86")]
    // SAFETY: the table behind `pointer` lives in a static and contains the
    // flat descriptors built above; reloading the segment registers against
    // it is the documented lgdt/ltr sequence.
    unsafe {
        load(&pointer);
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = pointer;

    log::info!("gdt: 6 descriptors loaded, tss at {:#010x}", tss_base);
}

#[cfg(target_arch = "x86")]
unsafe fn load(pointer: &DescriptorTablePointer) {
    // SAFETY: per the caller's contract the pointer references a valid GDT.
    // CS is reloaded with a far return; the data segments directly.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov eax, {data}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {code}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) pointer,
            code = const KERNEL_CODE_SELECTOR as i32,
            data = const KERNEL_DATA_SELECTOR as i32,
            out("eax") _,
        );
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) TSS_SELECTOR | 3,
            options(nomem, nostack, preserves_flags),
        );
    }
}

/// Update the ring-0 stack pointer in the TSS.
///
/// Called by the scheduler before handing the CPU to the next process so
/// interrupts and syscalls from ring 3 land on that process's kernel stack.
pub fn set_kernel_stack(stack_top: usize) {
    let mut tss = TSS.lock();
    tss.ss0 = KERNEL_DATA_SELECTOR as u32;
    tss.esp0 = stack_top as u32;
}

/// Read the ring-0 stack pointer currently published in the TSS.
pub fn kernel_stack() -> usize {
    TSS.lock().esp0 as usize
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn access_bytes_match_hardware_encoding() {
        assert_eq!(GdtAccess::KERNEL_CODE.bits(), 0x9A);
        assert_eq!(GdtAccess::KERNEL_DATA.bits(), 0x92);
        assert_eq!(GdtAccess::USER_CODE.bits(), 0xFA);
        assert_eq!(GdtAccess::USER_DATA.bits(), 0xF2);
        assert_eq!(GdtAccess::TSS.bits(), 0xE9);
    }

    #[test]
    fn entry_packs_base_and_limit() {
        let entry = GdtEntry::new(0x1234_5678, 0xFFFFF, GdtAccess::KERNEL_CODE, GRANULARITY_FLAT);
        assert_eq!(entry.limit_low(), 0xFFFF);
        assert_eq!(entry.base_low(), 0x5678);
        assert_eq!(entry.access(), 0x9A);
        // Low nibble: limit bits 16..19; high nibble: 4K granularity + 32-bit.
        assert_eq!(entry.granularity(), 0xCF);
    }

    #[test]
    fn kernel_stack_round_trips_through_tss() {
        set_kernel_stack(0x0030_0000);
        assert_eq!(kernel_stack(), 0x0030_0000);
    }
}
