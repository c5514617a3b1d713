//! Memory management
//!
//! Three allocators cooperate here, brought up in order: the early bump
//! allocator (one-way, identity-mapped, serves the frame bitmap and all
//! page tables), the physical frame allocator (bitmap over 4 KiB frames),
//! and the kernel heap (freelist inside a fixed 4 MiB virtual arena).

pub mod early;
pub mod frame_allocator;
pub mod heap;
pub mod paging;
pub mod user_validation;

/// Size of one page / frame.
pub const PAGE_SIZE: usize = 4096;

/// Everything at or above this address belongs to the kernel.
pub const KERNEL_VIRTUAL_BASE: usize = 0xC000_0000;

/// Start of the kernel heap arena.
pub const KERNEL_HEAP_START: usize = 0xC040_0000;

/// Size of the kernel heap arena (4 MiB).
pub const KERNEL_HEAP_SIZE: usize = 0x0040_0000;

/// Whether `addr` lies in the kernel half of the address space.
pub fn is_kernel_address(addr: usize) -> bool {
    addr >= KERNEL_VIRTUAL_BASE
}

pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Bring up all of memory management. `mem_size` is the amount of physical
/// memory to manage.
///
/// Order matters: the bump allocator must exist before the bitmap can be
/// placed, the bitmap before paging can reserve frames, and paging must be
/// live before the heap arena has backing to initialize against.
#[cfg(target_os = "none")]
pub fn init(mem_size: usize) {
    extern "C" {
        static kernel_end: u8;
    }

    // SAFETY: `kernel_end` is provided by the linker script as the first
    // address past the kernel image; only its address is taken.
    let image_end = unsafe { &kernel_end as *const u8 as usize };
    early::init(image_end);

    let total_frames = mem_size / PAGE_SIZE;
    let bitmap_words = total_frames.div_ceil(32);
    let bitmap_bytes = bitmap_words * core::mem::size_of::<u32>();
    let bitmap_addr = heap::alloc_aligned(bitmap_bytes);
    // SAFETY: the bitmap region was just bump-allocated and is exclusively
    // owned; bump allocations live for the kernel's lifetime. Zeroing makes
    // the bytes a valid [u32].
    let bitmap = unsafe {
        core::ptr::write_bytes(bitmap_addr as *mut u8, 0, bitmap_bytes);
        core::slice::from_raw_parts_mut(bitmap_addr as *mut u32, bitmap_words)
    };
    frame_allocator::init(bitmap, total_frames);

    paging::init();

    // SAFETY: paging::init mapped [KERNEL_HEAP_START, +KERNEL_HEAP_SIZE) to
    // fresh frames; the arena is unused until this point.
    unsafe {
        crate::ALLOCATOR.init(KERNEL_HEAP_START, KERNEL_HEAP_SIZE);
    }

    log::info!(
        "mm: {} MiB managed, {} frames, heap {} KiB at {:#010x}",
        mem_size / (1024 * 1024),
        total_frames,
        KERNEL_HEAP_SIZE / 1024,
        KERNEL_HEAP_START
    );
}
