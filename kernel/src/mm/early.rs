//! Early bump allocator
//!
//! Page tables must exist before the heap that would hold them can be
//! mapped, so the kernel carries a one-way bump allocator starting just
//! past its own image. It stays in service after bring-up for page-table
//! creation; tables live for the kernel's lifetime and are never freed.
//!
//! The bump region sits inside the identity-mapped first 4 MiB, so the
//! returned address doubles as the physical address.

use spin::Mutex;

use super::{align_up, PAGE_SIZE};

pub struct BumpAllocator {
    next: usize,
}

impl BumpAllocator {
    pub const fn new(start: usize) -> Self {
        Self { next: start }
    }

    /// Hand out `size` bytes with no particular alignment.
    pub fn alloc(&mut self, size: usize) -> usize {
        let addr = self.next;
        self.next += size;
        addr
    }

    /// Hand out `size` bytes starting on a page boundary.
    pub fn alloc_aligned(&mut self, size: usize) -> usize {
        self.next = align_up(self.next, PAGE_SIZE);
        self.alloc(size)
    }

    /// First address not yet handed out.
    pub fn next_free(&self) -> usize {
        self.next
    }
}

static EARLY: Mutex<Option<BumpAllocator>> = Mutex::new(None);

/// Start bump allocation at `start` (the end of the kernel image).
pub fn init(start: usize) {
    *EARLY.lock() = Some(BumpAllocator::new(start));
}

pub fn is_initialized() -> bool {
    EARLY.lock().is_some()
}

/// Bump-allocate `size` bytes.
pub fn alloc(size: usize) -> usize {
    EARLY
        .lock()
        .as_mut()
        .expect("early allocator not initialized")
        .alloc(size)
}

/// Bump-allocate `size` page-aligned bytes. Returns `(virtual, physical)`;
/// the two are equal because the bump region is identity-mapped.
pub fn alloc_aligned(size: usize) -> (usize, usize) {
    let addr = EARLY
        .lock()
        .as_mut()
        .expect("early allocator not initialized")
        .alloc_aligned(size);
    (addr, addr)
}

/// First address the allocator has not handed out yet. Everything below it
/// (and above the image base) must be treated as occupied.
pub fn next_free() -> usize {
    EARLY
        .lock()
        .as_ref()
        .expect("early allocator not initialized")
        .next_free()
}

/// Point the bump allocator at a leaked host buffer so paging tests can
/// create page tables. Idempotent; every test shares one region.
#[cfg(all(test, not(target_os = "none")))]
pub fn init_for_tests() {
    use spin::Once;

    static ONCE: Once<()> = Once::new();
    ONCE.call_once(|| {
        let layout = core::alloc::Layout::from_size_align(4 * 1024 * 1024, PAGE_SIZE).unwrap();
        // SAFETY: a fresh allocation, deliberately leaked; the bump
        // allocator becomes its sole owner.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) } as usize;
        assert!(base != 0, "test arena allocation failed");
        init(base);
    });
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn bump_advances_and_aligns() {
        let mut bump = BumpAllocator::new(0x10_0020);
        let a = bump.alloc(16);
        let b = bump.alloc(8);
        assert_eq!(a, 0x10_0020);
        assert_eq!(b, 0x10_0030);
        let c = bump.alloc_aligned(PAGE_SIZE);
        assert_eq!(c % PAGE_SIZE, 0);
        assert!(c >= b + 8);
        assert_eq!(bump.next_free(), c + PAGE_SIZE);
    }
}
