//! Architecture support
//!
//! FerriteOS targets 32-bit x86 only. The module still compiles on other
//! hosts so the allocator, paging, and scheduler logic can be unit tested;
//! every instruction-level operation is gated on `target_arch = "x86"` with
//! a benign host fallback.

pub mod x86;
