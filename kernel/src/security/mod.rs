//! Privilege enforcement, stack canary, and input sanitization

pub mod audit;
pub mod random;

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Once;

pub const RING_KERNEL: u8 = 0;
pub const RING_USER: u8 = 3;

static STACK_CANARY: AtomicU32 = AtomicU32::new(0);
static INIT: Once<()> = Once::new();

/// Seed the RNG, draw the canary, and clear the audit log. Idempotent.
pub fn init() {
    INIT.call_once(|| {
        random::init();
        STACK_CANARY.store(random::next_u32(), Ordering::SeqCst);
        audit::init();
        log::info!("security: canary seeded, audit log ready");
    });
}

/// The process-wide canary value.
pub fn canary() -> u32 {
    STACK_CANARY.load(Ordering::SeqCst)
}

/// Compare a recovered canary against the stored one. A mismatch means a
/// stack frame was overwritten; that is unrecoverable.
pub fn check_canary(value: u32) -> bool {
    let expected = canary();
    if value != expected {
        audit::log_event(audit::AuditKind::StackSmash, 0, [value, expected, 0, 0]);
        panic!("stack smashing detected");
    }
    true
}

/// The ring the CPU is executing in, from the code-segment selector.
pub fn current_ring() -> u8 {
    (crate::arch::x86::code_segment() & 0x3) as u8
}

/// True iff the current ring is at least as privileged as `required`
/// (numerically lower ring means more privilege).
pub fn validate_privilege(required: u8) -> bool {
    current_ring() <= required
}

/// Printable ASCII plus the whitespace controls the console renders.
pub fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte) || byte == b'\n' || byte == b'\r' || byte == b'\t'
}

/// Replace every non-printable byte with `?`, stopping at the first NUL.
/// A string that fills the buffer is NUL-terminated in place.
pub fn sanitize_string(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    let mut len = 0;
    while len < buf.len() && buf[len] != 0 {
        if !is_printable(buf[len]) {
            buf[len] = b'?';
        }
        len += 1;
    }
    if len >= buf.len() {
        let last = buf.len() - 1;
        buf[last] = 0;
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn privilege_is_monotonic_in_required_ring() {
        // Host builds report ring 0: the most privileged caller passes
        // every requirement.
        assert_eq!(current_ring(), RING_KERNEL);
        assert!(validate_privilege(RING_KERNEL));
        assert!(validate_privilege(1));
        assert!(validate_privilege(RING_USER));
    }

    #[test]
    fn matching_canary_passes() {
        init();
        assert!(check_canary(canary()));
    }

    #[test]
    #[should_panic(expected = "stack smashing detected")]
    fn mismatched_canary_is_fatal() {
        init();
        check_canary(canary() ^ 0xFFFF_FFFF);
    }

    #[test]
    fn sanitize_replaces_unprintable_bytes() {
        let mut buf = *b"ab\x01c\x1bd\x7f\0trailing";
        sanitize_string(&mut buf);
        assert_eq!(&buf[..8], b"ab?c?d?\0");
        // Bytes past the NUL are untouched.
        assert_eq!(&buf[8..], b"trailing");
    }

    #[test]
    fn sanitize_keeps_whitespace_controls() {
        let mut buf = *b"a\tb\nc\rd\0";
        sanitize_string(&mut buf);
        assert_eq!(&buf, b"a\tb\nc\rd\0");
    }

    #[test]
    fn sanitize_terminates_unterminated_buffer() {
        let mut buf = *b"abcdefgh";
        sanitize_string(&mut buf);
        assert_eq!(&buf[..7], b"abcdefg");
        assert_eq!(buf[7], 0);
    }
}
