//! Security audit log
//!
//! A 1024-entry overwrite ring of security-relevant events, each stamped by
//! a single monotonic tick counter. Writers never block on anything except
//! the ring's own lock; the panic path uses a non-blocking variant so a
//! panic inside a logging call cannot deadlock.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::collections::BoundedRing;

const AUDIT_LOG_SIZE: usize = 1024;
const PRINT_TAIL: usize = 20;

/// Kinds of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Syscall,
    PrivilegeViolation,
    MemoryViolation,
    InvalidPointer,
    StackSmash,
    ProcessCreate,
    ProcessTerminate,
    RateLimitExceeded,
    KernelPanic,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Syscall => "SYSCALL",
            AuditKind::PrivilegeViolation => "PRIVILEGE_VIOLATION",
            AuditKind::MemoryViolation => "MEMORY_VIOLATION",
            AuditKind::InvalidPointer => "INVALID_POINTER",
            AuditKind::StackSmash => "STACK_SMASH",
            AuditKind::ProcessCreate => "PROCESS_CREATE",
            AuditKind::ProcessTerminate => "PROCESS_TERMINATE",
            AuditKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AuditKind::KernelPanic => "KERNEL_PANIC",
        }
    }
}

/// One logged event.
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent {
    pub tick: u32,
    pub kind: AuditKind,
    pub pid: u32,
    pub data: [u32; 4],
}

static AUDIT_LOG: Mutex<BoundedRing<AuditEvent, AUDIT_LOG_SIZE>> =
    Mutex::new(BoundedRing::new());
// Ticks start at 1 so a zero tick can never be mistaken for a real entry.
static NEXT_TICK: AtomicU32 = AtomicU32::new(1);

/// Reset the log.
pub fn init() {
    AUDIT_LOG.lock().clear();
}

fn stamp(kind: AuditKind, pid: u32, data: [u32; 4]) -> AuditEvent {
    AuditEvent {
        tick: NEXT_TICK.fetch_add(1, Ordering::SeqCst),
        kind,
        pid,
        data,
    }
}

/// Record an event. `pid` is 0 when no process is attributable.
pub fn log_event(kind: AuditKind, pid: u32, data: [u32; 4]) {
    let event = stamp(kind, pid, data);
    AUDIT_LOG.lock().push_overwrite(event);
}

/// Panic-path variant of [`log_event`]: gives up instead of blocking if the
/// log is locked, since the lock holder will never resume.
pub fn log_event_from_panic(data: [u32; 4]) {
    let event = stamp(AuditKind::KernelPanic, 0, data);
    if let Some(mut log) = AUDIT_LOG.try_lock() {
        log.push_overwrite(event);
    }
}

/// How many logged events carry `kind`.
pub fn count_events(kind: AuditKind) -> usize {
    let log = AUDIT_LOG.lock();
    log.iter_recent(AUDIT_LOG_SIZE)
        .filter(|event| event.kind == kind)
        .count()
}

/// Number of events currently retained.
pub fn len() -> usize {
    AUDIT_LOG.lock().len()
}

/// Render the most recent entries on the console.
pub fn print_log() {
    use crate::arch::x86::vga::{self, Color};

    vga::set_color(Color::LightCyan, Color::Black);
    println!("\n=== Audit Log ===");
    vga::set_color(Color::LightGray, Color::Black);

    let log = AUDIT_LOG.lock();
    let mut shown = 0;
    for event in log.iter_recent(PRINT_TAIL) {
        println!(
            "[{}] {} pid={} data: {:#010x} {:#010x} {:#010x} {:#010x}",
            event.tick,
            event.kind.as_str(),
            event.pid,
            event.data[0],
            event.data[1],
            event.data[2],
            event.data[3],
        );
        shown += 1;
    }
    if shown == 0 {
        println!("No audit events logged.");
    }
    println!();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn events_are_counted_by_kind() {
        let before = count_events(AuditKind::RateLimitExceeded);
        log_event(AuditKind::RateLimitExceeded, 7, [1, 2, 3, 4]);
        log_event(AuditKind::RateLimitExceeded, 7, [5, 6, 7, 8]);
        assert!(count_events(AuditKind::RateLimitExceeded) >= before + 2);
    }

    #[test]
    fn ticks_increase_monotonically() {
        let a = stamp(AuditKind::Syscall, 0, [0; 4]);
        let b = stamp(AuditKind::Syscall, 0, [0; 4]);
        assert!(b.tick > a.tick);
        assert!(a.tick > 0);
    }

    #[test]
    fn panic_path_logging_never_blocks() {
        // Hold the lock and log from the "panic" path; the event is
        // dropped rather than deadlocking.
        let guard = AUDIT_LOG.lock();
        log_event_from_panic([0xDEAD, 0, 0, 0]);
        drop(guard);
        // With the lock free the event lands.
        let before = count_events(AuditKind::KernelPanic);
        log_event_from_panic([0xBEEF, 0, 0, 0]);
        assert!(count_events(AuditKind::KernelPanic) >= before + 1);
    }
}
