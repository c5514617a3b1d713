//! System-call gate
//!
//! One trap vector, 128, reachable from ring 3; EAX selects the call and
//! EBX/ECX/EDX carry arguments. Every call is audited with its argument
//! registers. User pointers are validated before a single byte is touched;
//! a rejected pointer logs an audit event and the call returns with no
//! effect, indistinguishable from success to the caller.

use alloc::vec;

use crate::{
    arch::x86::{idt::Registers, vga},
    mm::user_validation::validate_user_ptr,
    process, sched, security,
    security::audit::{self, AuditKind},
};

/// Trap vector of the system-call gate.
pub const SYSCALL_VECTOR: u8 = 128;

/// Cap on a single write, matching the scratch buffer the kernel is willing
/// to allocate.
const MAX_WRITE_LEN: usize = 4096;

/// System call numbers, as found in EAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    Write = 1,
    Read = 2,
    Exit = 3,
}

impl Syscall {
    fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Syscall::Write),
            2 => Some(Syscall::Read),
            3 => Some(Syscall::Exit),
            _ => None,
        }
    }
}

/// Register the gate's handler. The IDT descriptor itself (DPL 3) is
/// installed by `idt::init`.
pub fn init() {
    crate::irq::register_handler(SYSCALL_VECTOR, syscall_handler);
    log::info!("syscall: gate registered on vector {}", SYSCALL_VECTOR);
}

/// Entry point for vector 128, with the caller's register frame.
pub fn syscall_handler(regs: &mut Registers) {
    // The gate descriptor already restricts who can reach this point;
    // re-checking the ring here is defence against a misconfigured gate.
    if !security::validate_privilege(security::RING_USER) {
        audit::log_event(
            AuditKind::PrivilegeViolation,
            process::current_pid().unwrap_or(0),
            [regs.eax, 0, 0, 0],
        );
        return;
    }

    audit::log_event(
        AuditKind::Syscall,
        process::current_pid().unwrap_or(0),
        [regs.eax, regs.ebx, regs.ecx, regs.edx],
    );

    match Syscall::from_number(regs.eax) {
        Some(Syscall::Write) => sys_write(regs.ebx as usize, regs.ecx as usize),
        Some(Syscall::Read) => sys_read(regs.ebx as usize, regs.ecx as usize),
        Some(Syscall::Exit) => sys_exit(regs.ebx),
        // Unknown numbers are a deliberate no-op.
        None => {}
    }
}

/// Write `len` bytes from user memory to the console, through a sanitized
/// kernel-side copy.
fn sys_write(buf: usize, len: usize) {
    if len > MAX_WRITE_LEN || !validate_user_ptr(buf, len) {
        audit::log_event(
            AuditKind::InvalidPointer,
            process::current_pid().unwrap_or(0),
            [buf as u32, len as u32, 0, 0],
        );
        return;
    }

    let mut scratch = vec![0u8; len + 1];
    // SAFETY: the whole range was validated as present user memory, and
    // the copy goes into a kernel buffer of at least `len` bytes.
    unsafe {
        core::ptr::copy_nonoverlapping(buf as *const u8, scratch.as_mut_ptr(), len);
    }
    security::sanitize_string(&mut scratch);

    let text_len = scratch.iter().position(|&b| b == 0).unwrap_or(len);
    vga::write_bytes(&scratch[..text_len]);
}

/// Fill a user buffer with zeroes. Placeholder semantics until there is a
/// real input source to read from.
fn sys_read(buf: usize, len: usize) {
    if !validate_user_ptr(buf, len) {
        audit::log_event(
            AuditKind::InvalidPointer,
            process::current_pid().unwrap_or(0),
            [buf as u32, len as u32, 0, 0],
        );
        return;
    }

    // SAFETY: the whole range was validated as present, user-accessible
    // memory.
    unsafe {
        core::ptr::write_bytes(buf as *mut u8, 0, len);
    }
}

/// Terminate the calling process and hand the CPU onward.
fn sys_exit(_code: u32) {
    if let Some(pid) = process::current_pid() {
        let _ = process::terminate(pid);
        // The dying context still runs on its freed stack; nothing may
        // allocate between here and the switch.
        sched::schedule();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::security::audit::count_events;

    // These tests read audit counters; serialize them so one test's events
    // never land between another's before/after samples.
    static TEST_GUARD: spin::Mutex<()> = spin::Mutex::new(());

    fn frame(eax: u32, ebx: u32, ecx: u32) -> Registers {
        Registers {
            eax,
            ebx,
            ecx,
            ..Registers::default()
        }
    }

    // Scenario: write with a kernel pointer must not reach the console and
    // must leave an INVALID_POINTER audit record.
    #[test]
    fn write_with_kernel_pointer_is_rejected_and_audited() {
        let _guard = TEST_GUARD.lock();
        let invalid_before = count_events(AuditKind::InvalidPointer);
        let syscall_before = count_events(AuditKind::Syscall);

        let mut regs = frame(Syscall::Write as u32, 0xC000_0000, 8);
        syscall_handler(&mut regs);

        assert!(count_events(AuditKind::InvalidPointer) >= invalid_before + 1);
        // The call itself is still audited.
        assert!(count_events(AuditKind::Syscall) >= syscall_before + 1);
    }

    #[test]
    fn read_with_null_pointer_is_rejected_and_audited() {
        let _guard = TEST_GUARD.lock();
        let before = count_events(AuditKind::InvalidPointer);
        let mut regs = frame(Syscall::Read as u32, 0, 64);
        syscall_handler(&mut regs);
        assert!(count_events(AuditKind::InvalidPointer) >= before + 1);
    }

    #[test]
    fn oversized_write_is_rejected() {
        let _guard = TEST_GUARD.lock();
        let before = count_events(AuditKind::InvalidPointer);
        let mut regs = frame(Syscall::Write as u32, 0x1000, (MAX_WRITE_LEN + 1) as u32);
        syscall_handler(&mut regs);
        assert!(count_events(AuditKind::InvalidPointer) >= before + 1);
    }

    #[test]
    fn unknown_syscall_is_a_silent_no_op() {
        let _guard = TEST_GUARD.lock();
        let invalid_before = count_events(AuditKind::InvalidPointer);
        let mut regs = frame(0xDEAD, 0, 0);
        syscall_handler(&mut regs);
        // Audited as a syscall, but no violation records and no panic.
        assert_eq!(count_events(AuditKind::InvalidPointer), invalid_before);
    }

    #[test]
    fn exit_terminates_the_current_process() {
        let _guard = TEST_GUARD.lock();
        fn entry() {}

        let terminated_before = count_events(AuditKind::ProcessTerminate);
        let pid = process::create(entry, 3).unwrap();
        process::PROCESS_TABLE.lock().set_current(pid).unwrap();

        let mut regs = frame(Syscall::Exit as u32, 0, 0);
        syscall_handler(&mut regs);

        assert!(count_events(AuditKind::ProcessTerminate) >= terminated_before + 1);
        assert_eq!(
            process::PROCESS_TABLE.lock().state_of(pid),
            Some(crate::process::ProcessState::Terminated)
        );
    }
}
