//! Cooperative round-robin scheduler
//!
//! Single CPU, no preemption: the CPU changes hands only at `yield_now` (or
//! when a process exits and the syscall layer calls [`schedule`]). A switch
//! pops the ready-queue head, re-queues the yielding process at the tail,
//! installs the next process's address space, publishes its kernel stack in
//! the TSS, and only then swaps register state.
//!
//! The first time a process is dispatched its kernel stack is primed with
//! its entry point and zeroed callee-saved registers, after which `eip` in
//! the record is cleared; from then on the live context is whatever the
//! switch routine saved on that stack.

use crate::{
    arch::x86::gdt,
    mm::paging,
    process::{Process, ProcessState, ProcessTable, PROCESS_TABLE},
};

/// The raw handoff computed under the table lock: where to save the old
/// stack pointer and which stack pointer to resume.
#[cfg_attr(not(all(target_arch = "x86", target_os = "none")), allow(dead_code))]
struct Switch {
    save_esp_to: *mut usize,
    resume_esp: usize,
}

impl ProcessTable {
    /// Voluntarily give up the CPU. A no-op without a current process or
    /// with an empty ready queue.
    pub fn yield_current(&mut self) -> bool {
        self.prepare_yield().is_some()
    }

    /// Yield bookkeeping: mark the runner Ready and pick a successor. The
    /// returned handoff is performed outside the table lock.
    fn prepare_yield(&mut self) -> Option<Switch> {
        let current = self.current_index()?;
        self.ready_head_index()?;
        // A process terminated out from under us stays Terminated and is
        // simply not requeued.
        if self.slot(current).state == ProcessState::Running {
            self.slot_mut(current).state = ProcessState::Ready;
        }
        self.schedule_next()
    }

    /// Hand the CPU to the ready-queue head. The yielding process, if still
    /// Ready, goes to the tail, so successive yields rotate fairly.
    fn schedule_next(&mut self) -> Option<Switch> {
        let next = self.pop_ready_head()?;

        let previous = self.current_index();
        if let Some(previous) = previous {
            if previous != next && self.slot(previous).state == ProcessState::Ready {
                self.requeue_tail(previous);
            }
        }

        self.set_current_index(next);
        self.slot_mut(next).state = ProcessState::Running;
        prime_first_dispatch(self.slot_mut(next));

        // Install the address space and the privileged stack before any
        // ring transition can use them.
        let directory = self.slot(next).page_directory;
        if !directory.is_null() {
            paging::switch_directory(directory);
            gdt::set_kernel_stack(self.slot(next).kernel_stack_top);
        }

        let resume_esp = self.slot(next).esp;
        let save_esp_to = previous
            .filter(|&previous| previous != next)
            .map(|previous| &mut self.slot_mut(previous).esp as *mut usize);

        save_esp_to.map(|save_esp_to| Switch {
            save_esp_to,
            resume_esp,
        })
    }
}

/// Lay out an initial stack frame for a process that has never run: the
/// entry point as the return address under four zeroed callee-saved
/// registers, matching what `switch_context` pops.
fn prime_first_dispatch(proc: &mut Process) {
    if proc.eip == 0 {
        return;
    }
    let mut esp = proc.kernel_stack_top;
    // SAFETY: the kernel stack is a live heap allocation owned by this
    // record; all stores stay inside its top five words.
    unsafe {
        esp -= core::mem::size_of::<usize>();
        (esp as *mut usize).write(proc.eip);
        for _ in 0..4 {
            esp -= core::mem::size_of::<usize>();
            (esp as *mut usize).write(0);
        }
    }
    proc.esp = esp;
    proc.eip = 0;
}

/// Yield the CPU from the running process.
pub fn yield_now() {
    let switch = PROCESS_TABLE.lock().prepare_yield();
    perform_switch(switch);
}

/// Dispatch the next ready process without requeueing the current one
/// (used after the running process terminates itself).
pub fn schedule() {
    let switch = {
        let mut table = PROCESS_TABLE.lock();
        table.schedule_next()
    };
    perform_switch(switch);
}

fn perform_switch(switch: Option<Switch>) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    if let Some(switch) = switch {
        // SAFETY: the pointers were derived from the static process table
        // under its lock; the lock is released so the resumed context can
        // take it again. Single CPU, so nobody else touches the slots
        // while the registers swap.
        unsafe {
            switch_context(switch.save_esp_to, switch.resume_esp);
        }
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = switch;
}

// fn switch_context(save_esp_to: *mut usize, resume_esp: usize)
//
// Saves the callee-saved registers and stack pointer of the calling
// context, then resumes the target context by restoring its stack pointer
// and popping the same frame. `ret` lands either in a previous
// switch_context call or on a primed entry point.
#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.global switch_context
switch_context:
    mov eax, [esp + 4]
    mov edx, [esp + 8]
    push ebp
    push ebx
    push esi
    push edi
    mov [eax], esp
    mov esp, edx
    pop edi
    pop esi
    pop ebx
    pop ebp
    ret
"#
);

#[cfg(all(target_arch = "x86", target_os = "none"))]
extern "C" {
    fn switch_context(save_esp_to: *mut usize, resume_esp: usize);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use crate::process::{ProcessState, ProcessTable};

    fn entry() {}

    // Scenario: three processes, P1 running; two yields walk the CPU
    // through P2 and P3 while the preempted process goes to the tail.
    #[test]
    fn yields_rotate_round_robin() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        let p3 = table.create(entry, 3).unwrap();
        table.set_current(p1).unwrap();

        table.yield_current();
        assert_eq!(table.current_pid(), Some(p2));
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p3, p1], "preempted process joins the tail");

        table.yield_current();
        assert_eq!(table.current_pid(), Some(p3));
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p1, p2]);
    }

    #[test]
    fn yield_without_current_process_is_a_no_op() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        assert!(!table.yield_current());
        assert_eq!(table.current_pid(), None);
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p1]);
    }

    #[test]
    fn yield_with_empty_queue_keeps_running() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        table.set_current(p1).unwrap();
        assert!(!table.yield_current());
        assert_eq!(table.current_pid(), Some(p1));
        assert_eq!(table.state_of(p1), Some(ProcessState::Running));
    }

    #[test]
    fn scheduled_process_becomes_running() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        table.set_current(p1).unwrap();
        table.yield_current();
        assert_eq!(table.state_of(p2), Some(ProcessState::Running));
        assert_eq!(table.state_of(p1), Some(ProcessState::Ready));
    }

    #[test]
    fn terminated_current_is_not_requeued() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        table.set_current(p1).unwrap();
        table.terminate(p1).unwrap();
        table.yield_current();
        assert_eq!(table.current_pid(), Some(p2));
        assert_eq!(table.state_of(p1), Some(ProcessState::Terminated));
        // The dead process must not reappear in the queue.
        assert_eq!(table.ready_pids().count(), 0);
    }

    #[test]
    fn first_dispatch_primes_the_kernel_stack() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 0).unwrap();
        let p2 = table.create(entry, 0).unwrap();
        table.set_current(p1).unwrap();
        table.yield_current();
        let _ = p2;
        let current = table.current().unwrap();
        // eip was consumed into the primed stack frame.
        assert_eq!(current.eip, 0);
        // Return address plus four callee-saved registers.
        assert_eq!(
            current.esp,
            current.kernel_stack_top - 5 * core::mem::size_of::<usize>()
        );
        // SAFETY: reading back the primed return address from the stack
        // this table owns.
        let ret = unsafe { *((current.kernel_stack_top - core::mem::size_of::<usize>()) as *const usize) };
        assert_eq!(ret, entry as fn() as usize);
    }
}
