//! Process table
//!
//! A fixed 32-slot table. A slot with `pid == 0` has never been used; a
//! Terminated slot can be recycled. Pids increase monotonically from 1 and
//! are never reused. Each process owns a 4 KiB kernel stack allocated from
//! the heap; the record stores the allocation base alongside the stack top
//! so terminate can free exactly what create allocated.
//!
//! Ready processes are threaded through the table by slot index, head plus
//! tail order, giving the scheduler in `crate::sched` a FIFO queue without
//! touching the heap.

use core::alloc::Layout;

use spin::Mutex;

use crate::{
    error::KernelError,
    mm::paging::{self, PageDirectory},
    security::audit::{self, AuditKind},
};

pub const MAX_PROCESSES: usize = 32;
pub const KERNEL_STACK_SIZE: usize = 4096;

// SAFETY: size is nonzero and the alignment is a power of two.
const STACK_LAYOUT: Layout =
    unsafe { Layout::from_size_align_unchecked(KERNEL_STACK_SIZE, 4) };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// One process record.
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pub pid: u32,
    pub esp: usize,
    pub ebp: usize,
    /// Entry point before the first dispatch; 0 once the context lives on
    /// the kernel stack.
    pub eip: usize,
    pub page_directory: *mut PageDirectory,
    pub state: ProcessState,
    pub privilege_level: u8,
    /// Heap base of the kernel stack, kept so terminate frees the exact
    /// allocation.
    pub stack_base: *mut u8,
    /// One past the end of the kernel stack; published in the TSS while
    /// the process runs.
    pub kernel_stack_top: usize,
    /// Ready-queue link (slot index).
    pub next: Option<usize>,
}

// SAFETY: the raw pointers reference the shared kernel directory and a
// heap allocation owned by this record; there is a single CPU and a single
// kernel thread of control, and the table Mutex serializes all access.
unsafe impl Send for Process {}

impl Process {
    const fn vacant() -> Self {
        Self {
            pid: 0,
            esp: 0,
            ebp: 0,
            eip: 0,
            page_directory: core::ptr::null_mut(),
            state: ProcessState::Terminated,
            privilege_level: 0,
            stack_base: core::ptr::null_mut(),
            kernel_stack_top: 0,
            next: None,
        }
    }
}

/// Fixed-capacity table plus the scheduler's queue state.
pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
    current: Option<usize>,
    ready_head: Option<usize>,
    next_pid: u32,
}

impl ProcessTable {
    pub const fn new() -> Self {
        const VACANT: Process = Process::vacant();
        Self {
            slots: [VACANT; MAX_PROCESSES],
            current: None,
            ready_head: None,
            next_pid: 1,
        }
    }

    fn find_slot(&self, pid: u32) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        self.slots.iter().position(|slot| slot.pid == pid)
    }

    /// Append a slot at the ready-queue tail.
    fn enqueue_ready(&mut self, index: usize) {
        self.slots[index].next = None;
        match self.ready_head {
            None => self.ready_head = Some(index),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.slots[tail].next {
                    tail = next;
                }
                self.slots[tail].next = Some(index);
            }
        }
    }

    /// Unlink a slot from the ready queue, wherever it sits.
    fn dequeue(&mut self, index: usize) {
        if self.ready_head == Some(index) {
            self.ready_head = self.slots[index].next.take();
            return;
        }
        let mut cursor = self.ready_head;
        while let Some(at) = cursor {
            if self.slots[at].next == Some(index) {
                self.slots[at].next = self.slots[index].next.take();
                return;
            }
            cursor = self.slots[at].next;
        }
    }

    /// Create a process and enqueue it as Ready. Fails only when every
    /// slot holds a live process.
    pub fn create(&mut self, entry_point: fn(), privilege_level: u8) -> Result<u32, KernelError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.pid == 0 || slot.state == ProcessState::Terminated)
            .ok_or(KernelError::ProcessTableFull)?;

        let pid = self.next_pid;
        self.next_pid += 1;

        // SAFETY: STACK_LAYOUT is valid; exhaustion panics inside the
        // kernel heap rather than returning null on bare metal.
        let stack_base = unsafe { alloc::alloc::alloc(STACK_LAYOUT) };
        assert!(!stack_base.is_null(), "kernel stack allocation failed");
        let stack_top = stack_base as usize + KERNEL_STACK_SIZE;

        // The core shares the kernel directory; a full implementation
        // would clone it per process.
        let directory = paging::kernel_directory().unwrap_or(core::ptr::null_mut());

        self.slots[index] = Process {
            pid,
            esp: stack_top,
            ebp: stack_top,
            eip: entry_point as usize,
            page_directory: directory,
            state: ProcessState::Ready,
            privilege_level,
            stack_base,
            kernel_stack_top: stack_top,
            next: None,
        };
        self.enqueue_ready(index);

        audit::log_event(
            AuditKind::ProcessCreate,
            pid,
            [entry_point as usize as u32, privilege_level as u32, 0, 0],
        );
        Ok(pid)
    }

    /// Terminate by pid: mark the slot, unlink it from the ready queue,
    /// and release its kernel stack.
    pub fn terminate(&mut self, pid: u32) -> Result<(), KernelError> {
        let index = self
            .find_slot(pid)
            .filter(|&index| self.slots[index].state != ProcessState::Terminated)
            .ok_or(KernelError::ProcessNotFound { pid })?;

        self.slots[index].state = ProcessState::Terminated;
        self.dequeue(index);

        let stack_base = self.slots[index].stack_base;
        if !stack_base.is_null() {
            // SAFETY: the stack was allocated in create with STACK_LAYOUT
            // and the null check above rules out a recycled vacant slot.
            unsafe { alloc::alloc::dealloc(stack_base, STACK_LAYOUT) };
            self.slots[index].stack_base = core::ptr::null_mut();
        }

        audit::log_event(AuditKind::ProcessTerminate, pid, [0; 4]);
        Ok(())
    }

    /// Make `pid` the running process, removing it from the ready queue.
    pub fn set_current(&mut self, pid: u32) -> Result<(), KernelError> {
        let index = self
            .find_slot(pid)
            .filter(|&index| self.slots[index].state != ProcessState::Terminated)
            .ok_or(KernelError::ProcessNotFound { pid })?;
        self.dequeue(index);
        self.slots[index].state = ProcessState::Running;
        self.current = Some(index);
        Ok(())
    }

    pub fn current_pid(&self) -> Option<u32> {
        self.current.map(|index| self.slots[index].pid)
    }

    pub fn current(&self) -> Option<&Process> {
        self.current.map(|index| &self.slots[index])
    }

    pub fn state_of(&self, pid: u32) -> Option<ProcessState> {
        self.find_slot(pid).map(|index| self.slots[index].state)
    }

    /// Pids in the ready queue, head first.
    pub fn ready_pids(&self) -> ReadyIter<'_> {
        ReadyIter {
            table: self,
            cursor: self.ready_head,
        }
    }

    pub(crate) fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub(crate) fn ready_head_index(&self) -> Option<usize> {
        self.ready_head
    }

    pub(crate) fn slot(&self, index: usize) -> &Process {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Process {
        &mut self.slots[index]
    }

    pub(crate) fn pop_ready_head(&mut self) -> Option<usize> {
        let head = self.ready_head?;
        self.ready_head = self.slots[head].next.take();
        Some(head)
    }

    pub(crate) fn requeue_tail(&mut self, index: usize) {
        self.enqueue_ready(index);
    }

    pub(crate) fn set_current_index(&mut self, index: usize) {
        self.current = Some(index);
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over ready pids in queue order.
pub struct ReadyIter<'a> {
    table: &'a ProcessTable,
    cursor: Option<usize>,
}

impl Iterator for ReadyIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let index = self.cursor?;
        self.cursor = self.table.slots[index].next;
        Some(self.table.slots[index].pid)
    }
}

/// Global process table.
pub static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Reset the global table.
pub fn init() {
    *PROCESS_TABLE.lock() = ProcessTable::new();
    log::info!("process: table ready, {} slots", MAX_PROCESSES);
}

/// Create a process in the global table.
pub fn create(entry_point: fn(), privilege_level: u8) -> Result<u32, KernelError> {
    PROCESS_TABLE.lock().create(entry_point, privilege_level)
}

/// Terminate a process in the global table.
pub fn terminate(pid: u32) -> Result<(), KernelError> {
    PROCESS_TABLE.lock().terminate(pid)
}

/// Pid of the running process, if any.
pub fn current_pid() -> Option<u32> {
    PROCESS_TABLE.lock().current_pid()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn entry() {}

    #[test]
    fn pids_increase_monotonically_and_are_never_reused() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        let p3 = table.create(entry, 3).unwrap();
        assert!(p1 < p2 && p2 < p3);
        table.terminate(p2).unwrap();
        let p4 = table.create(entry, 3).unwrap();
        assert!(p4 > p3);
    }

    #[test]
    fn create_fails_when_table_is_full() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.create(entry, 3).unwrap();
        }
        assert_eq!(table.create(entry, 3), Err(KernelError::ProcessTableFull));
        // Terminating one frees a slot for the next create.
        let victim = table.ready_pids().next().unwrap();
        table.terminate(victim).unwrap();
        assert!(table.create(entry, 3).is_ok());
    }

    #[test]
    fn ready_queue_is_fifo_by_creation() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        let p3 = table.create(entry, 3).unwrap();
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p1, p2, p3]);
    }

    #[test]
    fn terminate_unlinks_head_and_middle() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        let p2 = table.create(entry, 3).unwrap();
        let p3 = table.create(entry, 3).unwrap();

        table.terminate(p1).unwrap();
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p2, p3]);

        table.terminate(p3).unwrap();
        let order: alloc::vec::Vec<u32> = table.ready_pids().collect();
        assert_eq!(order, alloc::vec![p2]);
        assert_eq!(table.state_of(p1), Some(ProcessState::Terminated));
    }

    #[test]
    fn terminate_twice_reports_not_found() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 3).unwrap();
        table.terminate(p1).unwrap();
        assert_eq!(
            table.terminate(p1),
            Err(KernelError::ProcessNotFound { pid: p1 })
        );
        assert_eq!(
            table.terminate(999),
            Err(KernelError::ProcessNotFound { pid: 999 })
        );
    }

    #[test]
    fn ready_queue_closure_holds_after_mixed_operations() {
        let mut table = ProcessTable::new();
        let pids: alloc::vec::Vec<u32> = (0..6).map(|_| table.create(entry, 3).unwrap()).collect();
        table.set_current(pids[0]).unwrap();
        table.terminate(pids[2]).unwrap();
        table.terminate(pids[5]).unwrap();

        let queued: alloc::vec::Vec<u32> = table.ready_pids().collect();
        // Every Ready process is reachable from the head...
        for pid in &pids {
            let state = table.state_of(*pid).unwrap();
            if state == ProcessState::Ready {
                assert!(queued.contains(pid));
            }
        }
        // ...and nothing Running or Terminated is in the queue.
        for pid in &queued {
            assert_eq!(table.state_of(*pid), Some(ProcessState::Ready));
        }
        assert!(!queued.contains(&pids[0]));
    }

    #[test]
    fn stack_bookkeeping_records_base_and_top() {
        let mut table = ProcessTable::new();
        let p1 = table.create(entry, 0).unwrap();
        let index = table.find_slot(p1).unwrap();
        let proc = table.slot(index);
        assert_eq!(
            proc.kernel_stack_top,
            proc.stack_base as usize + KERNEL_STACK_SIZE
        );
        assert_eq!(proc.esp, proc.kernel_stack_top);
        assert_eq!(proc.ebp, proc.kernel_stack_top);
        assert_eq!(proc.eip, entry as fn() as usize);
    }
}
