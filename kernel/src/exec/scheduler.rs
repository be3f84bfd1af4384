use crate::*;
use alloc::collections::BTreeMap;
use lazy_static::lazy_static;
use spin::Mutex;

pub type Tid = u32;

pub const BOOT_THREAD: Tid = 0;

/// Stored register snapshot of a thread, in the shape the context-switch and
/// user-entry paths expect.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub rbp: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TaskContext {
    pub const fn zeroed() -> TaskContext {
        TaskContext {
            rbp: 0,
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Fresh context for first user entry: everything zero except where
    /// execution starts and what it uses as stack. Segments and flags are
    /// supplied by the user-mode entry path itself.
    pub fn user(rip: u64, rsp: u64) -> TaskContext {
        let mut context = TaskContext::zeroed();
        context.rip = rip;
        context.rsp = rsp;
        context
    }
}

pub struct Task {
    /// Page-table root of the address space this thread owns, zero until a
    /// built space has been published to it.
    pub address_space: u64,
    pub context: TaskContext,
}

impl Task {
    fn new() -> Task {
        Task {
            address_space: 0,
            context: TaskContext::zeroed(),
        }
    }
}

pub struct ThreadTable {
    threads: BTreeMap<Tid, Task>,
    current: Tid,
    next_tid: Tid,
}

impl ThreadTable {
    fn new() -> ThreadTable {
        let mut threads = BTreeMap::new();
        threads.insert(BOOT_THREAD, Task::new());
        ThreadTable {
            threads,
            current: BOOT_THREAD,
            next_tid: BOOT_THREAD + 1,
        }
    }
}

lazy_static! {
    static ref THREADS: Mutex<ThreadTable> = Mutex::new(ThreadTable::new());
}

pub fn spawn() -> Tid {
    let mut table = THREADS.lock();
    let tid = table.next_tid;
    table.next_tid += 1;
    table.threads.insert(tid, Task::new());
    tid
}

pub fn current_thread() -> Tid {
    THREADS.lock().current
}

pub fn set_address_space(thread: Tid, root: u64) -> Result<(), Error> {
    let mut table = THREADS.lock();
    match table.threads.get_mut(&thread) {
        Some(task) => {
            task.address_space = root;
            Ok(())
        }
        None => Err(Error::EntryNotFound),
    }
}

pub fn address_space(thread: Tid) -> Result<u64, Error> {
    let table = THREADS.lock();
    match table.threads.get(&thread) {
        Some(task) => Ok(task.address_space),
        None => Err(Error::EntryNotFound),
    }
}

pub fn set_context(thread: Tid, context: TaskContext) -> Result<(), Error> {
    let mut table = THREADS.lock();
    match table.threads.get_mut(&thread) {
        Some(task) => {
            task.context = context;
            Ok(())
        }
        None => Err(Error::EntryNotFound),
    }
}

pub fn context(thread: Tid) -> Result<TaskContext, Error> {
    let table = THREADS.lock();
    match table.threads.get(&thread) {
        Some(task) => Ok(task.context.clone()),
        None => Err(Error::EntryNotFound),
    }
}
