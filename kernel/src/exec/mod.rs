use crate::dev::hal::PAGE_SIZE;

pub mod elf;
pub mod loader;
pub mod process;
pub mod scheduler;
pub mod vm;

/// Number of pages backing the initial user stack.
pub const USER_STACK_PAGES: usize = 4;
/// First address above the initial user stack; the stack grows down from here.
pub const USER_STACK_TOP: u64 = 0x0800_0000;
/// Low-memory window reserved for the kernel image and boot structures.
/// User entry points must lie strictly above it.
pub const KERNEL_SPACE_END: u64 = 0x0010_0000;

/// Geometry of one loadable segment class of an executable.
///
/// `size` counts the bytes backed by the file; `pages` covers the in-memory
/// footprint, which may be larger (the tail stays zero-filled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentImage {
    pub vaddr: u64,
    pub size: u64,
    pub file_offset: u64,
    pub pages: u64,
}

impl SegmentImage {
    pub const fn empty() -> SegmentImage {
        SegmentImage {
            vaddr: 0,
            size: 0,
            file_offset: 0,
            pages: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableInfo {
    pub entry_point: u64,
    pub ro: SegmentImage,
    pub rw: SegmentImage,
}

pub(crate) const PAGE: u64 = PAGE_SIZE as u64;
