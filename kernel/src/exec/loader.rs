//! Builds the initial memory image of a user process: a fresh address space
//! holding the zero-filled stack and the executable's segments, filled
//! straight from the file while the new space is transiently installed on
//! the calling thread.

use crate::*;
use super::*;
use super::elf::ELFLoader;
use super::vm::{FrameAlloc, SpaceSwitch, Vm};
use crate::file::File;
use alloc::vec::Vec;
use axiom::io::RandomRead;

/// What the activation path needs to hand control to the new process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry_point: u64,
    pub stack_top: u64,
}

/// Builds the process image for `path` and publishes the finished address
/// space to `thread`'s table entry.
///
/// The caller's live mapping is borrowed to populate the new space and is
/// guaranteed to be back in place when this returns, error or not. On any
/// failure past the point where the space exists, every frame mapped so far
/// is unmapped and freed and the space is released: a failed launch leaves
/// no trace.
pub fn build_image<V: Vm, A: FrameAlloc>(
    vm: &mut V,
    frames: &mut A,
    thread: scheduler::Tid,
    path: &str,
    _argv: &[&str],
) -> Result<LoadedImage, Error> {
    // TODO: copy the argv strings onto the initial user stack
    let mut file = File::open(path)?;
    let executable = ELFLoader::parse(&mut file)?;
    if executable.entry_point <= KERNEL_SPACE_END {
        // an entry below the split would alias kernel memory
        return Err(Error::InvalidEntryPoint);
    }

    let space = vm.create_address_space(frames)?;

    // From here until the caller's table is back and the space is published,
    // no interrupt may run on this thread: the scheduler would observe a
    // half-built mapping as the thread's own.
    let interrupts_were_enabled = vm.interrupts_disable();
    let mut mapped_pages: Vec<u64> = Vec::new();
    let result = populate(vm, frames, space, &executable, &mut file, &mut mapped_pages);
    drop(file);

    match result.and_then(|()| scheduler::set_address_space(thread, space)) {
        Ok(()) => {
            vm.interrupts_restore(interrupts_were_enabled);
            Ok(LoadedImage {
                entry_point: executable.entry_point,
                stack_top: USER_STACK_TOP,
            })
        }
        Err(err) => {
            for page in mapped_pages.iter().rev() {
                if let Ok(frame) = vm.unmap(space, *page) {
                    frames.free_frame(frame);
                }
            }
            vm.release_address_space(space, frames);
            vm.interrupts_restore(interrupts_were_enabled);
            Err(err)
        }
    }
}

/// Maps and fills stack and segments while `space` is installed. Every page
/// that gets mapped is recorded in `mapped_pages` so the caller can unwind.
fn populate<V: Vm, A: FrameAlloc>(
    vm: &mut V,
    frames: &mut A,
    space: u64,
    executable: &ExecutableInfo,
    file: &mut File,
    mapped_pages: &mut Vec<u64>,
) -> Result<(), Error> {
    let mut vm = SpaceSwitch::enter(vm, space);

    // stack pages descend from the top-of-stack constant
    for i in 0..USER_STACK_PAGES as u64 {
        let page = USER_STACK_TOP - (i + 1) * PAGE;
        map_zeroed(&mut *vm, frames, space, page, mapped_pages)?;
    }

    load_segment(&mut *vm, frames, space, &executable.ro, file, mapped_pages)?;
    // write access was only needed to deposit the file contents
    for i in 0..executable.ro.pages {
        vm.finalize_readonly(space, executable.ro.vaddr + i * PAGE)?;
    }
    load_segment(&mut *vm, frames, space, &executable.rw, file, mapped_pages)?;

    Ok(())
}

fn load_segment<V: Vm, A: FrameAlloc, F: RandomRead>(
    vm: &mut V,
    frames: &mut A,
    space: u64,
    segment: &SegmentImage,
    file: &mut F,
    mapped_pages: &mut Vec<u64>,
) -> Result<(), Error> {
    for i in 0..segment.pages {
        let page = segment.vaddr + i * PAGE;
        map_zeroed(vm, frames, space, page, mapped_pages)?;

        // fill only where the file actually backs the segment; the
        // zero-initialized tail keeps the bytes written above
        let consumed = i * PAGE;
        if consumed < segment.size {
            let chunk = PAGE.min(segment.size - consumed) as usize;
            // a fill position the file cannot even seek to is a short image
            file.seek(segment.file_offset + consumed)
                .map_err(|_| Error::TruncatedImage)?;
            let bytes = unsafe { vm.page_bytes(page) };
            if file.read(&mut bytes[..chunk])? != chunk {
                return Err(Error::TruncatedImage);
            }
        }
    }
    Ok(())
}

/// Allocates a frame, maps it writable at `page` and clears it before any
/// use, so no stale physical memory ever shows through to user code.
fn map_zeroed<V: Vm, A: FrameAlloc>(
    vm: &mut V,
    frames: &mut A,
    space: u64,
    page: u64,
    mapped_pages: &mut Vec<u64>,
) -> Result<(), Error> {
    let frame = frames.allocate_frame();
    if frame == 0 {
        return Err(Error::OutOfMemory);
    }
    if let Err(err) = vm.map_writable(space, frames, frame, page) {
        frames.free_frame(frame);
        return Err(err);
    }
    mapped_pages.push(page);
    unsafe { vm.page_bytes(page) }.fill(0);
    Ok(())
}
