use crate::*;
use super::PHYSICAL_MEMORY_OFFSET;
use crate::dev::hal::PAGE_SIZE;
use crate::exec::vm::FrameAlloc;
use x86_64::instructions::tlb;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTable, PageTableFlags, PageTableIndex};
use x86_64::{PhysAddr, VirtAddr};

/// First L4 slot belonging to the kernel half of every address space.
const KERNEL_L4_START: usize = 256;

fn table_mut(phys: u64) -> &'static mut PageTable {
    unsafe { &mut *((phys + PHYSICAL_MEMORY_OFFSET) as *mut PageTable) }
}

fn zero_table(phys: u64) {
    unsafe {
        core::ptr::write_bytes((phys + PHYSICAL_MEMORY_OFFSET) as *mut u8, 0, PAGE_SIZE);
    }
}

/// Builds a fresh L4 whose kernel half mirrors the live one and whose user
/// half is empty.
pub fn new_user_table(frames: &mut dyn FrameAlloc) -> Result<u64, Error> {
    let root = frames.allocate_frame();
    if root == 0 {
        return Err(Error::OutOfMemory);
    }
    zero_table(root);
    let (current_root, _) = Cr3::read();
    let current = table_mut(current_root.start_address().as_u64());
    let new_table = table_mut(root);
    for i in KERNEL_L4_START..512 {
        if !current[i].is_unused() {
            new_table[i] = current[i].clone();
        }
    }
    Ok(root)
}

pub fn map_addr(
    root: u64,
    frames: &mut dyn FrameAlloc,
    frame: u64,
    vaddr: u64,
    flags: PageTableFlags,
) -> Result<(), Error> {
    let virt = VirtAddr::new(vaddr);
    let l4 = table_mut(root);
    let l3 = next_table(l4, virt.p4_index(), frames)?;
    let l2 = next_table(l3, virt.p3_index(), frames)?;
    let l1 = next_table(l2, virt.p2_index(), frames)?;
    l1[virt.p1_index()].set_addr(PhysAddr::new(frame), flags);
    tlb::flush(virt);
    Ok(())
}

fn next_table(
    table: &'static mut PageTable,
    index: PageTableIndex,
    frames: &mut dyn FrameAlloc,
) -> Result<&'static mut PageTable, Error> {
    if table[index].is_unused() {
        let frame = frames.allocate_frame();
        if frame == 0 {
            return Err(Error::OutOfMemory);
        }
        zero_table(frame);
        table[index].set_addr(
            PhysAddr::new(frame),
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
        );
    }
    Ok(table_mut(table[index].addr().as_u64()))
}

fn leaf_entry(root: u64, vaddr: u64) -> Result<&'static mut PageTableEntry, Error> {
    let virt = VirtAddr::new(vaddr);
    let mut table = table_mut(root);
    for index in [virt.p4_index(), virt.p3_index(), virt.p2_index()] {
        if table[index].is_unused() {
            return Err(Error::EntryNotFound);
        }
        table = table_mut(table[index].addr().as_u64());
    }
    let entry = &mut table[virt.p1_index()];
    if entry.is_unused() {
        return Err(Error::EntryNotFound);
    }
    Ok(entry)
}

/// Drops the write permission of an existing leaf mapping.
pub fn finalize_readonly(root: u64, vaddr: u64) -> Result<(), Error> {
    let entry = leaf_entry(root, vaddr)?;
    let flags = entry.flags() & !PageTableFlags::WRITABLE;
    entry.set_flags(flags);
    tlb::flush(VirtAddr::new(vaddr));
    Ok(())
}

/// Removes the leaf mapping and returns the frame it pointed at.
pub fn unmap_addr(root: u64, vaddr: u64) -> Result<u64, Error> {
    let entry = leaf_entry(root, vaddr)?;
    let frame = entry.addr().as_u64();
    entry.set_unused();
    tlb::flush(VirtAddr::new(vaddr));
    Ok(frame)
}

/// Frees the translation structures of the user half, then the root itself.
/// Leaf data frames are the caller's to unmap and free beforehand.
pub fn release_user_tables(root: u64, frames: &mut dyn FrameAlloc) {
    let l4 = table_mut(root);
    for i in 0..KERNEL_L4_START {
        if !l4[i].is_unused() {
            release_table(l4[i].addr().as_u64(), 3, frames);
            l4[i].set_unused();
        }
    }
    frames.free_frame(root);
}

fn release_table(phys: u64, level: u8, frames: &mut dyn FrameAlloc) {
    if level > 1 {
        let table = table_mut(phys);
        for entry in table.iter() {
            if !entry.is_unused() {
                release_table(entry.addr().as_u64(), level - 1, frames);
            }
        }
    }
    frames.free_frame(phys);
}
