use crate::*;
use crate::dev::hal::PAGE_SIZE;
use crate::exec::vm::{FrameAlloc, Vm};
use spin::Mutex;
use x86_64::instructions::{interrupts, tlb};
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::{PageTableFlags, PhysFrame};
use x86_64::PhysAddr;

mod frame_allocator;
pub mod page_mapper;

pub use frame_allocator::{BumpFrameAllocator, PhysRegion, PhysRegionKind};

pub static mut PHYSICAL_MEMORY_OFFSET: u64 = 0;
pub static mut BOOT_MEMORY_MAP: Option<&'static [PhysRegion]> = None;
pub static mut FREE_MEMORY: usize = 0;

pub const KERNEL_HEAP_START: usize = 0xFFFF_9000_0000_0000;
pub const KERNEL_HEAP_SIZE: usize = 64 * 4096;

pub static FRAME_ALLOCATOR: Mutex<BumpFrameAllocator> = Mutex::new(BumpFrameAllocator::empty());

#[cfg(target_os = "none")]
pub fn init() {
    early_print!("Initializing kernel memory...\n");
    unsafe {
        FRAME_ALLOCATOR
            .lock()
            .init(BOOT_MEMORY_MAP.expect("BOOT_MEMORY_MAP_MISSING"));
    }
    init_heap().expect("KERNEL_HEAP_ALLOCATION_FAILED");
    unsafe {
        println!("Physical memory virtual base: {:#018x}", PHYSICAL_MEMORY_OFFSET);
    }
    println!("Kernel heap virtual base: {:#018x}", KERNEL_HEAP_START);
    println!("Kernel heap size: {:#018x}", KERNEL_HEAP_SIZE);
}

#[cfg(target_os = "none")]
fn init_heap() -> Result<(), Error> {
    let root = Cr3::read().0.start_address().as_u64();
    let mut frames = FRAME_ALLOCATOR.lock();
    let heap_flags =
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::GLOBAL;
    for page in (KERNEL_HEAP_START..KERNEL_HEAP_START + KERNEL_HEAP_SIZE).step_by(PAGE_SIZE) {
        let frame = frames.allocate_frame();
        if frame == 0 {
            return Err(Error::OutOfMemory);
        }
        page_mapper::map_addr(root, &mut *frames, frame, page as u64, heap_flags)?;
    }
    unsafe {
        allocator::ALLOCATOR
            .lock()
            .init(KERNEL_HEAP_START as *mut u8, KERNEL_HEAP_SIZE);
    }
    Ok(())
}

/// The paging and interrupt primitives of the real machine.
pub struct HalVm;

impl Vm for HalVm {
    fn create_address_space(&mut self, frames: &mut dyn FrameAlloc) -> Result<u64, Error> {
        page_mapper::new_user_table(frames)
    }

    fn map_writable(
        &mut self,
        space: u64,
        frames: &mut dyn FrameAlloc,
        frame: u64,
        page: u64,
    ) -> Result<(), Error> {
        page_mapper::map_addr(
            space,
            frames,
            frame,
            page,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
        )
    }

    fn finalize_readonly(&mut self, space: u64, page: u64) -> Result<(), Error> {
        page_mapper::finalize_readonly(space, page)
    }

    fn unmap(&mut self, space: u64, page: u64) -> Result<u64, Error> {
        page_mapper::unmap_addr(space, page)
    }

    fn release_address_space(&mut self, space: u64, frames: &mut dyn FrameAlloc) {
        page_mapper::release_user_tables(space, frames)
    }

    fn current_root(&self) -> u64 {
        Cr3::read().0.start_address().as_u64()
    }

    unsafe fn install_root(&mut self, root: u64) {
        Cr3::write(
            PhysFrame::from_start_address_unchecked(PhysAddr::new(root)),
            Cr3Flags::empty(),
        );
        tlb::flush_all();
    }

    unsafe fn page_bytes(&mut self, vaddr: u64) -> &'static mut [u8] {
        core::slice::from_raw_parts_mut(vaddr as *mut u8, PAGE_SIZE)
    }

    fn interrupts_disable(&mut self) -> bool {
        let were_enabled = interrupts::are_enabled();
        interrupts::disable();
        were_enabled
    }

    fn interrupts_restore(&mut self, enabled: bool) {
        if enabled {
            interrupts::enable();
        }
    }
}
