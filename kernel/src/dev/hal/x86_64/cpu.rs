use crate::exec::scheduler::TaskContext;
use core::arch::asm;
use lazy_static::lazy_static;
use x86_64::instructions::{self, interrupts, segmentation::{Segment, DS}, tlb};
use x86_64::structures::{gdt, tss};
use x86_64::{PrivilegeLevel, VirtAddr};

const DOUBLE_FAULT_IST_INDEX: u16 = 0;

#[derive(Copy, Clone)]
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
struct Selectors {
    kernel_code_selector: gdt::SegmentSelector,
    kernel_data_selector: gdt::SegmentSelector,
    tss_selector: gdt::SegmentSelector,
    user_code_selector: gdt::SegmentSelector,
    user_data_selector: gdt::SegmentSelector,
}

lazy_static! {
    static ref TSS: tss::TaskStateSegment = {
        let mut tss = tss::TaskStateSegment::new();
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            const STACK_SIZE: usize = 4096 * 5;
            static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];
            let stack_start = VirtAddr::from_ptr(unsafe { core::ptr::addr_of!(STACK) });
            stack_start + STACK_SIZE
        };
        tss
    };

    static ref GDT: (gdt::GlobalDescriptorTable, Selectors) = {
        let mut table = gdt::GlobalDescriptorTable::new();
        let kernel_code_selector = table.add_entry(gdt::Descriptor::kernel_code_segment());
        let kernel_data_selector = table.add_entry(gdt::Descriptor::kernel_data_segment());
        let tss_selector = table.add_entry(gdt::Descriptor::tss_segment(&TSS));
        let user_data_selector = table.add_entry(gdt::Descriptor::user_data_segment());
        let user_code_selector = table.add_entry(gdt::Descriptor::user_code_segment());
        (table, Selectors {
            kernel_code_selector,
            kernel_data_selector,
            tss_selector,
            user_code_selector,
            user_data_selector,
        })
    };
}

#[cfg(target_os = "none")]
pub fn init() {
    use x86_64::instructions::segmentation::{CS, SS};
    use x86_64::instructions::tables;

    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.kernel_code_selector);
        SS::set_reg(GDT.1.kernel_data_selector);
        tables::load_tss(GDT.1.tss_selector);
    }
}

/// One-way transition into ring 3 at the context's instruction and stack
/// pointers. Segments and the interrupt flag come from here, everything else
/// from the zeroed context.
pub unsafe fn enter_user_mode(context: &TaskContext) -> ! {
    let (mut cs, mut ds) = (GDT.1.user_code_selector, GDT.1.user_data_selector);
    cs.0 |= PrivilegeLevel::Ring3 as u16;
    ds.0 |= PrivilegeLevel::Ring3 as u16;
    DS::set_reg(ds);
    tlb::flush_all();
    asm!(
        "push rax",   // stack segment
        "push rsi",   // rsp
        "push 0x200", // rflags, only the interrupt bit set
        "push rdx",   // code segment
        "push rdi",   // return to virtual address
        "iretq",
        in("rdi") context.rip,
        in("rsi") context.rsp,
        in("rdx") cs.0 as u64,
        in("rax") ds.0 as u64,
        options(noreturn),
    );
}

pub fn atomic_no_interrupts<F>(f: F)
where
    F: FnOnce(),
{
    let were_enabled = interrupts::are_enabled();
    interrupts::disable();
    f();
    if were_enabled {
        interrupts::enable();
    }
}

pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

pub fn enable_interrupts() {
    interrupts::enable();
}

pub fn disable_interrupts() {
    interrupts::disable();
}

pub fn halt() {
    instructions::hlt();
}

pub fn grinding_halt() -> ! {
    disable_interrupts();
    loop {
        instructions::hlt();
    }
}
