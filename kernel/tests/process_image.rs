//! End-to-end image construction against the simulated paging primitives:
//! geometry, fill exactness, permissions, accounting and rollback.

use halcyon::dev::filesystem::initrd;
use halcyon::dev::hal::sim::{SimFrameAlloc, SimVm, KERNEL_ROOT};
use halcyon::dev::hal::PAGE_SIZE;
use halcyon::exec::loader::{build_image, LoadedImage};
use halcyon::exec::vm::Vm;
use halcyon::exec::{scheduler, USER_STACK_PAGES, USER_STACK_TOP};
use halcyon::Error;

const PAGE: u64 = PAGE_SIZE as u64;
const ENTRY: u64 = 0x40_0000;

// ---- fixtures -------------------------------------------------------------

struct TestSegment {
    flags: u32,
    file_offset: u64,
    vaddr: u64,
    size_in_file: u64,
    size_in_memory: u64,
}

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

fn elf_header(entry: u64, segments: &[TestSegment]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x464C_457Fu32.to_le_bytes()); // magic
    out.extend_from_slice(&[2, 1, 1, 0]); // 64-bit, little-endian, version 1
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // executable
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // x86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&64u64.to_le_bytes()); // program header table offset
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&56u16.to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(out.len(), 64);
    for seg in segments {
        out.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        out.extend_from_slice(&seg.flags.to_le_bytes());
        out.extend_from_slice(&seg.file_offset.to_le_bytes());
        out.extend_from_slice(&seg.vaddr.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&seg.size_in_file.to_le_bytes());
        out.extend_from_slice(&seg.size_in_memory.to_le_bytes());
        out.extend_from_slice(&0x1000u64.to_le_bytes());
    }
    out
}

fn ro_byte(i: usize) -> u8 {
    (i % 251) as u8
}

fn rw_byte(i: usize) -> u8 {
    ((i * 7 + 3) % 253) as u8
}

/// The reference executable: a one-and-a-half-page read-only segment at the
/// entry address and a one-page read-write segment right after it.
fn init_image() -> Vec<u8> {
    let mut out = elf_header(
        ENTRY,
        &[
            TestSegment {
                flags: PF_R | PF_X,
                file_offset: 0x200,
                vaddr: ENTRY,
                size_in_file: 0x1800,
                size_in_memory: 0x1800,
            },
            TestSegment {
                flags: PF_R | PF_W,
                file_offset: 0x1A00,
                vaddr: ENTRY + 0x2000,
                size_in_file: 0x1000,
                size_in_memory: 0x1000,
            },
        ],
    );
    out.resize(0x200, 0);
    out.extend((0..0x1800).map(ro_byte));
    out.extend((0..0x1000).map(rw_byte));
    out
}

/// Data segment larger in memory than on disk: half a page of bytes, two
/// pages of footprint.
fn bss_image() -> Vec<u8> {
    let mut out = elf_header(
        ENTRY,
        &[
            TestSegment {
                flags: PF_R | PF_X,
                file_offset: 0x200,
                vaddr: ENTRY,
                size_in_file: 0x1000,
                size_in_memory: 0x1000,
            },
            TestSegment {
                flags: PF_R | PF_W,
                file_offset: 0x1200,
                vaddr: ENTRY + 0x1000,
                size_in_file: 0x200,
                size_in_memory: 0x1800,
            },
        ],
    );
    out.resize(0x200, 0);
    out.extend((0..0x1000).map(ro_byte));
    out.extend((0..0x200).map(rw_byte));
    out
}

/// Claims two pages of read-only bytes but the file ends early.
fn truncated_image() -> Vec<u8> {
    let mut out = elf_header(
        ENTRY,
        &[TestSegment {
            flags: PF_R | PF_X,
            file_offset: 0x200,
            vaddr: ENTRY,
            size_in_file: 0x2000,
            size_in_memory: 0x2000,
        }],
    );
    out.resize(0x200 + 0x800, 0xCD);
    out
}

fn low_entry_image() -> Vec<u8> {
    // entry exactly at the kernel/user split, which is still kernel territory
    elf_header(
        0x10_0000,
        &[TestSegment {
            flags: PF_R | PF_X,
            file_offset: 0x200,
            vaddr: 0x10_0000,
            size_in_file: 0,
            size_in_memory: 0x1000,
        }],
    )
}

fn cpio_entry(ino: usize, name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"070701");
    let fields = [
        ino,
        0o100644,
        0,
        0,
        1,
        0,
        data.len(),
        0,
        0,
        0,
        0,
        name.len() + 1,
        0,
    ];
    for field in fields {
        out.extend_from_slice(format!("{:08X}", field).as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

fn boot_archive() -> &'static [u8] {
    let entries: [(&str, Vec<u8>); 5] = [
        ("programs/init", init_image()),
        ("programs/bss", bss_image()),
        ("programs/truncated", truncated_image()),
        ("programs/lowentry", low_entry_image()),
        ("programs/badmagic", b"ZELF this is not an executable".to_vec()),
    ];
    let mut out = Vec::new();
    for (i, (name, data)) in entries.iter().enumerate() {
        out.extend_from_slice(&cpio_entry(i + 1, name, data));
    }
    out.extend_from_slice(&cpio_entry(0, "TRAILER!!!", &[]));
    Vec::leak(out)
}

/// Mounts the shared archive and serializes the tests, so open-handle counts
/// observed by one test are never another test's.
fn setup() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    initrd::init(boot_archive());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn machine(frame_capacity: usize) -> (SimVm, SimFrameAlloc, scheduler::Tid) {
    (SimVm::new(), SimFrameAlloc::new(frame_capacity), scheduler::spawn())
}

// ---- the tests ------------------------------------------------------------

#[test]
fn builds_the_reference_image() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);

    let image = build_image(&mut vm, &mut frames, tid, "/programs/init", &[]).unwrap();
    assert_eq!(
        image,
        LoadedImage {
            entry_point: ENTRY,
            stack_top: USER_STACK_TOP,
        }
    );

    // exactly ro + rw + stack frames, nothing transient left behind
    assert_eq!(frames.outstanding(), 2 + 1 + USER_STACK_PAGES);
    assert_eq!(frames.handed_out(), 2 + 1 + USER_STACK_PAGES);

    let root = scheduler::address_space(tid).unwrap();
    assert_ne!(root, 0);
    assert!(vm.space_exists(root));
}

#[test]
fn read_only_segment_is_filled_then_locked() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    build_image(&mut vm, &mut frames, tid, "/programs/init", &[]).unwrap();
    let root = scheduler::address_space(tid).unwrap();

    // both code pages lost their write permission after the fill
    for page in [ENTRY, ENTRY + PAGE] {
        assert!(!vm.mapping(root, page).unwrap().writable);
    }
    assert!(vm.mapping(root, ENTRY + 2 * PAGE).unwrap().writable);

    let first = vm.page_data(root, ENTRY);
    for (i, &b) in first.iter().enumerate() {
        assert_eq!(b, ro_byte(i));
    }
    // the final partial page: file bytes up to 0x800, zero to the end
    let second = vm.page_data(root, ENTRY + PAGE);
    for (i, &b) in second.iter().enumerate() {
        if i < 0x800 {
            assert_eq!(b, ro_byte(0x1000 + i));
        } else {
            assert_eq!(b, 0);
        }
    }

    let data = vm.page_data(root, ENTRY + 2 * PAGE);
    for (i, &b) in data.iter().enumerate() {
        assert_eq!(b, rw_byte(i));
    }
}

#[test]
fn stack_pages_are_writable_and_zeroed() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    build_image(&mut vm, &mut frames, tid, "/programs/init", &[]).unwrap();
    let root = scheduler::address_space(tid).unwrap();

    for i in 0..USER_STACK_PAGES as u64 {
        let page = USER_STACK_TOP - (i + 1) * PAGE;
        let mapping = vm.mapping(root, page).unwrap();
        assert!(mapping.writable);
        assert!(vm.page_data(root, page).iter().all(|&b| b == 0));
    }
    // nothing is mapped at or above the stack top
    assert_eq!(vm.mapping(root, USER_STACK_TOP), None);
    assert_eq!(
        vm.mapping(root, USER_STACK_TOP - (USER_STACK_PAGES as u64 + 1) * PAGE),
        None
    );
}

#[test]
fn memory_tail_beyond_file_bytes_is_zero() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    build_image(&mut vm, &mut frames, tid, "/programs/bss", &[]).unwrap();
    let root = scheduler::address_space(tid).unwrap();

    let data_page = vm.page_data(root, ENTRY + PAGE);
    for (i, &b) in data_page.iter().enumerate() {
        if i < 0x200 {
            assert_eq!(b, rw_byte(i));
        } else {
            assert_eq!(b, 0);
        }
    }
    // the page past the file-backed bytes was mapped but never read into
    assert!(vm
        .page_data(root, ENTRY + 2 * PAGE)
        .iter()
        .all(|&b| b == 0));
    assert_eq!(frames.outstanding(), 1 + 2 + USER_STACK_PAGES);
}

#[test]
fn caller_mapping_is_untouched_and_installs_are_masked() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    assert_eq!(vm.current_root(), KERNEL_ROOT);
    build_image(&mut vm, &mut frames, tid, "/programs/init", &[]).unwrap();

    assert_eq!(vm.current_root(), KERNEL_ROOT);
    assert!(vm.interrupts_enabled());
    assert!(!vm.installs.is_empty());
    for &(root, interrupts_enabled) in &vm.installs {
        if root != KERNEL_ROOT {
            // no interrupt path may ever observe the foreign mapping
            assert!(!interrupts_enabled);
        }
    }
    // the transient install was restored before the build returned
    assert_eq!(vm.installs.last().unwrap().0, KERNEL_ROOT);
}

#[test]
fn rejects_entry_at_or_below_the_kernel_split() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    let result = build_image(&mut vm, &mut frames, tid, "/programs/lowentry", &[]);
    assert_eq!(result.unwrap_err(), Error::InvalidEntryPoint);
    // rejected before any resource was touched
    assert_eq!(frames.handed_out(), 0);
    assert!(vm.installs.is_empty());
    assert_eq!(scheduler::address_space(tid), Ok(0));
    assert_eq!(initrd::root().unwrap().open_handles(), 0);
}

#[test]
fn rejects_unparseable_executables() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    let result = build_image(&mut vm, &mut frames, tid, "/programs/badmagic", &[]);
    assert_eq!(result.unwrap_err(), Error::InvalidExecutable);
    assert_eq!(frames.handed_out(), 0);
    assert_eq!(initrd::root().unwrap().open_handles(), 0);
}

#[test]
fn missing_executable_reports_not_found() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    let result = build_image(&mut vm, &mut frames, tid, "/programs/nonexistent", &[]);
    assert_eq!(result.unwrap_err(), Error::EntryNotFound);
    assert_eq!(frames.handed_out(), 0);
    assert_eq!(initrd::root().unwrap().open_handles(), 0);
}

#[test]
fn truncated_image_unwinds_completely() {
    let _guard = setup();
    let (mut vm, mut frames, tid) = machine(64);
    let result = build_image(&mut vm, &mut frames, tid, "/programs/truncated", &[]);
    assert_eq!(result.unwrap_err(), Error::TruncatedImage);

    // every frame mapped before the short read came back
    assert!(frames.handed_out() > 0);
    assert_eq!(frames.outstanding(), 0);
    // the half-built space is gone and was never published
    let foreign: Vec<u64> = vm
        .installs
        .iter()
        .map(|&(root, _)| root)
        .filter(|&root| root != KERNEL_ROOT)
        .collect();
    assert_eq!(foreign.len(), 1);
    assert!(!vm.space_exists(foreign[0]));
    assert_eq!(scheduler::address_space(tid), Ok(0));
    assert_eq!(vm.current_root(), KERNEL_ROOT);
    assert!(vm.interrupts_enabled());
    assert_eq!(initrd::root().unwrap().open_handles(), 0);
}

#[test]
fn frame_exhaustion_is_contained() {
    let _guard = setup();
    // enough for three stack pages, not for the fourth
    let (mut vm, mut frames, tid) = machine(3);
    let result = build_image(&mut vm, &mut frames, tid, "/programs/init", &[]);
    assert_eq!(result.unwrap_err(), Error::OutOfMemory);

    assert_eq!(frames.outstanding(), 0);
    assert_eq!(scheduler::address_space(tid), Ok(0));
    assert_eq!(vm.current_root(), KERNEL_ROOT);
    assert!(vm.interrupts_enabled());
    assert_eq!(initrd::root().unwrap().open_handles(), 0);
}

#[test]
fn builds_for_another_thread_without_touching_the_callers_entry() {
    let _guard = setup();
    let (mut vm, mut frames, target) = machine(64);
    let caller = scheduler::current_thread();
    let before = scheduler::address_space(caller).unwrap();

    build_image(&mut vm, &mut frames, target, "/programs/init", &[]).unwrap();

    assert_eq!(scheduler::address_space(caller).unwrap(), before);
    assert_ne!(scheduler::address_space(target).unwrap(), 0);
}
