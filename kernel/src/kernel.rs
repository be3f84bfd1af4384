use crate::*;
use crate::dev::filesystem::{initrd, FileSystem};
use crate::dev::hal::{self, cpu, mem};
use crate::exec::process;

const INIT_PATH: &str = "/programs/init";

/// Everything the boot stage hands over before the kernel takes the machine.
pub struct BootConfig {
    pub physical_memory_offset: u64,
    pub memory_regions: &'static [mem::PhysRegion],
    pub initrd: &'static [u8],
}

pub fn run_kernel(config: BootConfig) -> ! {
    unsafe {
        mem::PHYSICAL_MEMORY_OFFSET = config.physical_memory_offset;
        mem::BOOT_MEMORY_MAP = Some(config.memory_regions);
        mem::FREE_MEMORY = config
            .memory_regions
            .iter()
            .filter(|region| region.kind == mem::PhysRegionKind::Usable)
            .map(|region| (region.end - region.start) as usize)
            .sum();
    }
    kernel_console::init();
    if let Err(err) = init_system(config.initrd) {
        panic!("{:?} ({})", err, err.code());
    }
    loop {
        cpu::halt();
    }
}

fn init_system(initrd_archive: &'static [u8]) -> Result<(), Error> {
    early_print!("Halcyon OS [Version {}]\n", sysinfo::HALCYON_VERSION);
    hal::init();
    early_print!("[{} MB Memory Available]\n", unsafe { mem::FREE_MEMORY } / 1048576 + 1);

    let boot_volume = initrd::init(initrd_archive);
    println!("Mounted {} ({} bytes)", boot_volume.volume_label(), initrd_archive.len());

    println!("Starting {}", INIT_PATH);
    if let Err(err) = process::start(INIT_PATH, &[INIT_PATH]) {
        serial_println!("{} did not start: {:?} ({})", INIT_PATH, err, err.code());
        return Err(err);
    }
    Ok(())
}
