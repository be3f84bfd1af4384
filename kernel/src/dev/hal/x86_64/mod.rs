pub mod cpu;
pub mod mem;

#[cfg(target_os = "none")]
pub fn init() {
    cpu::init();
    mem::init();
}
