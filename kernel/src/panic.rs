#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    use crate::dev::hal::cpu;

    serial_println!("{}", info);
    println!("\nHalcyon Kernel Panic\n");
    println!("{}\n", info);
    cpu::grinding_halt()
}
