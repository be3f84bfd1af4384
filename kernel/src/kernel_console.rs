use crate::dev::char::Uart16550;
use crate::dev::hal::cpu;
use core::fmt::{self, Write};
use spin::Mutex;

pub static SERIAL_CONSOLE: Mutex<Uart16550> = Mutex::new(Uart16550::new(0));

pub fn init() {
    SERIAL_CONSOLE.lock().init_device();
}

#[macro_export]
macro_rules! early_print {
    ($($arg:tt)*) => ($crate::kernel_console::_early_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kernel_console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::kernel_console::_serial_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    cpu::atomic_no_interrupts(|| {
        SERIAL_CONSOLE
            .lock()
            .write_fmt(args)
            .expect("KERNEL_CONSOLE_DEVICE_FAILURE");
    });
}

#[doc(hidden)]
pub fn _early_print(args: fmt::Arguments) {
    SERIAL_CONSOLE
        .lock()
        .write_fmt(args)
        .expect("KERNEL_CONSOLE_DEVICE_FAILURE");
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    _print(args);
}
