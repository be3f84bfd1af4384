#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[macro_use]
pub mod kernel_console;

pub mod allocator;
pub mod dev;
pub mod exec;
pub mod file;
pub mod panic;
pub mod sysinfo;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod kernel;

pub use axiom::Error;
