//! Process startup: turns the current kernel thread into a user process.

use crate::*;
use super::*;
use super::scheduler::TaskContext;

/// Builds the image for `path` on the calling thread and enters user mode.
/// Does not return on success; on failure the process simply never starts
/// and the caller continues with its own state untouched.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn start(path: &str, argv: &[&str]) -> Result<(), Error> {
    use crate::dev::hal::{cpu, mem};
    use super::vm::Vm;

    let thread = scheduler::current_thread();
    let mut vm = mem::HalVm;

    let image = {
        let mut frames = mem::FRAME_ALLOCATOR.lock();
        loader::build_image(&mut vm, &mut *frames, thread, path, argv)?
    };

    let context = initial_context(&image);
    scheduler::set_context(thread, context.clone())?;
    let root = scheduler::address_space(thread)?;

    unsafe {
        // the actual activation, as opposed to the transient install the
        // loader used while populating the space
        vm.install_root(root);
        cpu::enter_user_mode(&context)
    }
}

/// Initial user context for a built image: all registers zero, program
/// counter at the entry point, stack pointer at the stack top.
pub fn initial_context(image: &loader::LoadedImage) -> TaskContext {
    TaskContext::user(image.entry_point, image.stack_top)
}
