use crate::*;
use core::ops::{Deref, DerefMut};

/// Hands out physical frames one at a time. A returned value of zero means
/// the allocator is exhausted.
pub trait FrameAlloc {
    fn allocate_frame(&mut self) -> u64;
    fn free_frame(&mut self, frame: u64);
}

/// Address-space primitives of the running platform.
///
/// An address space is an opaque root handle. The loader builds a space while
/// it is transiently installed on the calling hardware thread, so the trait
/// also carries the interrupt mask of that thread: nothing may observe the
/// foreign mapping from an interrupt path.
pub trait Vm {
    /// Creates a fresh, empty user address space sharing the kernel mappings.
    fn create_address_space(&mut self, frames: &mut dyn FrameAlloc) -> Result<u64, Error>;

    /// Maps `frame` at `page`, user-accessible and writable. For pages that
    /// must end up read-only this is the transient half of the contract;
    /// `finalize_readonly` is the other half.
    fn map_writable(
        &mut self,
        space: u64,
        frames: &mut dyn FrameAlloc,
        frame: u64,
        page: u64,
    ) -> Result<(), Error>;

    /// Drops the write permission of an already-mapped page.
    fn finalize_readonly(&mut self, space: u64, page: u64) -> Result<(), Error>;

    /// Removes the mapping at `page` and returns the frame it held.
    fn unmap(&mut self, space: u64, page: u64) -> Result<u64, Error>;

    /// Releases the space itself (its translation structures). Mapped data
    /// frames are not touched; callers unmap those first.
    fn release_address_space(&mut self, space: u64, frames: &mut dyn FrameAlloc);

    fn current_root(&self) -> u64;

    /// Makes `root` the live mapping of the calling hardware thread.
    ///
    /// # Safety
    /// The caller must guarantee that kernel code, stack and heap stay mapped
    /// under `root`, and that the prior root is restored before anything else
    /// relies on the published thread state.
    unsafe fn install_root(&mut self, root: u64);

    /// The page at `vaddr` through the currently installed mapping.
    ///
    /// # Safety
    /// `vaddr` must be page-aligned and mapped writable in the current space;
    /// the slice is only valid while that mapping stays installed.
    unsafe fn page_bytes(&mut self, vaddr: u64) -> &'static mut [u8];

    /// Masks interrupts, returning whether they were enabled before.
    fn interrupts_disable(&mut self) -> bool;
    /// Restores the exact mask state returned by `interrupts_disable`.
    fn interrupts_restore(&mut self, enabled: bool);
}

/// Scoped redirect of the calling thread's address translation.
///
/// Entering installs `root`; dropping reinstalls whatever was live before,
/// on every exit path. Interrupt masking is managed by the caller around the
/// whole populate/publish sequence, not per switch.
pub struct SpaceSwitch<'a, V: Vm> {
    vm: &'a mut V,
    saved_root: u64,
}

impl<'a, V: Vm> SpaceSwitch<'a, V> {
    pub fn enter(vm: &'a mut V, root: u64) -> SpaceSwitch<'a, V> {
        let saved_root = vm.current_root();
        unsafe {
            vm.install_root(root);
        }
        SpaceSwitch { vm, saved_root }
    }
}

impl<'a, V: Vm> Deref for SpaceSwitch<'a, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.vm
    }
}

impl<'a, V: Vm> DerefMut for SpaceSwitch<'a, V> {
    fn deref_mut(&mut self) -> &mut V {
        self.vm
    }
}

impl<'a, V: Vm> Drop for SpaceSwitch<'a, V> {
    fn drop(&mut self) {
        unsafe {
            self.vm.install_root(self.saved_root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::hal::sim::{SimFrameAlloc, SimVm, KERNEL_ROOT};

    #[test]
    fn switch_restores_previous_root() {
        let mut vm = SimVm::new();
        let mut frames = SimFrameAlloc::new(8);
        let space = vm.create_address_space(&mut frames).unwrap();
        assert_eq!(vm.current_root(), KERNEL_ROOT);
        {
            let switched = SpaceSwitch::enter(&mut vm, space);
            assert_eq!(switched.current_root(), space);
        }
        assert_eq!(vm.current_root(), KERNEL_ROOT);
    }

    #[test]
    fn switch_restores_on_early_exit() {
        fn failing_populate(vm: &mut SimVm, space: u64) -> Result<(), Error> {
            let _switched = SpaceSwitch::enter(vm, space);
            Err(Error::OutOfMemory)
        }

        let mut vm = SimVm::new();
        let mut frames = SimFrameAlloc::new(8);
        let space = vm.create_address_space(&mut frames).unwrap();
        assert_eq!(failing_populate(&mut vm, space), Err(Error::OutOfMemory));
        assert_eq!(vm.current_root(), KERNEL_ROOT);
    }

    #[test]
    fn nested_switch_unwinds_in_order() {
        let mut vm = SimVm::new();
        let mut frames = SimFrameAlloc::new(8);
        let outer = vm.create_address_space(&mut frames).unwrap();
        let inner = vm.create_address_space(&mut frames).unwrap();
        {
            let mut first = SpaceSwitch::enter(&mut vm, outer);
            {
                let second = SpaceSwitch::enter(&mut *first, inner);
                assert_eq!(second.current_root(), inner);
            }
            assert_eq!(first.current_root(), outer);
        }
        assert_eq!(vm.current_root(), KERNEL_ROOT);
    }
}
