//! The boot-time kernel instance
//!
//! A port's trap and interrupt vectors have no arguments to carry a
//! `&mut Kernel`, so the instance built at boot is parked here and
//! borrowed inside a critical section for each entry.
//!
//! Author: Moroya Sakamoto

use core::cell::RefCell;

use critical_section::Mutex;

use crate::kernel::Kernel;

static KERNEL: Mutex<RefCell<Option<Kernel>>> = Mutex::new(RefCell::new(None));

/// Park `kernel` as the system instance, returning any previous one
pub fn install(kernel: Kernel) -> Option<Kernel> {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).replace(kernel))
}

/// Run `f` on the installed kernel with interrupts masked
///
/// Returns `None` if nothing is installed yet.
pub fn with<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).as_mut().map(f))
}

/// Take the kernel back out
pub fn uninstall() -> Option<Kernel> {
    critical_section::with(|cs| KERNEL.borrow_ref_mut(cs).take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pid;

    fn body(_: usize) {}

    // One test only: the instance is shared by the whole test binary
    #[test]
    fn test_install_with_uninstall() {
        assert!(with(|k| k.current()).is_none());

        let mut kernel = Kernel::testing();
        let a = kernel.start("a", body, 0, 256);
        assert!(install(kernel).is_none());

        // Continuations must point into the installed instance's stacks
        let inside = with(|k| {
            let cont = k.launch();
            let stack = k.stack_mut(a);
            let base = stack.as_ptr() as usize;
            cont.0 >= base && cont.0 < base + stack.len() * core::mem::size_of::<usize>()
        });
        assert_eq!(inside, Some(true));
        assert_eq!(with(|k| k.current()), Some(a));

        let back = uninstall().unwrap();
        assert_eq!(back.current(), a);
        assert!(back.process(Pid::IDLE).is_some());
        assert!(with(|k| k.current()).is_none());
    }
}
