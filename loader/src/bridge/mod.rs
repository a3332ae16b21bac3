//! Calls from the host firmware into module code.
//!
//! Module code is compiled to find its RAM through a dedicated global-base
//! register instead of absolute addresses. Every call therefore has to load
//! that register with the instance's RAM base for the duration of the call,
//! and restore the caller's value afterwards.
//!
//! While a call is in flight the register belongs to the module. If interrupt
//! handlers on the board also use it, the window between save and restore
//! has to be a critical section for that register; `MaskedGlobalBaseBridge`
//! masks interrupts for that window.

#[cfg(target_arch = "arm")]
mod arm;

#[cfg(target_arch = "arm")]
pub use arm::{GlobalBaseBridge, MaskedGlobalBaseBridge};

/// Performs one foreign call
pub trait CallBridge {
    /// Branch to `entry` with `args` in the first three argument registers
    /// and `global_base` in the module's base register, returning the value
    /// the module leaves in the first result register.
    ///
    /// # Safety
    /// `entry` must be the address of code built for the module ABI, and
    /// `global_base` the base of a RAM image relocated for that code.
    unsafe fn call(&self, entry: usize, global_base: usize, args: [usize; 3]) -> usize;
}
