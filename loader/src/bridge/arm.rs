use core::arch::asm;

use super::CallBridge;

/// Loads r9 with the module's RAM base around each call.
///
/// Interrupts stay enabled, so a handler that runs during the call sees the
/// module's r9. Boards whose handlers rely on r9 use `MaskedGlobalBaseBridge`.
#[derive(Copy, Clone, Debug, Default)]
pub struct GlobalBaseBridge;

impl CallBridge for GlobalBaseBridge {
    unsafe fn call(&self, entry: usize, global_base: usize, args: [usize; 3]) -> usize {
        let result: usize;
        // Thumb state bit, modules are Thumb-only
        let target = entry | 1;
        asm!(
            "push {{r9, lr}}",
            "mov r9, r3",
            "blx r12",
            "pop {{r9, lr}}",
            inout("r0") args[0] => result,
            in("r1") args[1],
            in("r2") args[2],
            in("r3") global_base,
            in("r12") target,
            clobber_abi("C"),
        );
        result
    }
}

/// Like `GlobalBaseBridge`, with interrupts masked from the save of r9 until
/// its restore. The module runs with PRIMASK set, and the caller's PRIMASK
/// is put back afterwards.
#[derive(Copy, Clone, Debug, Default)]
pub struct MaskedGlobalBaseBridge;

impl CallBridge for MaskedGlobalBaseBridge {
    unsafe fn call(&self, entry: usize, global_base: usize, args: [usize; 3]) -> usize {
        let result: usize;
        let target = entry | 1;
        // r4 is callee-saved, so it still holds PRIMASK when the module returns
        asm!(
            "mrs r4, PRIMASK",
            "cpsid i",
            "push {{r9, lr}}",
            "mov r9, r3",
            "blx r12",
            "pop {{r9, lr}}",
            "msr PRIMASK, r4",
            inout("r0") args[0] => result,
            in("r1") args[1],
            in("r2") args[2],
            in("r3") global_base,
            in("r12") target,
            out("r4") _,
            clobber_abi("C"),
        );
        result
    }
}
