//! Observer ABI: a callback the module invokes around its internal nodes.

use core::ffi::c_void;

/// Called by the module with the registered cookie, the event flags for this
/// invocation, and a module-defined node descriptor. A non-zero return asks
/// the module to stop the current inference.
pub type ObserverFn = unsafe extern "C" fn(cookie: usize, flags: u32, node: *const c_void) -> u32;

/// Emitted once per node while the network is being initialized
pub const EVENT_INIT: u32 = 1 << 0;
/// Before a node executes
pub const EVENT_PRE: u32 = 1 << 1;
/// After a node executes
pub const EVENT_POST: u32 = 1 << 2;
/// Set alongside another event for the first node of a run
pub const EVENT_FIRST: u32 = 1 << 8;
/// Set alongside another event for the last node of a run
pub const EVENT_LAST: u32 = 1 << 9;

pub const EVENT_NODE: u32 = EVENT_PRE | EVENT_POST;
pub const EVENT_MASK: u32 = EVENT_INIT | EVENT_PRE | EVENT_POST | EVENT_FIRST | EVENT_LAST;

/// Registration record. The loader keeps one per installed network, inside
/// the network's runtime context, and passes the module its address.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct ObserverSlot {
    pub callback: Option<ObserverFn>,
    pub cookie: usize,
    pub flags: u32,
}

impl ObserverSlot {
    pub const fn empty() -> Self {
        Self {
            callback: None,
            cookie: 0,
            flags: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.callback.is_some()
    }
}
