//! Loader for relocatable neural-network modules.
//!
//! A module is a position-independent binary built against a fixed ABI (see
//! `netload_api`). The loader validates it, installs it into a RAM region
//! picked at run time, rewrites its tagged address words for that region,
//! and calls into it with the module's global-base register pointing at its
//! RAM.
//!
//! ```ignore
//! let loader = Loader::new(GlobalBaseBridge, CortexM, HeapAllocator);
//! let info = loader.info(MODEL)?;
//! let mut net = unsafe { loader.load(MODEL, None, LoadMode::ExecuteInPlace)? };
//! net.init(&[info.weights.as_ptr()], &[arena.as_mut_ptr()])?;
//! let batches = net.run(input.as_ptr(), output.as_mut_ptr())?;
//! net.destroy()?;
//! ```

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "heap")]
extern crate alloc;

pub mod address;
pub mod binary;
pub mod bridge;
pub mod compat;
pub mod config;
pub mod context;
pub mod error;
#[cfg(feature = "heap")]
pub mod heap;
pub mod instance;
pub mod log;
pub mod planner;
pub mod relocation;
#[cfg(test)]
mod testutil;

pub use binary::{get_info, validate, Descriptor, ModelInfo};
pub use bridge::CallBridge;
pub use compat::{Processor, StaticProcessor};
pub use config::LoaderConfig;
pub use context::{Handle, RuntimeContext};
pub use error::{ErrorKind, LoaderError, LoaderResult};
#[cfg(feature = "heap")]
pub use heap::HeapAllocator;
pub use instance::{Loader, Network};
pub use planner::{required_size, Allocator, LoadMode, NoAllocator};

#[cfg(target_arch = "arm")]
pub use bridge::{GlobalBaseBridge, MaskedGlobalBaseBridge};
#[cfg(target_arch = "arm")]
pub use compat::CortexM;
