//! Binary interface shared between the network loader, the toolchains that
//! produce relocatable network modules, and host tooling.
//!
//! Nothing in here touches memory outside the slices it is given; the loader
//! crate owns everything that installs or executes a module.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod build;
pub mod entry;
pub mod error;
pub mod flags;
pub mod image;
pub mod observer;
pub mod tag;
