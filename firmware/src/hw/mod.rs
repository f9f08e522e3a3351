//! Board adapters implementing the `signal-core` I/O traits.
//!
//! The pure parts (page shadowing, port gating, year conversion) build and
//! test on the host; the peripheral wrappers only exist on the target.

pub mod clock;
pub mod outputs;
pub mod store;

#[cfg(target_os = "none")]
pub mod watchdog;
