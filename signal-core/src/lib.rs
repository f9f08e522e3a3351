#![no_std]

// Control core for a standalone traffic-signal controller.
//
// Everything here is `no_std` and allocation free so the same scheduler and
// engine run unchanged inside the MCU firmware and the host emulator. Hardware
// is reached only through the small traits exposed by `store`, `clock` and
// `engine`.

pub mod calendar;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod inputs;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod telemetry;
