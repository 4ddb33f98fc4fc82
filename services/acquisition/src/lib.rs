//! # Lumos Acquisition
//!
//! Bulk scan acquisition on top of the device link: one bounded request /
//! reply cycle ([`Acquisition::run_cycle`]), payload decoding into a
//! [`PointSink`], a run driver for single and continuous modes, and a
//! [`VirtualDevice`] that stands in for hardware.

pub mod cycle;
pub mod error;
pub mod runner;
pub mod samples;
pub mod virtual_device;

pub use cycle::{Acquisition, CycleReport, CycleSettings};
pub use error::{AcquisitionError, Result};
pub use runner::{run, spawn_event_logger, RunMode, RunSummary};
pub use samples::{decode_samples, PointSink, ScanBuffer, ScanPoint};
pub use virtual_device::{ScanGenerator, ScanProfile, VirtualDevice};
