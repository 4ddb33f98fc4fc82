//! # Lumos Configuration
//!
//! Settings for the device link, the acquisition cycle and logging.
//!
//! ## Usage
//!
//! ```rust
//! use lumos_config::{defaults, LumosConfig};
//!
//! let config = LumosConfig::default();
//! assert_eq!(config.acquisition.word_count, defaults::acquisition::WORD_COUNT);
//! ```

pub mod defaults;
pub mod lumos_config;

// Re-export commonly used types
pub use lumos_config::{AcquisitionSettings, LinkSettings, LoggingSettings, LumosConfig, ENV_PREFIX};
