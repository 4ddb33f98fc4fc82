//! Link and acquisition defaults
//!
//! Default configuration values shared by the loader and the binary.

/// Device link defaults
pub mod link {
    /// Medium used when none is configured
    pub const MEDIUM: &str = "tcp";

    /// Device address (loopback)
    pub const ADDRESS: &str = "127.0.0.1";

    /// Device port
    pub const PORT: u32 = 2111;

    /// Quiet period that ends a receive (milliseconds)
    pub const READ_GAP_MS: u64 = 50;

    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 1_000;

    /// Close timeout (milliseconds)
    pub const CLOSE_TIMEOUT_MS: u64 = 1_000;

    /// Liveness watchdog interval (milliseconds, 0 disables)
    pub const WATCHDOG_MS: u64 = 1_000;

    /// Media the loader accepts
    pub const MEDIA: [&str; 5] = ["tcp", "udp", "serial", "com", "virtual"];
}

/// Acquisition cycle defaults
pub mod acquisition {
    /// Data type requesting the trailing result block
    pub const DATA_TYPE: u16 = 4;

    pub const START_ADDRESS: u16 = 0;

    /// Words per bulk request
    pub const WORD_COUNT: u16 = 2400;

    /// Distance channels per sample record
    pub const CHANNELS: usize = 1;

    /// Request send timeout (milliseconds)
    pub const SEND_TIMEOUT_MS: u64 = 1_000;

    /// Inbox polls before giving up on a signalled reply
    pub const INBOX_ATTEMPTS: u32 = 50;

    /// Wait per inbox poll (milliseconds)
    pub const INBOX_WAIT_MS: u64 = 30;

    /// Receive timeout once data was signalled (milliseconds)
    pub const RECV_TIMEOUT_SIGNALED_MS: u64 = 300;

    /// Receive timeout when no data was signalled (milliseconds)
    pub const RECV_TIMEOUT_FALLBACK_MS: u64 = 100;

    /// Pace of continuous acquisition (milliseconds)
    pub const INTERVAL_MS: u64 = 100;

    /// Stale-byte drains before each request
    pub const DRAIN_STALE: u32 = 4;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}
