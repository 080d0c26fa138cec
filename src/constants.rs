// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Directory name under the user config dir
pub const APP_DIR_NAME: &str = "camera-bridge";

/// Config file name inside [`APP_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Number of memory-mapped buffers queued on a V4L2 output stream
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// GPU device used when the config does not name one
pub const DEFAULT_GPU_DEVICE_INDEX: usize = 0;

/// Frame rate of the synthetic sensor
pub const DEFAULT_VIRTUAL_FRAMERATE: u32 = 30;

/// Log capture statistics every N frames
pub const FRAME_LOG_INTERVAL: u64 = 60;

/// Poll interval of the binary's wait loop
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process exit codes
pub mod exit_code {
    /// Run completed and every resource was released
    pub const CLEAN: u8 = 0;
    /// Setup failed; everything acquired so far was unwound
    pub const SETUP_FAILED: u8 = 1;
    /// Shutdown completed but at least one release step reported a warning
    pub const DEGRADED_SHUTDOWN: u8 = 2;
}
