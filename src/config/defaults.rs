//! System-wide default constants.
//!
//! Every tunable in `sync_config.toml` falls back to one of these values.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// OWEN Cloud API
// ============================================================================

/// Base URL of the OWEN Cloud REST API.
pub const API_URL: &str = "https://api.owencloud.ru/v1";

/// HTTP timeout for read calls (auth, device list, device parameters) in seconds.
pub const READ_TIMEOUT_SECS: u64 = 10;

/// HTTP transport timeout for parameter writes (seconds).
pub const WRITE_TRANSPORT_TIMEOUT_SECS: u64 = 15;

/// Server-side confirmation timeout sent in the write body (seconds).
///
/// Independent from the transport timeout: the cloud may accept the request
/// and still fail to confirm delivery to the device within this window.
pub const WRITE_CONFIRM_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Authentication
// ============================================================================

/// Token validity window measured from the local renewal time (seconds).
///
/// 1 080 = 18 minutes, conservative relative to the server-side expiry.
pub const TOKEN_TTL_SECS: u64 = 1_080;

// ============================================================================
// Polling
// ============================================================================

/// Poll interval inside the active window (milliseconds).
pub const ACTIVE_INTERVAL_MS: u64 = 300;

/// Poll interval outside the active window (seconds).
pub const IDLE_INTERVAL_SECS: u64 = 5;

/// Start of the active window, relative to the last accepted cycle (seconds).
pub const ACTIVE_WINDOW_START_SECS: u64 = 48;

/// End of the active window, relative to the last accepted cycle (seconds).
pub const ACTIVE_WINDOW_END_SECS: u64 = 72;

/// Minimum plausible measurement cycle (seconds). Faster changes are noise.
pub const MIN_CYCLE_SECS: u64 = 50;

/// Number of recent cycle durations kept for rolling statistics.
pub const CYCLE_HISTORY_LEN: usize = 10;

// ============================================================================
// Recovery
// ============================================================================

/// Consecutive snapshot fetch failures before the token is force-renewed.
pub const MAX_FETCH_ERRORS: u32 = 5;

/// Consecutive polls without the sync parameter before re-resolving ids.
pub const MAX_MISSING_SYNC: u32 = 3;

/// Cooldown after an unexpected iteration failure (seconds).
pub const ERROR_COOLDOWN_SECS: u64 = 5;

/// Approximate period of the idle status line (seconds).
pub const STATUS_LOG_PERIOD_SECS: u64 = 10;

// ============================================================================
// Storage
// ============================================================================

/// Directory holding the export, persisted device config and lock file.
pub const DATA_DIR: &str = "./data";

/// CSV export file name (inside `DATA_DIR`).
pub const CSV_FILE: &str = "owen_cloud_data.csv";

/// Persisted device configuration file name (inside `DATA_DIR`).
pub const DEVICE_CONFIG_FILE: &str = "owen_config.json";

/// Placeholder written for a parameter with no value in a snapshot.
pub const MISSING_VALUE: &str = "N/A";

// ============================================================================
// Dashboard
// ============================================================================

/// Dashboard bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:5000";

/// Default number of rows returned by the data endpoint.
pub const DASHBOARD_TABLE_ROWS: usize = 100;
