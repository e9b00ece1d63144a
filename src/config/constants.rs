//! Engine-level configuration defaults and ini section/key names.

/// CLI/daemon logging output format, shared with `log4rs` bring-up.
pub const LOG_FORMAT: &str = "[{d(%Y-%m-%d %H:%M:%S %Z)(utc)}][{l}][{t}][{X(tid)(main)}] {m}{n}";

/// Debounce window between a burst of state mutations and the render pass
/// the kernel schedules for subscribers (spec §4.G, "debounced render").
pub const DEFAULT_RENDER_DEBOUNCE_MS: u64 = 90;

/// Interval at which the progress aggregator recomputes `total_progress`
/// from in-progress files (spec §4.F).
pub const DEFAULT_PROGRESS_THROTTLE_MS: u64 = 500;

/// Default concurrency limit for the uploader pool (spec §5, "Concurrency
/// Limiter").
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 6;

/// Default HTTP request timeout for the direct uploader.
pub const DEFAULT_XHR_TIMEOUT_MS: u64 = 30_000;

/// Default multipart field name the direct uploader attaches file bytes
/// under, mirroring the common `files[]` convention.
pub const DEFAULT_XHR_FIELD_NAME: &str = "files[]";

/// Backoff schedule for automatic upload retries (spec §4.H, `retryUpload`).
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 4] = [0, 1_000, 3_000, 5_000];

/// Whether `upload()` may be called again while a batch is already running
/// (spec §4.G, `allowMultipleUploads`).
pub const DEFAULT_ALLOW_MULTIPLE_UPLOADS: bool = true;

pub const ENGINE_SECTION: &str = "engine";
pub const RESTRICTIONS_SECTION: &str = "restrictions";
pub const XHR_SECTION: &str = "xhr";
pub const COMPANION_SECTION: &str = "companion";
