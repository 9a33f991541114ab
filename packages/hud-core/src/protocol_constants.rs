//! Fixed protocol constants that should NOT be changed at runtime.
//!
//! Unlike [`crate::config::Config`], these values are structural: they are
//! baked into the wire formats and the DSP math itself, not tuning knobs an
//! operator would reasonably want to override.

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Default bind address for the WebSocket listener.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default bind port for the WebSocket listener.
pub const DEFAULT_BIND_PORT: u16 = 8765;

/// Maximum accepted WebSocket message size (bytes).
pub const MAX_WS_MESSAGE_BYTES: usize = 2 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Default PCM sample rate for front-mic and phone-mic ingress (Hz).
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Default frame duration for audio ingress (ms).
pub const DEFAULT_FRAME_MS: u32 = 20;

/// Default channel count assumed for a front mic.
pub const DEFAULT_FRONT_CHANNELS: u16 = 1;

/// Per-connection queue depth for both the STT feed and the analysis feed.
///
/// 200 frames at 20 ms framing is roughly 4 s of audio — the backpressure
/// ceiling before drop-oldest kicks in.
pub const AUDIO_QUEUE_CAPACITY: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Sample Ring
// ─────────────────────────────────────────────────────────────────────────────

/// Sample ring capacity: 0.5 s at 16 kHz.
pub const SAMPLE_RING_MAX_SAMPLES: usize = 8_000;

// ─────────────────────────────────────────────────────────────────────────────
// Freshness & Loop Cadence
// ─────────────────────────────────────────────────────────────────────────────

/// A mic or pose source is considered stale after this many milliseconds
/// without an update.
pub const FRESHNESS_TIMEOUT_MS: u64 = 1_000;

/// Direction loop tick period (20 Hz).
pub const DIRECTION_TICK_MS: u64 = 50;

/// Radar track "update" cadence, gated off the direction loop (5 Hz).
pub const RADAR_UPDATE_EVERY_MS: u64 = 200;

/// Minimum window length for the radar FFT (samples).
pub const RADAR_MIN_WINDOW_SAMPLES: usize = 2_048;

/// A radar track is dropped if unrefreshed for longer than this (seconds).
pub const RADAR_TRACK_MAX_AGE_S: f32 = 3.0;

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the `/events` broadcast channel.
pub const EVENTS_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the `/stt` broadcast channel.
pub const STT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket heartbeat timeout (seconds) — HUD/STT client connections.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// External Haptics
// ─────────────────────────────────────────────────────────────────────────────

/// Per-side haptics outbound queue depth.
pub const HAPTICS_QUEUE_CAPACITY: usize = 10;

/// Maximum allowed buzz duration sent to a haptic end device (ms).
pub const HAPTICS_MAX_DURATION_MS: u32 = 60_000;

/// Maximum allowed buzz intensity sent to a haptic end device.
pub const HAPTICS_MAX_INTENSITY: u16 = 255;

// ─────────────────────────────────────────────────────────────────────────────
// Reconnect Backoff (STT, haptics)
// ─────────────────────────────────────────────────────────────────────────────

/// Starting backoff delay before the first reconnect attempt (seconds).
pub const BACKOFF_START_SECS: f64 = 0.5;

/// Backoff growth multiplier lower bound.
pub const BACKOFF_MULTIPLIER_MIN: f64 = 1.7;

/// Backoff growth multiplier upper bound.
pub const BACKOFF_MULTIPLIER_MAX: f64 = 1.8;

/// Backoff delay cap (seconds).
pub const BACKOFF_CAP_SECS: f64 = 5.0;

/// Maximum uniform jitter added on top of the backoff delay (seconds).
pub const BACKOFF_JITTER_MAX_SECS: f64 = 0.2;

/// STT connector WebSocket ping interval/timeout (seconds).
pub const STT_PING_INTERVAL_SECS: u64 = 20;

/// Haptics connect timeout — small embedded devices get a longer grace period.
pub const HAPTICS_CONNECT_TIMEOUT_SECS: u64 = 15;

/// STT connect timeout (seconds).
pub const STT_CONNECT_TIMEOUT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Rate-limited logging
// ─────────────────────────────────────────────────────────────────────────────

/// Number of per-connection framing warnings logged before the rate limit
/// kicks in (see [`crate::ingress`]).
pub const RATE_LIMIT_LOG_BURST: u64 = 3;

/// After the burst, only every Nth subsequent warning is logged.
pub const RATE_LIMIT_LOG_STRIDE: u64 = 50;
