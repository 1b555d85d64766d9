//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (FCast wire protocol,
//! HLS, X11 display naming) and changing them would break interoperability.

// ─────────────────────────────────────────────────────────────────────────────
// FCast Wire Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Default TCP port an FCast receiver listens on.
pub const FCAST_DEFAULT_PORT: u16 = 46899;

/// mDNS service type FCast receivers advertise (trailing dot required by mdns-sd).
pub const FCAST_SERVICE_TYPE: &str = "_fcast._tcp.local.";

/// FCast packet opcode: start playback of a media URL.
pub const FCAST_OP_PLAY: u8 = 1;

/// FCast packet opcode: stop playback.
pub const FCAST_OP_STOP: u8 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// HLS Output
// ─────────────────────────────────────────────────────────────────────────────

/// MIME type announced to the receiver for HLS playlists.
pub const HLS_CONTAINER_MIME: &str = "application/vnd.apple.mpegurl";

/// File name of the master playlist inside a session directory.
pub const MASTER_PLAYLIST_NAME: &str = "index.m3u8";

/// File extension of media segments produced by the encoder.
pub const SEGMENT_EXTENSION: &str = "ts";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used as the default media title announced to receivers.
pub const APP_NAME: &str = "Pagecast";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "pagecast";
