//! Frame capture and HLS packaging.
//!
//! [`encoder`] owns the ffmpeg subprocess that screen-grabs a virtual
//! display into a sliding-window HLS playlist; [`freshness`] inspects a
//! session directory to report how recently the encoder produced output.

pub mod encoder;
pub mod freshness;

pub use encoder::{build_command, EncoderError, EncoderHandle, HlsEncoder, HlsProfile};
pub use freshness::{FreshnessReport, SessionFreshness};
