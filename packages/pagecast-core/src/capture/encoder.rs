//! HLS encoder subprocess handle.
//!
//! Spawns ffmpeg to screen-grab a virtual display (and optionally capture a
//! named audio source) into fixed-duration segments plus a sliding-window
//! playlist inside the session directory. Old segments are deleted on
//! rotation; a master playlist is written alongside the variant playlist
//! for players that expect one.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::capture::freshness::SessionFreshness;
use crate::display::soft_terminate;
use crate::protocol_constants::MASTER_PLAYLIST_NAME;

/// Grace period between SIGTERM and SIGKILL when stopping the encoder.
///
/// Longer than the display grace: ffmpeg flushes the playlist on SIGTERM.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Errors produced by the encoder handle.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    /// `start` was called while the encoder is already running.
    #[error("encoder is already running")]
    AlreadyRunning,

    /// The encoder binary is missing or could not be spawned.
    #[error("Failed to spawn encoder: {0}")]
    Spawn(String),
}

/// Encoding profile for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlsProfile {
    /// Capture width; must match the display geometry.
    pub width: u32,
    /// Capture height; must match the display geometry.
    pub height: u32,
    /// Capture framerate.
    pub fps: u32,
    /// CBR video target, e.g. `3500k`. Also used as maxrate.
    pub video_bitrate: String,
    /// Whether to include an audio input.
    pub audio: bool,
    /// Audio source identifier.
    pub audio_device: String,
    /// Audio bitrate target.
    pub audio_bitrate: String,
    /// Segment target duration (seconds).
    pub segment_seconds: u32,
    /// Sliding-window size (number of segments kept in the playlist).
    pub list_size: u32,
    /// Freshness threshold for the watchdog (ms).
    pub stale_after_ms: u64,
}

impl Default for HlsProfile {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 15,
            video_bitrate: "3500k".to_string(),
            audio: false,
            audio_device: "default".to_string(),
            audio_bitrate: "128k".to_string(),
            segment_seconds: 2,
            list_size: 6,
            stale_after_ms: 8000,
        }
    }
}

impl HlsProfile {
    /// File name of the variant playlist for this profile.
    #[must_use]
    pub fn variant_playlist_name(&self) -> String {
        format!("variant_{}p.m3u8", self.height)
    }
}

/// Doubles a bitrate string like `3500k` for the VBV buffer size.
///
/// Falls back to doubling the numeric prefix when the unit suffix is absent.
fn double_bitrate(rate: &str) -> String {
    if let Some(number) = rate.strip_suffix('k') {
        if let Ok(n) = number.parse::<u64>() {
            return format!("{}k", n * 2);
        }
    }
    if let Some(number) = rate.strip_suffix('M') {
        if let Ok(n) = number.parse::<u64>() {
            return format!("{}M", n * 2);
        }
    }
    match rate.parse::<u64>() {
        Ok(n) => (n * 2).to_string(),
        Err(_) => rate.to_string(),
    }
}

/// Builds the ffmpeg argument vector for a capture profile.
///
/// Pure function of its inputs: repeat calls yield equal vectors. The GOP is
/// pinned to two seconds of frames with scene-cut detection disabled so every
/// segment starts on a keyframe.
#[must_use]
pub fn build_command(display: &str, out_dir: &Path, profile: &HlsProfile) -> Vec<String> {
    let gop = (profile.fps * 2).to_string();
    let variant = out_dir.join(profile.variant_playlist_name());

    let mut cmd: Vec<String> = vec![
        "ffmpeg".into(),
        "-loglevel".into(),
        "warning".into(),
        "-nostdin".into(),
        "-y".into(),
        "-f".into(),
        "x11grab".into(),
        "-framerate".into(),
        profile.fps.to_string(),
        "-video_size".into(),
        format!("{}x{}", profile.width, profile.height),
        "-i".into(),
        display.into(),
    ];

    if profile.audio {
        cmd.extend([
            "-f".into(),
            "pulse".into(),
            "-i".into(),
            profile.audio_device.clone(),
        ]);
    }

    cmd.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-b:v".into(),
        profile.video_bitrate.clone(),
        "-maxrate".into(),
        profile.video_bitrate.clone(),
        "-bufsize".into(),
        double_bitrate(&profile.video_bitrate),
        "-g".into(),
        gop.clone(),
        "-keyint_min".into(),
        gop,
        "-sc_threshold".into(),
        "0".into(),
    ]);

    if profile.audio {
        cmd.extend([
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            profile.audio_bitrate.clone(),
        ]);
    }

    cmd.extend([
        "-hls_time".into(),
        profile.segment_seconds.to_string(),
        "-hls_list_size".into(),
        profile.list_size.to_string(),
        "-hls_flags".into(),
        "delete_segments+independent_segments".into(),
        "-master_pl_name".into(),
        MASTER_PLAYLIST_NAME.into(),
        "-f".into(),
        "hls".into(),
        variant.to_string_lossy().into_owned(),
    ]);

    cmd
}

/// Seam between the orchestrator and the concrete encoder process.
#[async_trait]
pub trait EncoderHandle: Send {
    /// Starts the encoder. Not idempotent: fails with
    /// [`EncoderError::AlreadyRunning`] while a process is alive.
    async fn start(&mut self) -> Result<(), EncoderError>;

    /// Stops the encoder: soft-terminate, bounded wait, hard kill. Idempotent.
    async fn stop(&mut self);

    /// Age of the newest segment in the session directory, if any.
    fn freshness_ms(&self) -> Option<u64>;
}

/// Handle owning one spawned ffmpeg process.
pub struct HlsEncoder {
    display: String,
    out_dir: PathBuf,
    profile: HlsProfile,
    child: Option<Child>,
}

impl HlsEncoder {
    /// Creates a handle; nothing is spawned until [`EncoderHandle::start`].
    #[must_use]
    pub fn new(display: impl Into<String>, out_dir: impl Into<PathBuf>, profile: HlsProfile) -> Self {
        Self {
            display: display.into(),
            out_dir: out_dir.into(),
            profile,
            child: None,
        }
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl EncoderHandle for HlsEncoder {
    async fn start(&mut self) -> Result<(), EncoderError> {
        if self.is_running() {
            return Err(EncoderError::AlreadyRunning);
        }

        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| EncoderError::Spawn(format!("create {}: {e}", self.out_dir.display())))?;

        let args = build_command(&self.display, &self.out_dir, &self.profile);
        let child = Command::new(&args[0])
            .args(&args[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        log::info!(
            "[Encoder] ffmpeg started: display={}, out={}, pid={:?}",
            self.display,
            self.out_dir.display(),
            child.id()
        );
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        soft_terminate(&mut child, STOP_GRACE, &self.display, "ffmpeg").await;
    }

    fn freshness_ms(&self) -> Option<u64> {
        SessionFreshness::new(&self.out_dir, self.profile.stale_after_ms)
            .evaluate()
            .last_segment_age_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(fps: u32, bitrate: &str) -> HlsProfile {
        HlsProfile {
            width: 1920,
            height: 1080,
            fps,
            video_bitrate: bitrate.to_string(),
            ..HlsProfile::default()
        }
    }

    #[test]
    fn build_command_is_deterministic() {
        let prof = profile(15, "3500k");
        let dir = PathBuf::from("/tmp/session");
        let a = build_command(":99", &dir, &prof);
        let b = build_command(":99", &dir, &prof);
        assert_eq!(a, b);
    }

    #[test]
    fn build_command_grabs_the_display() {
        let cmd = build_command(":99", Path::new("/tmp/s"), &profile(15, "1500k"));
        assert_eq!(&cmd[..2], &["ffmpeg".to_string(), "-loglevel".to_string()]);
        assert!(cmd.contains(&"x11grab".to_string()));
        let i = cmd.iter().position(|a| a == "-i").unwrap();
        assert_eq!(cmd[i + 1], ":99");
    }

    #[test]
    fn build_command_derives_bufsize_and_gop() {
        let cmd = build_command(":99", Path::new("/tmp/s"), &profile(15, "3500k"));

        let bufsize = cmd.iter().position(|a| a == "-bufsize").unwrap();
        assert_eq!(cmd[bufsize + 1], "7000k");

        let gop = cmd.iter().position(|a| a == "-g").unwrap();
        assert_eq!(cmd[gop + 1], "30");
        let keyint = cmd.iter().position(|a| a == "-keyint_min").unwrap();
        assert_eq!(cmd[keyint + 1], "30");

        let sc = cmd.iter().position(|a| a == "-sc_threshold").unwrap();
        assert_eq!(cmd[sc + 1], "0");
    }

    #[test]
    fn build_command_derivations_hold_across_profiles() {
        for (fps, rate, bufsize, gop) in [
            (15u32, "1500k", "3000k", "30"),
            (30, "3500k", "7000k", "60"),
            (24, "8M", "16M", "48"),
        ] {
            let cmd = build_command(":0", Path::new("/s"), &profile(fps, rate));
            let b = cmd.iter().position(|a| a == "-bufsize").unwrap();
            assert_eq!(cmd[b + 1], bufsize, "bufsize for {rate}");
            let g = cmd.iter().position(|a| a == "-g").unwrap();
            assert_eq!(cmd[g + 1], gop, "gop for {fps}fps");
        }
    }

    #[test]
    fn build_command_names_playlists() {
        let cmd = build_command(":99", Path::new("/tmp/s"), &profile(15, "3500k"));
        assert!(cmd.contains(&"/tmp/s/variant_1080p.m3u8".to_string()));
        let master = cmd.iter().position(|a| a == "-master_pl_name").unwrap();
        assert_eq!(cmd[master + 1], "index.m3u8");
    }

    #[test]
    fn build_command_without_audio_has_no_audio_codec() {
        let cmd = build_command(":99", Path::new("/tmp/s"), &profile(15, "3500k"));
        assert!(!cmd.contains(&"pulse".to_string()));
        assert!(!cmd.contains(&"-c:a".to_string()));
    }

    #[test]
    fn build_command_with_audio_adds_pulse_input() {
        let mut prof = profile(15, "3500k");
        prof.audio = true;
        prof.audio_device = "pulse_monitor".to_string();
        let cmd = build_command(":99", Path::new("/tmp/s"), &prof);

        assert!(cmd.contains(&"pulse".to_string()));
        assert!(cmd.contains(&"pulse_monitor".to_string()));
        let ca = cmd.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(cmd[ca + 1], "aac");
    }

    #[test]
    fn variant_playlist_name_tracks_height() {
        let mut prof = HlsProfile::default();
        prof.height = 720;
        assert_eq!(prof.variant_playlist_name(), "variant_720p.m3u8");
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut enc = HlsEncoder::new(":99", "/tmp/nonexistent-session", HlsProfile::default());
        enc.stop().await;
        enc.stop().await;
    }
}
