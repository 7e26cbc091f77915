use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub encoder: EncoderConfig,
    pub lifecycle: LifecycleConfig,
    pub orchestrator: OrchestratorConfig,
    pub overlay: OverlayConfig,
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

/// Filesystem layout owned by the playout core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory the encoder writes segments and the playlist into
    pub active_dir: PathBuf,
    /// Staging area for segments past the active cap
    pub trash_dir: PathBuf,
    /// Playlist file name inside `active_dir`
    pub playlist_name: String,
    /// Directory holding uploaded files referenced by the queue
    pub upload_dir: PathBuf,
    /// Segment ledger (JSON keyed record store)
    pub ledger_file: PathBuf,
    /// Looped filler played when nothing else is scheduled
    pub idle_source: PathBuf,
    /// Remove leftover segments from `active_dir` at startup
    pub purge_on_startup: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            active_dir: PathBuf::from("static/hls"),
            trash_dir: PathBuf::from("static/hls/trash"),
            playlist_name: "stream.m3u8".to_string(),
            upload_dir: PathBuf::from("videos"),
            ledger_file: PathBuf::from("static/hls/segments_metadata.json"),
            idle_source: PathBuf::from("idle.mp4"),
            purge_on_startup: true,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn playlist_path(&self) -> PathBuf {
        self.active_dir.join(&self.playlist_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    // Video
    pub video_preset: String,
    pub video_bitrate: String,
    pub video_maxrate: String,
    pub video_bufsize: String,
    /// Keyframe interval in frames
    pub gop_size: u32,
    pub stream_width: u32,
    pub stream_height: u32,
    pub frame_rate: u32,

    // Audio
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,

    // HLS output
    pub segment_duration_seconds: u32,
    pub playlist_size: u32,
    pub segment_extension: String,

    /// Capture device for live mode (e.g. `v4l2` + `/dev/video0`).
    /// When unset, live mode feeds a generated test pattern.
    pub live_input_format: Option<String>,
    pub live_input_device: Option<String>,

    /// Grace period between SIGTERM and force-kill
    pub stop_timeout_ms: u64,
    /// Forward encoder stderr into the log at debug level
    pub log_output: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_preset: "veryfast".to_string(),
            video_bitrate: "2500k".to_string(),
            video_maxrate: "3000k".to_string(),
            video_bufsize: "6000k".to_string(),
            gop_size: 60, // 2 seconds at 30fps
            stream_width: 1280,
            stream_height: 720,
            frame_rate: 30,
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            audio_channels: 2,
            segment_duration_seconds: 2,
            playlist_size: 10,
            segment_extension: "ts".to_string(),
            live_input_format: None,
            live_input_device: None,
            stop_timeout_ms: 2000,
            log_output: false,
        }
    }
}

impl EncoderConfig {
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Maximum number of segments kept in the active directory
    pub max_active_segments: usize,
    /// Time a segment stays in trash before permanent deletion
    pub retention_seconds: u64,
    pub cap_interval_seconds: u64,
    pub retention_check_interval_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_active_segments: 50,
            retention_seconds: 3600, // 1 hour
            cap_interval_seconds: 10,
            retention_check_interval_seconds: 10,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    #[must_use]
    pub const fn cap_interval(&self) -> Duration {
        Duration::from_secs(self.cap_interval_seconds)
    }

    #[must_use]
    pub const fn retention_check_interval(&self) -> Duration {
        Duration::from_secs(self.retention_check_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub tick_millis: u64,
    pub discovery_tick_millis: u64,
    /// Extra delay after a failed content resolution
    pub resolver_backoff_seconds: u64,
    pub resolver_timeout_seconds: u64,
    /// Initial auto-mode setting
    pub auto_mode: bool,
    /// First entry is the initial hashtag
    pub hashtags: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            discovery_tick_millis: 1000,
            resolver_backoff_seconds: 5,
            resolver_timeout_seconds: 30,
            auto_mode: false,
            hashtags: vec![
                "funny".to_string(),
                "dance".to_string(),
                "comedy".to_string(),
                "trending".to_string(),
            ],
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    #[must_use]
    pub const fn discovery_tick(&self) -> Duration {
        Duration::from_millis(self.discovery_tick_millis)
    }

    #[must_use]
    pub const fn resolver_backoff(&self) -> Duration {
        Duration::from_secs(self.resolver_backoff_seconds)
    }

    #[must_use]
    pub const fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_seconds)
    }

    #[must_use]
    pub fn initial_hashtag(&self) -> String {
        self.hashtags
            .first()
            .cloned()
            .unwrap_or_else(|| "trending".to_string())
    }
}

/// Image and text overlays burned into the output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub logo_enabled: bool,
    pub banner_enabled: bool,
    pub logo_path: PathBuf,
    pub banner_path: PathBuf,
    /// Logo: top-left corner with padding
    pub logo_x: i32,
    pub logo_y: i32,
    /// Banner: bottom of screen, offset in pixels from the bottom edge
    pub banner_x: i32,
    pub banner_bottom_offset: i32,
    pub program_name: ProgramNameConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logo_enabled: true,
            banner_enabled: true,
            logo_path: PathBuf::from("overlays/logo.png"),
            banner_path: PathBuf::from("overlays/banner.png"),
            logo_x: 10,
            logo_y: 10,
            banner_x: 0,
            banner_bottom_offset: 10,
            program_name: ProgramNameConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramNameConfig {
    pub enabled: bool,
    pub font_path: PathBuf,
    pub font_size: u32,
    pub font_color: String,
    pub box_color: String,
    pub box_border_width: u32,
    /// ffmpeg expressions; default is top-right
    pub x: String,
    pub y: String,
}

impl Default for ProgramNameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            font_path: PathBuf::from("arial.ttf"),
            font_size: 24,
            font_color: "white".to_string(),
            box_color: "black@0.0".to_string(),
            box_border_width: 5,
            x: "w-tw-10".to_string(),
            y: "10".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub enabled: bool,
    pub ytdlp_path: String,
    /// Number of search results to pick from
    pub search_results: u32,
    /// Format selector for a combined audio+video stream
    pub format: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ytdlp_path: "yt-dlp".to_string(),
            search_results: 10,
            format: "best[ext=mp4]/best".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ONAIR_LIFECYCLE__MAX_ACTIVE_SEGMENTS=100, ONAIR_ENCODER__FFMPEG_PATH=...
        builder = builder.add_source(
            Environment::with_prefix("ONAIR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for values the playout loops cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.lifecycle.max_active_segments == 0 {
            errors.push("lifecycle.max_active_segments must be greater than 0".to_string());
        }
        if self.lifecycle.cap_interval_seconds == 0 {
            errors.push("lifecycle.cap_interval_seconds must be greater than 0".to_string());
        }
        if self.lifecycle.retention_check_interval_seconds == 0 {
            errors.push(
                "lifecycle.retention_check_interval_seconds must be greater than 0".to_string(),
            );
        }
        if self.orchestrator.tick_millis == 0 {
            errors.push("orchestrator.tick_millis must be greater than 0".to_string());
        }
        if self.orchestrator.discovery_tick_millis == 0 {
            errors.push("orchestrator.discovery_tick_millis must be greater than 0".to_string());
        }
        if self.encoder.segment_duration_seconds == 0 {
            errors.push("encoder.segment_duration_seconds must be greater than 0".to_string());
        }
        if self.encoder.playlist_size == 0 {
            errors.push("encoder.playlist_size must be greater than 0".to_string());
        }
        if self.encoder.segment_extension.is_empty() {
            errors.push("encoder.segment_extension must not be empty".to_string());
        }
        if self.encoder.ffmpeg_path.is_empty() {
            errors.push("encoder.ffmpeg_path must not be empty".to_string());
        }
        if self.encoder.live_input_device.is_some() != self.encoder.live_input_format.is_some() {
            errors.push(
                "encoder.live_input_format and encoder.live_input_device must be set together"
                    .to_string(),
            );
        }
        if self.paths.trash_dir == self.paths.active_dir {
            errors.push("paths.trash_dir must differ from paths.active_dir".to_string());
        }
        if self.paths.playlist_name.is_empty() {
            errors.push("paths.playlist_name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
