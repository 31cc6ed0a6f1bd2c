use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vintagecast_av::MediaTool;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub slideshow: SlideshowConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Config {
    /// Directory holding every cached artifact and the index document.
    pub fn cache_dir(&self) -> PathBuf {
        self.server
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.server.media_root.join("_vintagecast_cache"))
    }

    /// Directory generated images are written to.
    pub fn generated_dir(&self) -> PathBuf {
        self.server
            .generated_dir
            .clone()
            .unwrap_or_else(|| self.server.media_root.join("_generated"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Root of the media tree served to clients and walked by the crawler
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Cache directory (default: `<media_root>/_vintagecast_cache`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Generated image directory (default: `<media_root>/_generated`)
    #[serde(default)]
    pub generated_dir: Option<PathBuf>,
}

fn default_media_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            cache_dir: None,
            generated_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

impl ToolsConfig {
    /// Configured executable for `tool`, if any.
    pub fn path_for(&self, tool: MediaTool) -> Option<&Path> {
        match tool {
            MediaTool::Ffmpeg => self.ffmpeg_path.as_deref(),
            MediaTool::Ffprobe => self.ffprobe_path.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Seconds between background saves of a dirty index
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
        }
    }
}

/// How a video is turned into a device artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStrategy {
    /// One CPU encode straight to the device format.
    #[default]
    SinglePass,
    /// Hardware-accelerated downscale to an intermediate, then the device encode.
    TwoPass,
}

/// Hardware encoder used for the first pass of a two-pass transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HwAccel {
    #[default]
    Nvenc,
    Videotoolbox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub strategy: TranscodeStrategy,

    #[serde(default)]
    pub hw_accel: HwAccel,

    /// Pixel area budget of the device decoder (default: 346x260)
    #[serde(default = "default_transcode_max_pixels")]
    pub max_pixels: u32,

    #[serde(default = "default_transcode_frame_rate")]
    pub frame_rate: u32,

    /// Quantize through RGB565 before encoding, matching 16-bit displays
    #[serde(default = "default_true")]
    pub reduced_palette: bool,

    /// Idle poll interval of the scheduler in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_transcode_max_pixels() -> u32 {
    346 * 260
}
fn default_transcode_frame_rate() -> u32 {
    19
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            strategy: TranscodeStrategy::default(),
            hw_accel: HwAccel::default(),
            max_pixels: default_transcode_max_pixels(),
            frame_rate: default_transcode_frame_rate(),
            reduced_palette: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TranscodeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_max_pixels")]
    pub max_pixels: u32,

    #[serde(default = "default_preview_frame_rate")]
    pub frame_rate: u32,

    #[serde(default = "default_preview_bitrate")]
    pub video_bitrate: String,
}

fn default_preview_max_pixels() -> u32 {
    266 * 200
}
fn default_preview_frame_rate() -> u32 {
    16
}
fn default_preview_bitrate() -> String {
    "300k".to_string()
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_pixels: default_preview_max_pixels(),
            frame_rate: default_preview_frame_rate(),
            video_bitrate: default_preview_bitrate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlideshowConfig {
    #[serde(default = "default_slideshow_max_pixels")]
    pub max_pixels: u32,

    /// Items converted per pre-transcode batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Start the next batch when the viewer is this close to the cursor
    #[serde(default = "default_trigger_distance")]
    pub trigger_distance: usize,

    #[serde(default = "default_slideshow_quality")]
    pub jpeg_quality: u8,
}

fn default_slideshow_max_pixels() -> u32 {
    589_824
}
fn default_batch_size() -> usize {
    20
}
fn default_trigger_distance() -> usize {
    5
}
fn default_slideshow_quality() -> u8 {
    85
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            max_pixels: default_slideshow_max_pixels(),
            batch_size: default_batch_size(),
            trigger_distance: default_trigger_distance(),
            jpeg_quality: default_slideshow_quality(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,

    #[serde(default = "default_thumbnail_quality")]
    pub jpeg_quality: u8,

    /// Offset of the representative video frame
    #[serde(default = "default_frame_offset")]
    pub frame_offset_secs: f64,

    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
}

fn default_thumbnail_width() -> u32 {
    200
}
fn default_thumbnail_quality() -> u8 {
    80
}
fn default_frame_offset() -> f64 {
    10.0
}
fn default_frame_timeout() -> u64 {
    10
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_thumbnail_width(),
            jpeg_quality: default_thumbnail_quality(),
            frame_offset_secs: default_frame_offset(),
            frame_timeout_secs: default_frame_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_start_delay")]
    pub start_delay_secs: u64,

    /// Pause between items so the crawler never saturates the disk
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,

    /// Sleep between full passes over the media tree
    #[serde(default = "default_pass_interval")]
    pub pass_interval_secs: u64,
}

fn default_start_delay() -> u64 {
    5
}
fn default_item_delay() -> u64 {
    100
}
fn default_pass_interval() -> u64 {
    900
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_secs: default_start_delay(),
            item_delay_ms: default_item_delay(),
            pass_interval_secs: default_pass_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// host:port of the ComfyUI instance
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// Checkpoint selected for new sessions
    #[serde(default)]
    pub default_model: String,

    /// Wait this long for a notification before sending a keep-alive ping
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_generation_endpoint() -> String {
    "127.0.0.1:8188".to_string()
}
fn default_heartbeat() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_generation_endpoint(),
            default_model: String::new(),
            heartbeat_secs: default_heartbeat(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
