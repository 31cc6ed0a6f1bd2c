use super::{PassKind, PassRequest, TargetProfile, Transcoder};
use crate::config::HwAccel;
use crate::error::Result;
use std::path::PathBuf;
use tracing::debug;
use vintagecast_av::{probe, scale::fit_within_pixels, FfmpegCommand};

/// [`Transcoder`] backed by the ffmpeg and ffprobe command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    hw_accel: HwAccel,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, hw_accel: HwAccel) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            hw_accel,
        }
    }

    /// Arguments after the global flags for a pass scaled to `width` x `height`.
    pub fn build_args(&self, request: &PassRequest<'_>, width: u32, height: u32) -> Vec<String> {
        let profile = request.profile;
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        if request.kind == PassKind::Intermediate {
            match self.hw_accel {
                HwAccel::Nvenc => push(&["-hwaccel", "cuda"]),
                HwAccel::Videotoolbox => push(&["-hwaccel", "videotoolbox"]),
            }
        }

        let source = request.source.to_string_lossy().into_owned();
        push(&["-i", source.as_str(), "-map", "0:v:0"]);
        if request.kind == PassKind::Intermediate || profile.audio {
            push(&["-map", "0:a:0?"]);
        }

        let frame_rate = profile.frame_rate.to_string();
        match request.kind {
            PassKind::Intermediate => {
                match self.hw_accel {
                    HwAccel::Nvenc => push(&["-c:v", "h264_nvenc", "-preset", "p5"]),
                    HwAccel::Videotoolbox => push(&["-c:v", "h264_videotoolbox", "-b:v", "4000k"]),
                }
                let filter = format!("scale={width}:{height}");
                push(&["-vf", filter.as_str(), "-r", frame_rate.as_str()]);
                push(&["-c:a", "aac", "-b:a", "128k", "-f", "mp4"]);
            }
            PassKind::Single | PassKind::Final => {
                match &profile.video_bitrate {
                    Some(bitrate) => push(&["-c:v", "mpeg4", "-b:v", bitrate.as_str()]),
                    None => push(&["-c:v", "mpeg4", "-q:v", "5"]),
                }
                let filter = device_filter(profile, width, height);
                push(&["-vf", filter.as_str(), "-r", frame_rate.as_str()]);
                if profile.audio {
                    push(&["-c:a", "adpcm_ima_qt", "-ar", "44100", "-ac", "1"]);
                } else {
                    push(&["-an"]);
                }
                push(&["-movflags", "+faststart", "-f", "mov"]);
            }
        }

        let output = request.output.to_string_lossy().into_owned();
        push(&[output.as_str()]);
        args
    }
}

fn device_filter(profile: &TargetProfile, width: u32, height: u32) -> String {
    let scale = format!("scale={width}:{height}:flags=lanczos");
    if profile.reduced_palette {
        format!("format=rgb565,format=yuv420p,{scale}")
    } else {
        format!("{scale},format=yuv420p")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn run_pass(&self, request: &PassRequest<'_>, progress: &mut dyn FnMut(f64)) -> Result<()> {
        let info = probe::probe(&self.ffprobe, request.source)?;
        let (width, height) = fit_within_pixels(info.width, info.height, request.profile.max_pixels);
        let args = self.build_args(request, width, height);

        debug!(
            source = %request.source.display(),
            kind = ?request.kind,
            width,
            height,
            "Running transcode pass"
        );

        FfmpegCommand::new(&self.ffmpeg)
            .args(args)
            .run_with_progress(info.duration_secs, progress)?;
        Ok(())
    }
}
