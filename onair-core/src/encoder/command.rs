//! ffmpeg invocation builder
//!
//! Pure argument assembly, kept apart from process handling so the exact
//! command line can be tested without an encoder installed.

use std::path::PathBuf;

use crate::config::{EncoderConfig, PathsConfig};
use crate::overlay::FilterGraph;
use crate::state::SourceKind;

/// Everything that varies between two encoder launches
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub kind: SourceKind,
    /// File path or URL. `None` selects a generated pattern.
    pub source: Option<&'a str>,
    pub overlay_inputs: &'a [PathBuf],
    pub filter: Option<&'a FilterGraph>,
}

fn push<I, S>(args: &mut Vec<String>, items: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.extend(items.into_iter().map(Into::into));
}

/// One lavfi input carrying both a video pattern and a tone, so input 0
/// always holds the main picture and audio and overlays start at input 1.
fn generated_input(args: &mut Vec<String>, config: &EncoderConfig, pattern: &str, frequency: u32) {
    let graph = format!(
        "{pattern}=size={}x{}:rate={}[out0];sine=frequency={frequency}[out1]",
        config.stream_width, config.stream_height, config.frame_rate
    );
    push(args, ["-f".to_string(), "lavfi".to_string(), "-i".to_string(), graph]);
}

fn input_clause(args: &mut Vec<String>, config: &EncoderConfig, kind: SourceKind, source: Option<&str>) {
    match (kind, source) {
        (SourceKind::Live, _) => match (&config.live_input_format, &config.live_input_device) {
            (Some(format), Some(device)) => {
                push(args, ["-f", format.as_str(), "-i", device.as_str()]);
            }
            _ => generated_input(args, config, "testsrc", 1000),
        },
        (SourceKind::Idle, Some(file)) => push(args, ["-stream_loop", "-1", "-i", file]),
        (SourceKind::RemoteUrl, Some(url)) => push(
            args,
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
                "-i",
                url,
            ],
        ),
        (SourceKind::Queue, Some(file)) => push(args, ["-i", file]),
        (_, None) => generated_input(args, config, "smptebars", 440),
    }
}

fn encoding_clause(args: &mut Vec<String>, config: &EncoderConfig) {
    let gop = config.gop_size.to_string();
    push(
        args,
        [
            "-c:v",
            "libx264",
            "-preset",
            config.video_preset.as_str(),
            "-tune",
            "zerolatency",
            "-b:v",
            config.video_bitrate.as_str(),
            "-maxrate",
            config.video_maxrate.as_str(),
            "-bufsize",
            config.video_bufsize.as_str(),
            "-g",
            gop.as_str(),
            "-keyint_min",
            gop.as_str(),
            "-sc_threshold",
            "0",
            "-c:a",
            "aac",
            "-b:a",
            config.audio_bitrate.as_str(),
        ],
    );
    push(
        args,
        [
            "-ar".to_string(),
            config.audio_sample_rate.to_string(),
            "-ac".to_string(),
            config.audio_channels.to_string(),
        ],
    );
}

fn hls_clause(args: &mut Vec<String>, config: &EncoderConfig, paths: &PathsConfig) {
    let segment_pattern = paths
        .active_dir
        .join(format!("segment%05d.{}", config.segment_extension));
    push(
        args,
        [
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            config.segment_duration_seconds.to_string(),
            "-hls_list_size".to_string(),
            config.playlist_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+append_list+program_date_time".to_string(),
            "-hls_segment_type".to_string(),
            "mpegts".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().into_owned(),
            "-start_number".to_string(),
            "0".to_string(),
            paths.playlist_path().to_string_lossy().into_owned(),
        ],
    );
}

/// Full ffmpeg argument list, program name excluded
#[must_use]
pub fn build_args(config: &EncoderConfig, paths: &PathsConfig, request: &EncodeRequest<'_>) -> Vec<String> {
    let mut args = vec!["-y".to_string()];

    input_clause(&mut args, config, request.kind, request.source);

    for image in request.overlay_inputs {
        push(&mut args, ["-i".to_string(), image.to_string_lossy().into_owned()]);
    }

    encoding_clause(&mut args, config);

    if let Some(filter) = request.filter {
        // Audio is optional: capture devices may have none
        push(
            &mut args,
            [
                "-filter_complex",
                filter.graph.as_str(),
                "-map",
                filter.output,
                "-map",
                "0:a?",
            ],
        );
    }

    hls_clause(&mut args, config, paths);
    args
}
