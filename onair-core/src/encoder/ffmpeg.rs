use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;
use tracing as log;

use crate::config::{EncoderConfig, PathsConfig, ProgramNameConfig};
use crate::overlay::{chain_text, program_name_filter, OverlayProvider};
use crate::process::{run_captured, stderr_excerpt};
use crate::state::SourceKind;

use super::command::{build_args, EncodeRequest};
use super::{EncoderHandle, EncoderProcess, LaunchRequest, Liveness, Supervisor};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervisor spawning a real ffmpeg process per launch
pub struct FfmpegSupervisor {
    encoder: EncoderConfig,
    paths: PathsConfig,
    program_name: ProgramNameConfig,
    overlay: Arc<dyn OverlayProvider>,
}

impl FfmpegSupervisor {
    pub fn new(
        encoder: EncoderConfig,
        paths: PathsConfig,
        program_name: ProgramNameConfig,
        overlay: Arc<dyn OverlayProvider>,
    ) -> Self {
        Self {
            encoder,
            paths,
            program_name,
            overlay,
        }
    }

    /// Input to feed for `request`, `None` meaning a generated pattern
    fn effective_source(request: &LaunchRequest) -> Option<&str> {
        let source = request.source.as_deref()?;
        if request.kind == SourceKind::Idle && !Path::new(source).exists() {
            log::info!("Idle file {} not found, using generated SMPTE bars", source);
            return None;
        }
        Some(source)
    }

    fn spawn(&self, args: &[String]) -> std::io::Result<Child> {
        let stderr = if self.encoder.log_output {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        Command::new(&self.encoder.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
    }
}

#[async_trait]
impl Supervisor for FfmpegSupervisor {
    async fn start(&self, request: LaunchRequest) -> EncoderHandle {
        if request.source.is_none() && matches!(request.kind, SourceKind::Queue | SourceKind::RemoteUrl) {
            log::error!("No input given for {} source {}", request.kind, request.label);
            return EncoderHandle::new(request.kind, request.label, Box::new(FailedLaunch));
        }

        let overlay_inputs = self.overlay.overlay_inputs();
        let filter = chain_text(
            self.overlay.filter_graph(),
            program_name_filter(&self.program_name, &request.program_name),
        );
        let args = build_args(
            &self.encoder,
            &self.paths,
            &EncodeRequest {
                kind: request.kind,
                source: Self::effective_source(&request),
                overlay_inputs: &overlay_inputs,
                filter: filter.as_ref(),
            },
        );

        log::info!("Starting encoder: type={}, source={}", request.kind, request.label);
        log::debug!("Encoder command: {} {}", self.encoder.ffmpeg_path, args.join(" "));

        match self.spawn(&args) {
            Ok(mut child) => {
                let pid = child.id();
                log::info!("Encoder started, pid {:?}", pid);
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(forward_stderr(stderr, pid));
                }
                EncoderHandle::new(request.kind, request.label, Box::new(FfmpegProcess { child }))
            }
            Err(e) => {
                log::error!("Failed to launch {}: {}", self.encoder.ffmpeg_path, e);
                EncoderHandle::new(request.kind, request.label, Box::new(FailedLaunch))
            }
        }
    }

    fn stop_timeout(&self) -> Duration {
        self.encoder.stop_timeout()
    }

    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        let output = match run_captured(&self.encoder.ffprobe_path, &args, PROBE_TIMEOUT).await {
            Ok(output) => output,
            Err(e) => {
                log::warn!("ffprobe failed for {:?}: {}", path, e);
                return None;
            }
        };
        if !output.status.success() {
            log::warn!("ffprobe rejected {:?}: {}", path, stderr_excerpt(&output));
            return None;
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::debug!("ffmpeg[{:?}]: {}", pid, line.trim_end()),
            Ok(None) => break,
            Err(e) => {
                log::debug!("Stopped reading encoder output: {}", e);
                break;
            }
        }
    }
}

struct FfmpegProcess {
    child: Child,
}

impl FfmpegProcess {
    /// Polite stop request: SIGTERM where available
    fn request_stop(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(raw) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    log::warn!("Failed to send SIGTERM to encoder {}: {}", raw, e);
                }
                return;
            }
        }

        if let Err(e) = self.child.start_kill() {
            log::warn!("Failed to signal encoder: {}", e);
        }
    }
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_liveness(&mut self) -> Liveness {
        match self.child.try_wait() {
            Ok(None) => Liveness::Alive,
            Ok(Some(status)) => Liveness::Exited(status.code()),
            Err(e) => {
                log::warn!("Failed to poll encoder: {}", e);
                Liveness::Exited(None)
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        if !self.try_liveness().is_alive() {
            return;
        }

        self.request_stop();

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => log::info!("Encoder stopped: {}", status),
            Ok(Err(e)) => log::warn!("Failed waiting for encoder: {}", e),
            Err(_) => {
                log::warn!("Encoder did not stop within {:?}, killing", grace);
                if let Err(e) = self.child.kill().await {
                    log::error!("Failed to kill encoder: {}", e);
                }
            }
        }
    }
}

/// Stand-in for a process that could not be spawned
struct FailedLaunch;

#[async_trait]
impl EncoderProcess for FailedLaunch {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_liveness(&mut self) -> Liveness {
        Liveness::Exited(None)
    }

    async fn terminate(&mut self, _grace: Duration) {}
}
