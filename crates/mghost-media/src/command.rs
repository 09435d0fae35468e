//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Well-known install locations checked when a binary is not on `PATH`.
const BUNDLED_DIRS: &[&str] = &["./ffmpeg/bin", "../ffmpeg/bin", "C:/ffmpeg/bin", "/usr/bin"];

/// Maximum stderr bytes kept on failure.
const STDERR_TAIL: usize = 2000;

/// Builder for FFmpeg commands with one or more inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input files, each with the arguments placed before its `-i`
    inputs: Vec<(Vec<String>, PathBuf)>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command with a single input.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![(Vec::new(), input.as_ref().to_path_buf())],
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add another input file.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push((Vec::new(), input.as_ref().to_path_buf()));
        self
    }

    /// Add an argument placed before the most recently added input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some((args, _)) = self.inputs.last_mut() {
            args.push(arg.into());
        }
        self
    }

    /// Add output arguments (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Copy every mapped stream without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_args(["-c", "copy"])
    }

    /// Map a stream specifier (e.g. `0:v:0`) into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Stop at the end of the shortest stream.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push("error".to_string());

        for (input_args, input) in &self.inputs {
            args.extend(input_args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with a bounded execution time.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// FFmpeg binary
    binary: PathBuf,
    /// Timeout
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner for the given FFmpeg binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command; non-zero exit and timeout are errors.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut command = Command::new(&self.binary);
        command.args(&args);

        let output = run_with_timeout(command, self.timeout).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail(&output.stderr)),
                output.status.code(),
            ))
        }
    }
}

/// Spawn a command with piped output and wait for it, killing it when the
/// timeout elapses.
pub async fn run_with_timeout(mut command: Command, timeout: Option<Duration>) -> MediaResult<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;
    let wait = child.wait_with_output();

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                // Dropping the future drops the child, which kills it.
                warn!("Subprocess timed out after {:?}, killing process", limit);
                Err(MediaError::Timeout(limit.as_secs()))
            }
        },
        None => Ok(wait.await?),
    }
}

/// Last part of a stderr buffer, lossily decoded.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Locate a binary: explicit override, then `PATH`, then bundled locations.
pub fn resolve_binary(name: &str, override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return path.exists().then(|| path.to_path_buf());
    }

    if let Ok(path) = which::which(name) {
        return Some(path);
    }

    BUNDLED_DIRS.iter().find_map(|dir| {
        [name.to_string(), format!("{}.exe", name)]
            .into_iter()
            .map(|file| Path::new(dir).join(file))
            .find(|p| p.exists())
    })
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    resolve_binary("ffmpeg", None).ok_or_else(|| MediaError::FfmpegNotFound("ffmpeg".into()))
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    resolve_binary("ffprobe", None).ok_or_else(|| MediaError::FfprobeNotFound("ffprobe".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_single_input() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4").video_codec("mpeg4");

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"mpeg4".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_command_builder_two_inputs_in_order() {
        let args = FfmpegCommand::new("video.mp4", "out.mp4")
            .add_input("source.mp4")
            .input_arg("-thread_queue_size")
            .input_arg("512")
            .build_args();

        let first = args.iter().position(|a| a == "video.mp4").unwrap();
        let queue = args.iter().position(|a| a == "-thread_queue_size").unwrap();
        let second = args.iter().position(|a| a == "source.mp4").unwrap();
        assert!(first < queue && queue < second);
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = vec![b'x'; STDERR_TAIL * 2];
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL);
        assert_eq!(stderr_tail(b"  short \n"), "short");
    }

    #[test]
    fn test_resolve_binary_override_missing() {
        assert!(resolve_binary("ffmpeg", Some(Path::new("/nonexistent/ffmpeg"))).is_none());
    }

    #[tokio::test]
    async fn test_run_with_timeout_kills_slow_process() {
        if which::which("sleep").is_err() {
            return;
        }
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_with_timeout(cmd, Some(Duration::from_millis(100))).await;
        assert!(matches!(result, Err(MediaError::Timeout(_))));
    }
}
