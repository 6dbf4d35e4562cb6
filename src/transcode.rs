#![forbid(unsafe_code)]

//! Audio transcoding boundary plus the `ffmpeg` implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio_util::sync::CancellationToken;

use crate::error::TranscodeError;
use crate::process::{RunError, program_name, run_cancellable};

pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
/// Bitrate of every MP3 this service produces, in kbit/s.
pub const MP3_BITRATE_KBPS: u32 = 320;
const STDERR_LOG: &str = "ffmpeg.stderr.log";

/// Converts an arbitrary media file into an MP3 file.
pub trait Transcoder: Send + Sync {
    fn to_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_BIN)
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, input: &Path, output: &Path, bitrate_kbps: u32) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-b:a")
            .arg(format!("{bitrate_kbps}k"))
            .arg(output);
        command
    }
}

impl Transcoder for FfmpegTranscoder {
    fn to_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let program = program_name(&self.binary);
        let log_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let command = self.command(input, output, bitrate_kbps);

        tracing::debug!(input = %input.display(), bitrate_kbps, "transcoding to mp3");
        let finished = run_cancellable(command, None, &log_dir.join(STDERR_LOG), cancel).map_err(
            |err| match err {
                RunError::Cancelled => TranscodeError::Cancelled,
                RunError::Spawn(source) => TranscodeError::Spawn {
                    program: program.clone(),
                    source,
                },
            },
        )?;

        if !finished.status.success() {
            return Err(TranscodeError::Failed {
                program,
                status: finished.status.to_string(),
                stderr: finished.stderr,
            });
        }
        if !output.is_file() {
            return Err(TranscodeError::MissingOutput(output.display().to_string()));
        }
        Ok(())
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn install_ffmpeg_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("ffmpeg");
        let script = format!(
            "#!/usr/bin/env bash\nset -eu\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/last-args.txt\"\n{body}\n"
        );
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    #[test]
    fn to_mp3_passes_bitrate_and_codec() {
        let bin = tempdir().unwrap();
        let work = tempdir().unwrap();
        let stub = install_ffmpeg_stub(bin.path(), "for last; do :; done\necho mp3 > \"$last\"");
        let input = work.path().join("140.m4a");
        let output = work.path().join("audio.mp3");
        fs::write(&input, "raw").unwrap();

        FfmpegTranscoder::new(stub)
            .to_mp3(&input, &output, MP3_BITRATE_KBPS, &CancellationToken::new())
            .unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "mp3\n");
        let args = fs::read_to_string(bin.path().join("last-args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert!(args.windows(2).any(|pair| pair == ["-b:a", "320k"]));
        assert!(args.windows(2).any(|pair| pair == ["-codec:a", "libmp3lame"]));
        assert!(args.contains(&"-vn"));
        assert!(!work.path().join(STDERR_LOG).exists());
    }

    #[test]
    fn to_mp3_reports_encoder_failure() {
        let bin = tempdir().unwrap();
        let work = tempdir().unwrap();
        let stub = install_ffmpeg_stub(
            bin.path(),
            "echo 'Invalid data found when processing input' >&2\nexit 1",
        );
        let input = work.path().join("140.m4a");
        fs::write(&input, "raw").unwrap();

        let err = FfmpegTranscoder::new(stub)
            .to_mp3(
                &input,
                &work.path().join("audio.mp3"),
                MP3_BITRATE_KBPS,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Failed { .. }));
        assert!(err.to_string().contains("Invalid data found"));
    }

    #[test]
    fn to_mp3_requires_output_file() {
        let bin = tempdir().unwrap();
        let work = tempdir().unwrap();
        let stub = install_ffmpeg_stub(bin.path(), "exit 0");
        let input = work.path().join("140.m4a");
        fs::write(&input, "raw").unwrap();

        let err = FfmpegTranscoder::new(stub)
            .to_mp3(
                &input,
                &work.path().join("audio.mp3"),
                MP3_BITRATE_KBPS,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TranscodeError::MissingOutput(_)));
    }
}
