use std::path::Path;
use std::process::{Command, Stdio};

use super::{SeparatedStems, StemSeparator};
use crate::error::{GenreError, Result};

/// Runs an external separation tool (Spleeter, Demucs, ...) as a child process.
///
/// `{input}` and `{output}` in the argument template are replaced with the audio
/// path and the output directory.
#[derive(Clone, Debug)]
pub struct CommandSeparator {
    program: String,
    args: Vec<String>,
}

impl CommandSeparator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Spleeter's pretrained 4-stem model.
    pub fn spleeter() -> Self {
        Self::new(
            "spleeter",
            ["separate", "-p", "spleeter:4stems", "-o", "{output}", "{input}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn expand_args(&self, audio_path: &Path, output_dir: &Path) -> Vec<String> {
        let input = audio_path.to_string_lossy();
        let output = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl StemSeparator for CommandSeparator {
    fn separate(&self, audio_path: &Path, output_dir: &Path) -> Result<SeparatedStems> {
        let args = self.expand_args(audio_path, output_dir);
        log::info!("Separating stems: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                GenreError::Separation(format!(
                    "failed to launch '{}': {}. Is it installed?",
                    self.program, e
                ))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(GenreError::Separation(format!(
                "'{}' exited with {}:\n{}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            log::debug!("[separator] {}", line);
        }

        Ok(SeparatedStems::find(output_dir, audio_path))
    }
}
