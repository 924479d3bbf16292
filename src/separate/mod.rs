//! Stem separation as a black-box capability.
//!
//! The pipeline only relies on [`StemSeparator::separate`] producing a directory with one
//! audio file per stem. How the split happens is up to the backend.

pub mod command;
pub mod directory;

use std::path::{Path, PathBuf};

use crate::audio::features::Stem;
use crate::error::{GenreError, Result};

pub use command::CommandSeparator;
pub use directory::DirectorySeparator;

/// File extensions accepted for stem files, in lookup order.
const STEM_EXTENSIONS: [&str; 4] = ["wav", "flac", "mp3", "ogg"];

pub trait StemSeparator: Send + Sync {
    /// Split `audio_path` into stems, writing them under `output_dir`.
    fn separate(&self, audio_path: &Path, output_dir: &Path) -> Result<SeparatedStems>;
}

/// A directory holding one file per stem, named after the stem.
#[derive(Clone, Debug)]
pub struct SeparatedStems {
    dir: PathBuf,
}

impl SeparatedStems {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `stem`, or `StemMissing` naming it.
    pub fn locate(&self, stem: Stem) -> Result<PathBuf> {
        STEM_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", stem.name(), ext)))
            .find(|path| path.is_file())
            .ok_or_else(|| GenreError::StemMissing {
                stem,
                path: self.dir.join(format!("{}.wav", stem.name())),
            })
    }

    /// Resolves the directory a separator actually wrote stems to.
    ///
    /// Some tools write directly into the output directory, others nest the stems in a
    /// subdirectory named after the input file.
    pub fn find(output_dir: &Path, audio_path: &Path) -> Self {
        if let Some(name) = audio_path.file_stem() {
            let nested = output_dir.join(name);
            if nested.is_dir() {
                return Self::new(nested);
            }
        }
        Self::new(output_dir)
    }
}
