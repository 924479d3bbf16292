use std::path::{Path, PathBuf};

use super::{SeparatedStems, StemSeparator};
use crate::error::{GenreError, Result};

/// Serves stems that were separated ahead of time.
///
/// `root` is either a stem directory itself or holds one subdirectory per track,
/// named after the track's file stem (the layout Spleeter writes).
#[derive(Clone, Debug)]
pub struct DirectorySeparator {
    root: PathBuf,
}

impl DirectorySeparator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StemSeparator for DirectorySeparator {
    fn separate(&self, audio_path: &Path, _output_dir: &Path) -> Result<SeparatedStems> {
        if !self.root.is_dir() {
            return Err(GenreError::Separation(format!(
                "stem directory {} does not exist",
                self.root.display()
            )));
        }
        Ok(SeparatedStems::find(&self.root, audio_path))
    }
}
