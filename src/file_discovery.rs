use anyhow::{Context, Result};
use glob::{glob, Pattern};
use std::fs::metadata;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// A regular file in an output directory.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// File name without the directory, as matched against job id patterns.
    pub name: String,
    pub modified: Option<SystemTime>,
}

/// Handles discovery of job output files (`slurm-1234.out` and the like)
#[derive(Debug, Default)]
pub struct FileDiscovery;

impl FileDiscovery {
    pub fn new() -> Self {
        Self
    }

    /// List the regular files directly inside `directory`, sorted by name.
    /// A missing directory is an error; an empty one is not.
    pub fn list_output_files(&self, directory: &Path) -> Result<Vec<OutputFile>> {
        if !directory.is_dir() {
            anyhow::bail!("{} does not exist!", directory.display());
        }

        let escaped = Pattern::escape(&directory.to_string_lossy());
        let pattern = Path::new(&escaped).join("*");
        let entries = glob(&pattern.to_string_lossy())
            .with_context(|| format!("Failed to list files in {}", directory.display()))?;

        let mut files: Vec<OutputFile> = entries
            .flatten()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(OutputFile {
                    modified: Self::modified(&path),
                    name,
                })
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            directory = %directory.display(),
            files = files.len(),
            "Discovered output files"
        );
        Ok(files)
    }

    /// Modification time of a file, if it exists and the platform reports one.
    pub fn modified(path: &Path) -> Option<SystemTime> {
        metadata(path).and_then(|m| m.modified()).ok()
    }
}
