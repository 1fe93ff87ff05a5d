//! Staging of client circuit files into the session work directory

use crate::error::{Result, SimError};
use crate::types::CircuitFile;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Write every file under `dir` and return the path of the first one.
///
/// Names must be relative paths without `..`; subdirectories are created.
pub fn stage_files(dir: &Path, files: &[CircuitFile]) -> Result<PathBuf> {
    let first = files
        .first()
        .ok_or_else(|| SimError::InvalidRequest("no circuit files given".into()))?;

    // Validate all names before touching the filesystem
    let relative: Vec<&Path> = files
        .iter()
        .map(|f| checked_relative(&f.name))
        .collect::<Result<_>>()?;

    for (file, rel) in files.iter().zip(&relative) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &file.contents)?;
        debug!(path = %path.display(), bytes = file.contents.len(), "Staged circuit file");
    }

    Ok(dir.join(&first.name))
}

fn checked_relative(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            _ => return Err(SimError::InvalidFileName(name.to_string())),
        }
    }
    if normal == 0 || name.contains('\0') {
        return Err(SimError::InvalidFileName(name.to_string()));
    }
    Ok(path)
}
