use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// Writes an encoded frame as `photo_<YYYYmmdd_HHMMSS>.jpg` under `dir`,
/// adding a numeric suffix when several stills land in the same second.
pub fn save_still(dir: &Path, jpeg: &[u8], taken_at: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create capture dir {}", dir.display()))?;

    let stem = format!("photo_{}", taken_at.format("%Y%m%d_%H%M%S"));
    let mut path = dir.join(format!("{stem}.jpg"));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{suffix}.jpg"));
        suffix += 1;
    }

    fs::write(&path, jpeg).with_context(|| format!("Failed to write still {}", path.display()))?;
    Ok(path)
}
