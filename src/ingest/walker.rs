use walkdir::WalkDir;
use std::path::{Path, PathBuf};
use crate::error::{Result, InstacoError};

/// List the `.json` files directly inside `dir` (extension is case-insensitive), sorted by name.
pub fn discover_export_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(InstacoError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input directory {} does not exist", dir.display()),
        )));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| InstacoError::Io(std::io::Error::other(e.to_string())))?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            files.push(path.to_path_buf());
        }
    }

    log::debug!("Discovered {} .json files in {}", files.len(), dir.display());
    Ok(files)
}

/// Require exactly one followers and one followings export: two files.
pub fn require_pair(dir: &Path, files: Vec<PathBuf>) -> Result<[PathBuf; 2]> {
    <[PathBuf; 2]>::try_from(files).map_err(|files| {
        let names = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        match files.len() {
            0 => InstacoError::InvalidInput(format!(
                "didn't find any .json files in the {} folder",
                dir.display()
            )),
            1 => InstacoError::InvalidInput(format!(
                "found only 1 .json file ({}) in the {} folder, expected 2",
                names,
                dir.display()
            )),
            n => InstacoError::InvalidInput(format!(
                "found {} .json files ({}) in the {} folder, expected 2",
                n,
                names,
                dir.display()
            )),
        }
    })
}
