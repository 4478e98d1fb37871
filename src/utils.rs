use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str)?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(filename.to_string());
            }
        }
    }

    // Fallback if no filename found in path
    Ok(format!("ota_{}.zip", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// `update.zip` -> `update.zip.part`
pub fn partial_path(filepath: &Path) -> PathBuf {
    let mut part = filepath.as_os_str().to_os_string();
    part.push(".part");
    PathBuf::from(part)
}

/// `update.zip` -> `update.zip.part.json`
pub fn state_path(filepath: &Path) -> PathBuf {
    let mut state = partial_path(filepath).into_os_string();
    state.push(".json");
    PathBuf::from(state)
}
