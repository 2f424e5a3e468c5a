use std::path::{Path, PathBuf};

/// Maximum allowed path length for security
const MAX_PATH_LENGTH: usize = 4096;

/// Validate that a path is well-formed before handing it to the OS watcher
pub fn validate_path(path: &Path) -> Result<(), String> {
    let path_str = path.to_string_lossy();

    if path_str.is_empty() {
        return Err("Path is empty".to_string());
    }

    if path_str.len() > MAX_PATH_LENGTH {
        return Err(format!("Path too long (max {MAX_PATH_LENGTH} bytes)"));
    }

    if path_str.bytes().any(|b| b == 0) {
        return Err("Path contains null bytes".to_string());
    }

    Ok(())
}

/// Validate and canonicalize a directory that is about to be watched
pub fn validate_watch_directory(path: &Path) -> Result<PathBuf, String> {
    validate_path(path)?;
    verify_path_exists(path)?;

    if !path.is_dir() {
        return Err(format!("Not a directory: {}", path.display()));
    }

    path.canonicalize()
        .map_err(|e| format!("Invalid path {}: {e}", path.display()))
}

/// Validate that a path exists and is accessible
pub fn verify_path_exists(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(())
}
