use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};

/// Directory and file name used under the platform config dir.
pub const APP_DIR_NAME: &str = "photo2url";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// `<config dir>/photo2url/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Usual VRChat screenshot locations, most likely first.
pub fn vrchat_folder_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    let pictures = dirs::picture_dir().or_else(|| dirs::home_dir().map(|home| home.join("Pictures")));
    if let Some(pictures) = pictures {
        candidates.push(pictures.join("VRChat"));
    }
    let documents =
        dirs::document_dir().or_else(|| dirs::home_dir().map(|home| home.join("Documents")));
    if let Some(documents) = documents {
        candidates.push(documents.join("VRChat"));
    }

    if cfg!(windows) {
        candidates.push(PathBuf::from("D:/VRChat/Screenshots"));
        candidates.push(PathBuf::from("E:/VRChat/Screenshots"));
    }

    candidates
}

/// VRChat 스크린샷 폴더를 자동으로 찾습니다.
pub fn detect_vrchat_folder() -> Option<PathBuf> {
    detect_vrchat_folder_in(&vrchat_folder_candidates())
}

pub fn detect_vrchat_folder_in(candidates: &[PathBuf]) -> Option<PathBuf> {
    let found = candidates
        .iter()
        .find(|candidate| is_vrchat_screenshots_folder(candidate))
        .cloned();
    match &found {
        Some(folder) => log::info!("Detected VRChat folder: {}", folder.display()),
        None => log::debug!("No VRChat folder found in {} candidates", candidates.len()),
    }
    found
}

/// A directory counts if its name mentions VRChat or it already holds
/// `VRChat_*.png` screenshots.
pub fn is_vrchat_screenshots_folder(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }

    let named_vrchat = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase().contains("vrchat"))
        .unwrap_or(false);
    if named_vrchat {
        return true;
    }

    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("VRChat_") && name.to_lowercase().ends_with(".png")
    })
}

/// Destination for copied upload URLs.
pub trait ClipboardSink: Send + Sync {
    fn copy_text(&self, text: &str);
}

/// System clipboard owned by a dedicated thread, so copied text stays
/// available for as long as the process runs.
pub struct SystemClipboard {
    tx: Mutex<mpsc::Sender<String>>,
}

impl SystemClipboard {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<String>();
        let (ready_tx, ready_rx) = mpsc::channel();

        thread::Builder::new()
            .name("photo2url-clipboard".to_string())
            .spawn(move || {
                let mut clipboard = match arboard::Clipboard::new() {
                    Ok(clipboard) => {
                        let _ = ready_tx.send(Ok(()));
                        clipboard
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                for text in rx {
                    if let Err(e) = clipboard.set_text(text) {
                        log::warn!("Failed to copy to clipboard: {}", e);
                    }
                }
            })
            .context("Failed to spawn clipboard thread")?;

        ready_rx
            .recv()
            .context("Clipboard thread exited")?
            .map_err(|e| anyhow!("Clipboard unavailable: {e}"))?;

        Ok(Self { tx: Mutex::new(tx) })
    }
}

impl ClipboardSink for SystemClipboard {
    fn copy_text(&self, text: &str) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("photo2url/config.yaml"));
        }
    }

    #[test]
    fn test_folder_named_vrchat() {
        let root = tempdir().unwrap();
        let folder = root.path().join("VRChat");
        fs::create_dir(&folder).unwrap();

        assert!(is_vrchat_screenshots_folder(&folder));
    }

    #[test]
    fn test_folder_with_screenshots() {
        let root = tempdir().unwrap();
        let folder = root.path().join("Screens");
        fs::create_dir(&folder).unwrap();
        assert!(!is_vrchat_screenshots_folder(&folder));

        fs::write(
            folder.join("VRChat_2024-01-01_12-00-00.000_1920x1080.png"),
            b"png",
        )
        .unwrap();
        assert!(is_vrchat_screenshots_folder(&folder));
    }

    #[test]
    fn test_missing_or_file_is_rejected() {
        let root = tempdir().unwrap();
        let file = root.path().join("VRChat");
        fs::write(&file, b"not a dir").unwrap();

        assert!(!is_vrchat_screenshots_folder(&file));
        assert!(!is_vrchat_screenshots_folder(&root.path().join("vrchat-missing")));
    }

    #[test]
    fn test_detect_picks_first_match() {
        let root = tempdir().unwrap();
        let missing = root.path().join("nope").join("VRChat");
        let plain = root.path().join("plain");
        let second = root.path().join("vrchat_shots");
        fs::create_dir(&plain).unwrap();
        fs::create_dir(&second).unwrap();

        let found = detect_vrchat_folder_in(&[missing, plain, second.clone()]);
        assert_eq!(found, Some(second));
        assert_eq!(detect_vrchat_folder_in(&[]), None);
    }
}
