//! Host-local helpers: locating the Chromium executable and the base
//! directories session profiles are allowed to live under.

use crate::error::{LauncherError, Result};
use std::path::{Path, PathBuf};

pub fn find_chrome_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(LauncherError::ProcessSpawnFailed(format!(
            "configured chrome_path does not exist: {}",
            path.display()
        )));
    }

    if let Some(path) = find_in_standard_locations()? {
        return Ok(path);
    }

    if let Some(path) = find_in_path() {
        return Ok(path);
    }

    Err(LauncherError::ProcessSpawnFailed(
        "could not locate a Chromium/Chrome executable on this host".into(),
    ))
}

#[cfg(target_os = "macos")]
fn find_in_standard_locations() -> Result<Option<PathBuf>> {
    let paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    ];
    Ok(paths.iter().map(PathBuf::from).find(|p| p.exists()))
}

#[cfg(target_os = "linux")]
fn find_in_standard_locations() -> Result<Option<PathBuf>> {
    let paths = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/opt/google/chrome/google-chrome",
    ];
    Ok(paths.iter().map(PathBuf::from).find(|p| p.exists()))
}

#[cfg(target_os = "windows")]
fn find_in_standard_locations() -> Result<Option<PathBuf>> {
    let paths = [
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];
    if let Some(found) = paths.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(Some(found));
    }
    if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
        let user_chrome = PathBuf::from(local_app_data)
            .join("Google")
            .join("Chrome")
            .join("Application")
            .join("chrome.exe");
        if user_chrome.exists() {
            return Ok(Some(user_chrome));
        }
    }
    Ok(None)
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn find_in_standard_locations() -> Result<Option<PathBuf>> {
    Ok(None)
}

fn find_in_path() -> Option<PathBuf> {
    let binaries: &[&str] = if cfg!(windows) {
        &["chrome.exe", "chromium.exe"]
    } else {
        &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
    };

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for binary in binaries {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Base directories a `user_data_dir` is allowed to resolve under (§4.5).
/// `launcher_basedir` is included only when delegated launch is in use.
pub fn allowed_profile_roots(launcher_basedir: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = vec![std::env::temp_dir(), PathBuf::from("/tmp"), PathBuf::from("/var/tmp")];
    if let Some(home) = std::env::var_os("HOME") {
        roots.push(PathBuf::from(home).join("chrome_profiles"));
    }
    if let Some(base) = launcher_basedir {
        roots.push(base.to_path_buf());
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_path_must_exist() {
        let err = find_chrome_executable(Some(Path::new("/nonexistent/chrome-binary")));
        assert!(err.is_err());
    }

    #[test]
    fn allowed_roots_include_tmp_and_home_profiles() {
        let roots = allowed_profile_roots(None);
        assert!(roots.contains(&PathBuf::from("/tmp")));
    }

    #[test]
    fn allowed_roots_include_launcher_basedir_when_given() {
        let base = PathBuf::from("/opt/launcher");
        let roots = allowed_profile_roots(Some(&base));
        assert!(roots.contains(&base));
    }
}
