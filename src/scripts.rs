//! Invocation of the platform's delegated helper scripts (§6). The core only
//! specifies these signatures and fires them off; their implementation is an
//! external collaborator, much like `utils::find_chrome_executable`'s
//! platform probes are host-local concerns outside the crate's control.

use std::path::Path;
use tokio::process::Command;

fn script_path(name: &str) -> String {
    std::env::var(format!("LAUNCHER_SCRIPT_{}", name.to_uppercase()))
        .unwrap_or_else(|_| format!("./scripts/{name}"))
}

async fn run_detached(name: &str, args: &[&str]) {
    let path = script_path(name);
    match Command::new(&path).args(args).spawn() {
        Ok(mut child) => {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(err) => {
            tracing::warn!(script = %path, error = %err, "failed to spawn helper script");
        }
    }
}

pub async fn cleanup_port(port: u16) {
    run_detached("cleanup_port", &[&port.to_string()]).await;
}

pub async fn cleanup_profile(dir: &Path) {
    run_detached("cleanup_profile", &[&dir.to_string_lossy()]).await;
}

pub async fn cleanup_expired_session(pid: u32, port: u16, profile_dir: Option<&Path>) {
    let pid_s = pid.to_string();
    let port_s = port.to_string();
    match profile_dir {
        Some(dir) => run_detached("cleanup_expired_session", &[&pid_s, &port_s, &dir.to_string_lossy()]).await,
        None => run_detached("cleanup_expired_session", &[&pid_s, &port_s]).await,
    }
}

pub async fn cleanup_old_profiles(basedir: &Path, max_age_hours: u64) {
    run_detached(
        "cleanup_old_profiles",
        &[&basedir.to_string_lossy(), &max_age_hours.to_string()],
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_path_honors_env_override() {
        unsafe {
            std::env::set_var("LAUNCHER_SCRIPT_CLEANUP_PORT", "/usr/local/bin/cleanup_port.sh");
        }
        assert_eq!(script_path("cleanup_port"), "/usr/local/bin/cleanup_port.sh");
        unsafe {
            std::env::remove_var("LAUNCHER_SCRIPT_CLEANUP_PORT");
        }
    }

    #[test]
    fn script_path_falls_back_to_default_location() {
        assert_eq!(script_path("cleanup_old_profiles"), "./scripts/cleanup_old_profiles");
    }
}
