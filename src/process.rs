//! Process Supervisor (C3): launches, probes and terminates Chromium
//! processes. Generalizes the `Session::new` Chrome command construction
//! and `utils::find_chrome_executable`; the kill sequence and PID-reuse
//! guard follow `browser_launcher.py::terminate_session`.

use crate::config::Config;
use crate::error::{LauncherError, Result};
use crate::model::{ProxyConfig, TerminationReason};
use crate::timeouts::secs;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Flags this process always passes, regardless of caller input.
fn hardening_args(port: u16, user_data_dir: &Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={port}"),
        "--remote-debugging-address=0.0.0.0".to_string(),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-sync".to_string(),
        "--disable-component-update".to_string(),
        "--disable-extensions-with-background-pages".to_string(),
        "--disable-popup-blocking".to_string(),
        "--disable-prompt-on-repost".to_string(),
    ]
}

static DANGEROUS_FLAGS: &[&str] = &[
    "--disable-web-security",
    "--no-sandbox",
    "--user-data-dir",
    "--remote-debugging-port",
    "--remote-debugging-address",
    "--disable-setuid-sandbox",
    "--load-extension",
    "--single-process",
];

static PATH_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)dir|path|file").unwrap());
static ALLOWED_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--[a-z0-9\-]+(=[a-z0-9\-_.,:/]+)?$").unwrap());
static URL_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)://").unwrap());

/// Security filter for caller-supplied `chrome_args` (§7). Unsafe entries
/// are dropped with a warning; the launch proceeds with what survives.
pub fn filter_chrome_args(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| {
            let flag_name = arg.split('=').next().unwrap_or(arg).to_lowercase();
            if DANGEROUS_FLAGS.iter().any(|d| flag_name == *d) {
                tracing::warn!(arg = %arg, "dropped dangerous chrome_args entry");
                return false;
            }
            if PATH_LIKE.is_match(&flag_name) {
                tracing::warn!(arg = %arg, "dropped path-like chrome_args entry");
                return false;
            }
            if URL_LIKE.is_match(arg) {
                tracing::warn!(arg = %arg, "dropped url-like chrome_args entry");
                return false;
            }
            if !ALLOWED_ARG.is_match(&arg.to_lowercase()) {
                tracing::warn!(arg = %arg, "dropped chrome_args entry not matching allow-list grammar");
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Strips characters that would let a proxy server string break out of the
/// argument it is embedded in, per §4.2.
pub fn sanitize_proxy(proxy: &ProxyConfig) -> Option<String> {
    if proxy.server.len() > 500 {
        return None;
    }
    let cleaned: String = proxy
        .server
        .chars()
        .filter(|c| !['"', '\'', ';', '&'].contains(c))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned)
}

pub struct LaunchSpec<'a> {
    pub port: u16,
    pub user_data_dir: &'a Path,
    pub proxy: Option<&'a ProxyConfig>,
    pub extensions: &'a [String],
    pub chrome_args: &'a [String],
    pub machine_ip: &'a str,
}

/// The duck-typed "process object" (Design Notes §9): one interface over a
/// directly-spawned child or a process discovered via a delegated launcher.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;
    fn create_time(&self) -> Option<f64>;
    /// `None` while alive; `Some(exit_code)` once it has exited.
    async fn poll(&mut self) -> Option<i32>;
    async fn kill(&mut self) -> Result<()>;
}

pub struct DirectHandle {
    child: Child,
    pid: u32,
    create_time: Option<f64>,
}

#[async_trait]
impl ProcessHandle for DirectHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn create_time(&self) -> Option<f64> {
        self.create_time
    }

    async fn poll(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    async fn kill(&mut self) -> Result<()> {
        // `self.child.kill()` only SIGKILLs the spawned process itself;
        // Chrome's renderer/GPU/zygote children are separate PIDs and would
        // be orphaned rather than reaped. Kill the whole tree, then reap the
        // direct child so it doesn't linger as a zombie.
        kill_pid_tree(self.pid).await?;
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        Ok(())
    }
}

pub struct DelegatedHandle {
    pid: u32,
    create_time: Option<f64>,
}

#[async_trait]
impl ProcessHandle for DelegatedHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn create_time(&self) -> Option<f64> {
        self.create_time
    }

    async fn poll(&mut self) -> Option<i32> {
        if process_alive(self.pid) {
            None
        } else {
            Some(0)
        }
    }

    async fn kill(&mut self) -> Result<()> {
        kill_pid_tree(self.pid).await
    }
}

pub struct ProcessSupervisor {
    chrome_path: Option<PathBuf>,
    use_custom_launcher: bool,
    launcher_cmd: Option<String>,
}

impl ProcessSupervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_path: config.browser.chrome_path.clone(),
            use_custom_launcher: config.browser.use_custom_chrome_launcher,
            launcher_cmd: config.browser.chrome_launcher_cmd.clone(),
        }
    }

    pub async fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn ProcessHandle>> {
        if self.use_custom_launcher {
            self.launch_delegated(spec).await
        } else {
            self.launch_direct(spec).await
        }
    }

    async fn launch_direct(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn ProcessHandle>> {
        let exe = crate::utils::find_chrome_executable(self.chrome_path.as_deref())?;
        let mut args = hardening_args(spec.port, spec.user_data_dir);

        if let Some(proxy) = spec.proxy {
            if let Some(server) = sanitize_proxy(proxy) {
                args.push(format!("--proxy-server={server}"));
                if let Some(bypass) = &proxy.bypass_list {
                    if bypass.len() < 1000 {
                        args.push(format!("--proxy-bypass-list={bypass}"));
                    }
                }
            }
        }

        for ext in spec.extensions {
            if Path::new(ext).exists() {
                args.push(format!("--load-extension={ext}"));
            }
        }

        args.extend(filter_chrome_args(spec.chrome_args));

        let mut child = Command::new(&exe)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| LauncherError::ProcessSpawnFailed(e.to_string()))?;

        // Give an immediately-crashing process a moment to surface its exit.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(LauncherError::ChromeExited(format!("{status}")));
        }

        let pid = child.id().ok_or_else(|| {
            LauncherError::ProcessSpawnFailed("spawned process has no pid".into())
        })?;
        let create_time = process_create_time(pid);

        Ok(Box::new(DirectHandle { child, pid, create_time }))
    }

    async fn launch_delegated(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn ProcessHandle>> {
        let launcher = self
            .launcher_cmd
            .as_ref()
            .ok_or_else(|| LauncherError::ConfigError("CHROME_LAUNCHER_CMD not set".into()))?;

        let mut child = Command::new("cmd")
            .args([
                "/c",
                launcher,
                &spec.port.to_string(),
                spec.machine_ip,
            ])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| LauncherError::ProcessSpawnFailed(e.to_string()))?;

        let pid = read_launcher_pid(&mut child)
            .await
            .or(scan_for_listener_pid(spec.port).await)
            .ok_or_else(|| {
                LauncherError::ProcessSpawnFailed(
                    "delegated launcher did not report a usable PID".into(),
                )
            })?;

        let create_time = process_create_time(pid);
        Ok(Box::new(DelegatedHandle { pid, create_time }))
    }
}

async fn read_launcher_pid(child: &mut Child) -> Option<u32> {
    use tokio::io::AsyncReadExt;
    let mut stdout = child.stdout.take()?;
    let mut buf = vec![0u8; 128];
    let deadline = Duration::from_secs(secs::LAUNCHER_PID_READ);
    let mut collected = Vec::new();

    let read = tokio::time::timeout(deadline, async {
        loop {
            let n = stdout.read(&mut buf).await.ok()?;
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
            if collected.len() > 4096 {
                break;
            }
        }
        Some(())
    })
    .await;

    if read.is_err() {
        return None;
    }

    let text = String::from_utf8_lossy(&collected);
    text.split_whitespace()
        .find(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit()))
        .and_then(|tok| tok.parse().ok())
}

/// Fallback for a delegated launcher that never printed a PID: scan the
/// kernel's listening sockets for one bound to `port`, bounded by 8s.
async fn scan_for_listener_pid(port: u16) -> Option<u32> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs::LAUNCHER_PID_SCAN);
    while tokio::time::Instant::now() < deadline {
        if let Some(pid) = listener_pid_for_port(port) {
            if executable_name_contains(pid, "chrome") {
                return Some(pid);
            }
        }
        tokio::time::sleep(Duration::from_millis(crate::timeouts::ms::LAUNCHER_PID_POLL)).await;
    }
    None
}

#[cfg(target_os = "linux")]
fn listener_pid_for_port(port: u16) -> Option<u32> {
    let hex_port = format!("{:04X}", port);
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(path) else { continue };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(local) = fields.get(1) else { continue };
            let Some(local_port) = local.split(':').nth(1) else { continue };
            if !local_port.eq_ignore_ascii_case(&hex_port) {
                continue;
            }
            let Some(inode) = fields.get(9) else { continue };
            if let Some(pid) = pid_owning_inode(inode) {
                return Some(pid);
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn pid_owning_inode(inode: &str) -> Option<u32> {
    let target = format!("socket:[{inode}]");
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else { continue };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link.to_string_lossy() == target {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn listener_pid_for_port(_port: u16) -> Option<u32> {
    None
}

#[cfg(target_os = "linux")]
fn executable_name_contains(pid: u32, needle: &str) -> bool {
    std::fs::read_link(format!("/proc/{pid}/exe"))
        .map(|p| p.to_string_lossy().to_lowercase().contains(needle))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn executable_name_contains(_pid: u32, _needle: &str) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn cmdline_contains(pid: u32, needle: &str) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|s| s.replace('\0', " ").contains(needle))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn cmdline_contains(_pid: u32, _needle: &str) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn process_create_time(pid: u32) -> Option<f64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 22 (starttime) follows the closing paren of the comm field,
    // which itself may contain spaces/parens.
    let after_comm = stat.rsplit_once(')')?.1;
    let starttime_ticks: u64 = after_comm
        .split_whitespace()
        .nth(19)?
        .parse()
        .ok()?;
    let ticks_per_sec = 100.0_f64; // USER_HZ; stable on Linux in practice.
    let uptime_secs: f64 = std::fs::read_to_string("/proc/uptime")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    let boot_time = chrono::Utc::now().timestamp() as f64 - uptime_secs;
    Some(boot_time + (starttime_ticks as f64 / ticks_per_sec))
}

#[cfg(not(target_os = "linux"))]
fn process_create_time(_pid: u32) -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(unix)]
#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(pid: u32) -> bool {
    // Best-effort: treated conservatively as alive so callers don't
    // force-kill based on a false negative.
    let _ = pid;
    true
}

#[cfg(target_os = "linux")]
fn child_pids(pid: u32) -> Vec<u32> {
    std::fs::read_to_string(format!("/proc/{pid}/task/{pid}/children"))
        .map(|s| s.split_whitespace().filter_map(|t| t.parse().ok()).collect())
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn child_pids(_pid: u32) -> Vec<u32> {
    Vec::new()
}

#[cfg(unix)]
fn send_sigkill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

/// Recursively kills `pid`'s children, then `pid` itself, polling for
/// disappearance up to §5's 10s ceiling.
#[cfg(unix)]
async fn kill_pid_tree(pid: u32) -> Result<()> {
    for child in child_pids(pid) {
        send_sigkill(child);
    }
    send_sigkill(pid);
    wait_for_death(pid).await
}

#[cfg(windows)]
async fn kill_pid_tree(pid: u32) -> Result<()> {
    let output = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output();
    let _ = tokio::time::timeout(Duration::from_secs(secs::PROCESS_KILL), output).await;
    wait_for_death(pid).await
}

async fn wait_for_death(pid: u32) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs::PROCESS_KILL);
    let mut backoff = Duration::from_millis(50);
    while tokio::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(1));
    }
    if process_alive(pid) {
        tracing::warn!(pid, "process survived graceful kill deadline");
    }
    Ok(())
}

/// Guards the aggressive force-kill path against PID reuse (§4.2/Design
/// Notes §9): requires the live process's create_time to match the stored
/// one within 1s, or falls back to executable-name/cmdline verification.
pub fn pid_reuse_guard_passes(pid: u32, stored_create_time: Option<f64>, expected_port: u16) -> bool {
    if let Some(stored) = stored_create_time {
        if let Some(current) = process_create_time(pid) {
            return (current - stored).abs() <= secs::CREATE_TIME_GUARD as f64;
        }
    }
    executable_name_contains(pid, "chrome")
        && cmdline_contains(pid, &format!("--remote-debugging-port={expected_port}"))
}

/// Aggressively force-kills `pid` only if the reuse guard passes; otherwise
/// abandons the kill and leaves the (possibly leaked) process alone.
pub async fn aggressive_kill_if_safe(
    pid: u32,
    stored_create_time: Option<f64>,
    expected_port: u16,
) -> Result<bool> {
    if !pid_reuse_guard_passes(pid, stored_create_time, expected_port) {
        tracing::warn!(pid, expected_port, "abandoning aggressive kill: PID-reuse guard failed");
        return Ok(false);
    }
    #[cfg(unix)]
    {
        send_sigkill(pid);
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()
            .await;
    }
    wait_for_death(pid).await?;
    Ok(!process_alive(pid))
}

pub fn reason_exit_code(reason: TerminationReason, observed: Option<i32>) -> Option<i32> {
    match reason {
        TerminationReason::Crashed | TerminationReason::Closed => observed,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyConfig;

    #[test]
    fn filter_drops_dangerous_flags() {
        let args = vec!["--no-sandbox".to_string(), "--disable-gpu".to_string()];
        let filtered = filter_chrome_args(&args);
        assert_eq!(filtered, vec!["--disable-gpu".to_string()]);
    }

    #[test]
    fn filter_drops_path_like_flags() {
        let args = vec!["--some-dir=/etc/passwd".to_string()];
        assert!(filter_chrome_args(&args).is_empty());
    }

    #[test]
    fn filter_drops_url_like_values() {
        let args = vec!["--foo=http://evil.example".to_string()];
        assert!(filter_chrome_args(&args).is_empty());
    }

    #[test]
    fn filter_keeps_well_formed_flags() {
        let args = vec!["--disable-features=Translate".to_string()];
        assert_eq!(filter_chrome_args(&args), args);
    }

    #[test]
    fn proxy_sanitization_strips_breakout_characters() {
        let proxy = ProxyConfig {
            server: "http://1.2.3.4:8080;rm -rf".to_string(),
            bypass_list: None,
        };
        let sanitized = sanitize_proxy(&proxy).unwrap();
        assert!(!sanitized.contains(';'));
    }

    #[test]
    fn proxy_over_length_limit_is_rejected() {
        let proxy = ProxyConfig {
            server: "a".repeat(501),
            bypass_list: None,
        };
        assert!(sanitize_proxy(&proxy).is_none());
    }

    #[test]
    fn pid_reuse_guard_rejects_when_neither_signal_available() {
        assert!(!pid_reuse_guard_passes(1, None, 9222));
    }
}
