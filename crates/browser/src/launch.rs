//! Launch a local Chrome/Chromium with remote debugging and discover its
//! browser-level WebSocket endpoint.

use edith_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A running browser process plus the endpoint to drive it.
pub struct BrowserProcess {
    child: Child,
    pub debug_port: u16,
    pub ws_url: String,
}

impl BrowserProcess {
    /// Launch a browser and wait for its CDP endpoint to come up.
    pub async fn launch(
        executable: Option<&str>,
        user_data_dir: &Path,
        headless: bool,
        window_size: &str,
    ) -> Result<Self> {
        let binary = match executable {
            Some(path) => path.to_string(),
            None => find_browser_binary().ok_or_else(|| {
                Error::Config(
                    "No Chrome/Chromium binary found. Install Chrome or set browser.executable."
                        .to_string(),
                )
            })?,
        };

        std::fs::create_dir_all(user_data_dir)?;
        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, user_data_dir, headless, window_size);

        info!(binary = %binary, port = debug_port, headless, "Launching browser");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Config(format!("Failed to launch {}: {}", binary, e)))?;

        let ws_url = wait_for_cdp_ready(debug_port, 15).await?;
        debug!(ws_url = %ws_url, "Browser CDP endpoint ready");

        Ok(Self {
            child,
            debug_port,
            ws_url,
        })
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

fn build_browser_args(
    debug_port: u16,
    user_data_dir: &Path,
    headless: bool,
    window_size: &str,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!("--window-size={}", window_size));
    args.push("about:blank".to_string());
    args
}

/// Probe well-known locations, then `$PATH`.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if PathBuf::from(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Other(format!("Failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Other(format!("Failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the browser answers with its WebSocket URL.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_args_headless() {
        let args = build_browser_args(9321, Path::new("/tmp/profile"), true, "1280,900");
        assert!(args.contains(&"--remote-debugging-port=9321".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,900".to_string()));
        assert_eq!(args.last().map(|s| s.as_str()), Some("about:blank"));
    }

    #[test]
    fn test_browser_args_headed_omits_headless() {
        let args = build_browser_args(9321, Path::new("/tmp/profile"), false, "1280,900");
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }
}
