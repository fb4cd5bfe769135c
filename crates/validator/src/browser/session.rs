//! Browser session supervision.
//!
//! One long-lived local browser process per debugging port, launched on
//! demand and deliberately never killed: later validation calls reuse it and
//! amortize the launch cost. A per-port launch latch collapses concurrent
//! `ensure_ready` calls onto a single spawn attempt.

use pagelens_core::config::{LAUNCH_PROBE_INTERVAL, LAUNCH_TIMEOUT};
use pagelens_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Singleton-per-caller handle over browser processes keyed by debugging
/// port. Holds no process handles itself; reachability of the port is the
/// only state that matters.
pub struct SessionManager {
    launch_latches: Mutex<HashMap<u16, Arc<Mutex<()>>>>,
    discover_binary: fn() -> Option<String>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_discovery(find_browser_binary)
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap out how the browser binary is located (host-dependent by
    /// default).
    pub fn with_discovery(discover_binary: fn() -> Option<String>) -> Self {
        Self {
            launch_latches: Mutex::new(HashMap::new()),
            discover_binary,
        }
    }

    /// Ensure a debuggable browser is reachable at `port`, launching one if
    /// absent. Succeeds silently when a session already exists.
    pub async fn ensure_ready(&self, port: u16) -> Result<()> {
        if probe_port(port).await {
            debug!(port, "browser already reachable");
            return Ok(());
        }

        let latch = {
            let mut latches = self.launch_latches.lock().await;
            latches.entry(port).or_default().clone()
        };
        // Concurrent callers queue here and find the port ready on re-probe
        // instead of racing to spawn duplicates.
        let _in_flight = latch.lock().await;
        if probe_port(port).await {
            return Ok(());
        }

        let binary = (self.discover_binary)().ok_or_else(|| {
            Error::ChromeNotFound(
                "no Chrome/Chromium/Edge binary found in known install locations".into(),
            )
        })?;

        info!(port, binary = %binary, "launching headless browser");
        // Detached: null stdio, child handle dropped, never killed here. The
        // process outlives the caller so later runs can reuse it.
        std::process::Command::new(&binary)
            .args(browser_args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ChromeNotFound(format!("failed to spawn {}: {}", binary, e)))?;

        wait_for_cdp_ready(port).await
    }

    /// Resolve the first `page` target's WebSocket debugger URL.
    pub async fn page_ws_url(&self, port: u16) -> Result<String> {
        let url = format!("http://127.0.0.1:{}/json/list", port);
        for attempt in 0..10 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            let Ok(resp) = reqwest::get(&url).await else {
                continue;
            };
            let Ok(targets) = resp.json::<Vec<Value>>().await else {
                continue;
            };
            for target in &targets {
                if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                    if let Some(ws) = target
                        .get("webSocketDebuggerUrl")
                        .and_then(|v| v.as_str())
                    {
                        return Ok(ws.to_string());
                    }
                }
            }
        }
        Err(Error::ConnectionRefused(format!(
            "no page target exposed on port {}",
            port
        )))
    }
}

/// Short-timeout TCP probe of the debugging port.
async fn probe_port(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}

/// Poll `/json/version` until the freshly spawned browser answers or the
/// launch window closes.
async fn wait_for_cdp_ready(port: u16) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let start = Instant::now();
    loop {
        if start.elapsed() > LAUNCH_TIMEOUT {
            return Err(Error::LaunchTimeout(format!(
                "browser did not expose port {} within {:?}",
                port, LAUNCH_TIMEOUT
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.json::<Value>().await.is_ok() {
                info!(port, "browser debugging endpoint ready");
                return Ok(());
            }
        }
        tokio::time::sleep(LAUNCH_PROBE_INTERVAL).await;
    }
}

/// Headless launch arguments; hardening flags match what a CI-safe headless
/// Chrome needs.
fn browser_args(port: u16) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", port),
        "--headless=new".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
        "about:blank".to_string(),
    ]
}

/// First existing browser binary from the per-OS candidate list.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_port(port).await);
        drop(listener);
        assert!(!probe_port(port).await);
    }

    #[test]
    fn test_browser_args_launch_headless_on_port() {
        let args = browser_args(9222);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[tokio::test]
    async fn test_no_binary_and_dead_port_is_chrome_not_found() {
        // Grab a free port, then release it so the probe finds nothing.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mgr = SessionManager::with_discovery(|| None);
        let err = mgr.ensure_ready(port).await.unwrap_err();
        assert_eq!(err.code(), "CHROME_NOT_FOUND");
        // Nothing was spawned, so the port stays dead.
        assert!(!probe_port(port).await);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready_share_one_latch() {
        let mgr = SessionManager::new();
        let a = {
            let mut latches = mgr.launch_latches.lock().await;
            latches.entry(9222).or_default().clone()
        };
        let b = {
            let mut latches = mgr.launch_latches.lock().await;
            latches.entry(9222).or_default().clone()
        };
        assert!(Arc::ptr_eq(&a, &b));
    }
}
