//! Headless Chrome discovery, launch, and DevTools endpoint resolution.
//!
//! Finds an installed Chrome-family binary, starts it headless against a
//! throwaway profile with a DevTools port, and resolves the WebSocket URL of
//! its first page target by polling the `/json/list` endpoint. The spawned
//! process is killed when the session is closed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::BrowserError;

/// Environment variable overriding browser discovery with an explicit path.
pub const CHROME_PATH_ENV: &str = "ICLOUD_AUTH_CHROME";

/// How long to keep polling `/json/list` for a debuggable page target.
const DEVTOOLS_READY_ATTEMPTS: u32 = 40;
const DEVTOOLS_READY_INTERVAL: Duration = Duration::from_millis(250);

/// Well-known Chrome/Chromium binary locations for the current platform.
fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }
}

/// Locate a Chrome-family binary: the env override wins, otherwise the
/// first existing well-known path.
pub fn find_chrome() -> Result<PathBuf, BrowserError> {
    if let Ok(override_path) = std::env::var(CHROME_PATH_ENV) {
        let path = PathBuf::from(override_path);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{CHROME_PATH_ENV} does not point at a file, falling back to discovery");
    }

    platform_candidate_paths()
        .iter()
        .map(Path::new)
        .find(|candidate| candidate.is_file())
        .map(Path::to_path_buf)
        .ok_or(BrowserError::NoChromeFound)
}

/// One entry of the DevTools `/json/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DevToolsTarget {
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

/// The first debuggable page target, if any.
pub fn pick_page_target(targets: &[DevToolsTarget]) -> Option<&DevToolsTarget> {
    targets
        .iter()
        .find(|t| t.target_type == "page" && t.web_socket_debugger_url.is_some())
}

/// A running headless Chrome owned by this process.
///
/// The profile directory lives only as long as the session; dropping the
/// session without calling [`close`](Self::close) leaves the child to the
/// kill-on-drop behavior of `tokio::process`.
pub struct ChromeSession {
    child: tokio::process::Child,
    /// WebSocket URL of the first page target.
    pub ws_url: String,
    _profile_dir: tempfile::TempDir,
}

impl ChromeSession {
    /// Launch `binary` headless with a DevTools port and wait for its first
    /// page target to become debuggable.
    pub async fn launch(binary: &Path, user_agent: &str) -> Result<Self, BrowserError> {
        let profile_dir = tempfile::tempdir().map_err(|e| BrowserError::LaunchFailed {
            path: binary.display().to_string(),
            source: e,
        })?;
        let port = free_local_port().map_err(|e| BrowserError::LaunchFailed {
            path: binary.display().to_string(),
            source: e,
        })?;

        tracing::info!(binary = %binary.display(), port, "launching headless Chrome");

        let child = tokio::process::Command::new(binary)
            .arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", profile_dir.path().display()))
            .arg(format!("--user-agent={user_agent}"))
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("about:blank")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed {
                path: binary.display().to_string(),
                source: e,
            })?;

        let ws_url = wait_for_page_target(port).await?;

        Ok(Self {
            child,
            ws_url,
            _profile_dir: profile_dir,
        })
    }

    /// Kill the browser process. Errors are reported but the session is
    /// considered closed either way.
    pub async fn close(mut self) -> Result<(), BrowserError> {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "failed to kill Chrome process");
        }
        Ok(())
    }
}

/// Bind-and-release a localhost port for the DevTools endpoint.
fn free_local_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Poll `/json/list` until a page target with a debugger URL shows up.
async fn wait_for_page_target(port: u16) -> Result<String, BrowserError> {
    let endpoint = format!("http://127.0.0.1:{port}/json/list");
    let client = reqwest::Client::new();

    for attempt in 0..DEVTOOLS_READY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(DEVTOOLS_READY_INTERVAL).await;
        }

        let targets: Vec<DevToolsTarget> = match client.get(&endpoint).send().await {
            Ok(response) => match response.json().await {
                Ok(targets) => targets,
                Err(_) => continue,
            },
            // Chrome is still starting up.
            Err(_) => continue,
        };

        let ws_url = pick_page_target(&targets).and_then(|t| t.web_socket_debugger_url.clone());
        if let Some(ws_url) = ws_url {
            tracing::debug!(url = %ws_url, "DevTools page target ready");
            return Ok(ws_url);
        }
    }

    Err(BrowserError::DevToolsNotReady { port })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(target_type: &str, ws: Option<&str>) -> DevToolsTarget {
        DevToolsTarget {
            target_type: target_type.to_string(),
            url: "about:blank".to_string(),
            web_socket_debugger_url: ws.map(str::to_string),
        }
    }

    #[test]
    fn picks_the_first_page_target() {
        let targets = vec![
            target("background_page", Some("ws://x/1")),
            target("page", Some("ws://x/2")),
            target("page", Some("ws://x/3")),
        ];
        let picked = pick_page_target(&targets).unwrap();
        assert_eq!(picked.web_socket_debugger_url.as_deref(), Some("ws://x/2"));
    }

    #[test]
    fn skips_page_targets_without_debugger_url() {
        let targets = vec![target("page", None), target("page", Some("ws://x/9"))];
        let picked = pick_page_target(&targets).unwrap();
        assert_eq!(picked.web_socket_debugger_url.as_deref(), Some("ws://x/9"));
    }

    #[test]
    fn no_page_target_yields_none() {
        let targets = vec![target("service_worker", Some("ws://x/1"))];
        assert!(pick_page_target(&targets).is_none());
    }

    #[test]
    fn devtools_list_json_deserializes() {
        let json = r#"[{
            "description": "",
            "devtoolsFrontendUrl": "/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/A1",
            "id": "A1",
            "title": "about:blank",
            "type": "page",
            "url": "about:blank",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A1"
        }]"#;
        let targets: Vec<DevToolsTarget> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_type, "page");
        assert_eq!(
            targets[0].web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A1")
        );
    }
}
