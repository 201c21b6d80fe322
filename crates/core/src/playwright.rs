//! Playwright browser automation
//!
//! A single long-lived `node` process runs a small bridge script that owns
//! every browser and page. Requests and replies are line-delimited JSON on
//! the bridge's stdin and stdout, matched by request id:
//!
//! ```text
//! -> {"id":7,"cmd":"goto","params":{"page":2,"url":"http://...","timeout":30000}}
//! <- {"id":7,"ok":true,"result":null}
//! <- {"id":8,"ok":false,"kind":"timeout","error":"Timeout 30000ms exceeded."}
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use dialog_differ_common::{DifferConfig, RenderError, Size};

use crate::renderer::{BrowserId, ClipRegion, PageId, RenderResult, Renderer};

/// Extra time granted to a reply beyond the browser-side timeout
const REPLY_GRACE_MS: u64 = 1_000;

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const browsers = new Map();
const pages = new Map();
let nextHandle = 1;

function lookup(map, id, kind) {
  const value = map.get(id);
  if (!value) {
    throw new Error(`unknown ${kind} ${id}`);
  }
  return value;
}

const handlers = {
  async launch({ timeout, options }) {
    const { browser: type = 'chromium', ...launchOptions } = options || {};
    const browser = await playwright[type].launch({ ...launchOptions, timeout });
    const id = nextHandle++;
    browsers.set(id, browser);
    return id;
  },
  async newPage({ browser }) {
    const page = await lookup(browsers, browser, 'browser').newPage();
    const id = nextHandle++;
    pages.set(id, page);
    return id;
  },
  async goto({ page, url, timeout }) {
    await lookup(pages, page, 'page').goto(url, { timeout });
    return null;
  },
  async evaluate({ page, script, args }) {
    const source = `(${script})(...${JSON.stringify(args)})`;
    const result = await lookup(pages, page, 'page').evaluate(source);
    return result === undefined ? null : result;
  },
  async setViewport({ page, width, height }) {
    await lookup(pages, page, 'page').setViewportSize({ width, height });
    return null;
  },
  async waitForSelector({ page, selector, timeout }) {
    await lookup(pages, page, 'page').waitForSelector(selector, { timeout });
    return null;
  },
  async screenshot({ page, clip }) {
    const buffer = await lookup(pages, page, 'page').screenshot(clip ? { clip } : {});
    return buffer.toString('base64');
  },
  async closePage({ page }) {
    const handle = pages.get(page);
    pages.delete(page);
    if (handle) {
      await handle.close();
    }
    return null;
  },
  async closeBrowser({ browser }) {
    const handle = browsers.get(browser);
    browsers.delete(browser);
    if (handle) {
      await handle.close();
    }
    return null;
  },
};

const rl = readline.createInterface({ input: process.stdin });

rl.on('line', async (line) => {
  let request;
  try {
    request = JSON.parse(line);
  } catch (error) {
    console.error(`invalid request: ${error.message}`);
    return;
  }

  const { id, cmd, params } = request;
  const reply = (body) => process.stdout.write(JSON.stringify({ id, ...body }) + '\n');
  const handler = handlers[cmd];
  if (!handler) {
    reply({ ok: false, kind: 'protocol', error: `unknown command ${cmd}` });
    return;
  }

  try {
    reply({ ok: true, result: await handler(params || {}) });
  } catch (error) {
    const kind = error.name === 'TimeoutError' ? 'timeout' : 'failed';
    reply({ ok: false, kind, error: error.message });
  }
});

rl.on('close', async () => {
  for (const browser of browsers.values()) {
    await browser.close().catch(() => {});
  }
  process.exit(0);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for the Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,
    /// Browser used when the launch options do not name one
    pub browser: Browser,
    /// Reply timeout for calls that carry no timeout of their own (milliseconds)
    pub command_timeout_ms: u64,
}

impl PlaywrightConfig {
    pub fn from_config(config: &DifferConfig) -> Self {
        Self {
            command_timeout_ms: config.browser_timeout,
            ..Self::default()
        }
    }
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            browser: Browser::Chromium,
            command_timeout_ms: dialog_differ_common::config::DEFAULT_BROWSER_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

/// [`Renderer`] driving Playwright through the node bridge
pub struct PlaywrightRenderer {
    config: PlaywrightConfig,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightRenderer {
    /// Start the bridge process
    pub async fn spawn(config: PlaywrightConfig) -> RenderResult<Self> {
        Self::check_node_installed(&config).await?;

        let script_dir = tempfile::tempdir()
            .map_err(|e| RenderError::Launch(format!("cannot create bridge directory: {}", e)))?;
        let script_path = script_dir.path().join("bridge.js");
        tokio::fs::write(&script_path, BRIDGE_SCRIPT)
            .await
            .map_err(|e| RenderError::Launch(format!("cannot write bridge script: {}", e)))?;

        let mut child = Command::new(&config.node_binary)
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RenderError::Launch(format!("failed to spawn {}: {}", config.node_binary.display(), e))
            })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(RenderError::Launch("bridge stdio is not piped".to_string())),
        };

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let replies = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<BridgeReply>(&line) {
                        Ok(reply) => {
                            if let Some(tx) = replies.lock().remove(&reply.id) {
                                let _ = tx.send(reply);
                            }
                        }
                        Err(e) => debug!("Ignoring bridge output {:?}: {}", line, e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read from Playwright bridge: {}", e);
                        break;
                    }
                }
            }
            // Dropping the senders fails every waiting request
            replies.lock().clear();
            debug!("Playwright bridge output closed");
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[bridge] {}", line);
            }
        });

        info!("Started Playwright bridge ({})", config.browser.as_str());

        Ok(Self {
            config,
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            _script_dir: script_dir,
        })
    }

    /// Check that node is available
    async fn check_node_installed(config: &PlaywrightConfig) -> RenderResult<()> {
        let status = Command::new(&config.node_binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(RenderError::Launch(format!(
                "{} not found. Install Node.js and run: npm install playwright && npx playwright install",
                config.node_binary.display()
            ))),
        }
    }

    /// Stop the bridge, closing any browser still open
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!("Failed to stop Playwright bridge: {}", e);
        }
    }

    async fn request(&self, cmd: &str, params: Value, timeout_ms: u64) -> RenderResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut line = json!({ "id": id, "cmd": cmd, "params": params }).to_string();
        line.push('\n');

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            warn!("Failed to write to Playwright bridge: {}", e);
            return Err(RenderError::Closed);
        }

        let wait = Duration::from_millis(timeout_ms.saturating_add(REPLY_GRACE_MS));
        let reply = match tokio::time::timeout(wait, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(RenderError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(RenderError::Timeout {
                    what: describe(cmd, &params),
                    timeout_ms,
                });
            }
        };

        if reply.ok {
            Ok(reply.result)
        } else {
            Err(failure(cmd, &params, reply, timeout_ms))
        }
    }

    fn handle_from(value: Value, cmd: &str) -> RenderResult<u64> {
        value
            .as_u64()
            .ok_or_else(|| RenderError::Protocol(format!("{} returned {} instead of a handle", cmd, value)))
    }
}

/// Human-readable target of a command, used in timeout errors
fn describe(cmd: &str, params: &Value) -> String {
    match cmd {
        "goto" => format!("navigation to {}", params["url"].as_str().unwrap_or_default()),
        "waitForSelector" => format!("selector {}", params["selector"].as_str().unwrap_or_default()),
        other => other.to_string(),
    }
}

fn failure(cmd: &str, params: &Value, reply: BridgeReply, timeout_ms: u64) -> RenderError {
    let message = reply.error.unwrap_or_else(|| "unknown error".to_string());

    if reply.kind.as_deref() == Some("timeout") {
        return RenderError::Timeout {
            what: describe(cmd, params),
            timeout_ms,
        };
    }

    match cmd {
        "launch" => RenderError::Launch(message),
        "goto" => RenderError::Navigation {
            url: params["url"].as_str().unwrap_or_default().to_string(),
            message,
        },
        "evaluate" => RenderError::Evaluation(message),
        "setViewport" => RenderError::Viewport {
            size: Size::new(
                params["width"].as_u64().unwrap_or_default() as u32,
                params["height"].as_u64().unwrap_or_default() as u32,
            ),
            message,
        },
        "screenshot" => RenderError::Screenshot(message),
        _ => RenderError::Protocol(message),
    }
}

#[async_trait]
impl Renderer for PlaywrightRenderer {
    async fn launch(&self, timeout_ms: u64, options: &Value) -> RenderResult<BrowserId> {
        let mut options = match options {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(RenderError::Launch(format!(
                    "browser options must be an object, got {}",
                    other
                )))
            }
        };
        options
            .entry("browser")
            .or_insert_with(|| json!(self.config.browser.as_str()));

        let value = self
            .request("launch", json!({ "timeout": timeout_ms, "options": options }), timeout_ms)
            .await?;
        Ok(BrowserId(Self::handle_from(value, "launch")?))
    }

    async fn new_page(&self, browser: BrowserId) -> RenderResult<PageId> {
        let value = self
            .request("newPage", json!({ "browser": browser.0 }), self.config.command_timeout_ms)
            .await?;
        Ok(PageId(Self::handle_from(value, "newPage")?))
    }

    async fn goto(&self, page: PageId, url: &str, timeout_ms: u64) -> RenderResult<()> {
        self.request("goto", json!({ "page": page.0, "url": url, "timeout": timeout_ms }), timeout_ms)
            .await?;
        Ok(())
    }

    async fn evaluate(&self, page: PageId, script: &str, args: Vec<Value>) -> RenderResult<Value> {
        self.request(
            "evaluate",
            json!({ "page": page.0, "script": script, "args": args }),
            self.config.command_timeout_ms,
        )
        .await
    }

    async fn set_viewport(&self, page: PageId, size: Size) -> RenderResult<()> {
        self.request(
            "setViewport",
            json!({ "page": page.0, "width": size.width, "height": size.height }),
            self.config.command_timeout_ms,
        )
        .await?;
        Ok(())
    }

    async fn wait_for_selector(&self, page: PageId, selector: &str, timeout_ms: u64) -> RenderResult<()> {
        self.request(
            "waitForSelector",
            json!({ "page": page.0, "selector": selector, "timeout": timeout_ms }),
            timeout_ms,
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, page: PageId, clip: Option<ClipRegion>) -> RenderResult<Vec<u8>> {
        let value = self
            .request(
                "screenshot",
                json!({ "page": page.0, "clip": clip }),
                self.config.command_timeout_ms,
            )
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| RenderError::Screenshot("bridge returned no image data".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| RenderError::Screenshot(format!("invalid image data: {}", e)))
    }

    async fn close_page(&self, page: PageId) -> RenderResult<()> {
        self.request("closePage", json!({ "page": page.0 }), self.config.command_timeout_ms)
            .await?;
        Ok(())
    }

    async fn close_browser(&self, browser: BrowserId) -> RenderResult<()> {
        self.request("closeBrowser", json!({ "browser": browser.0 }), self.config.command_timeout_ms)
            .await?;
        Ok(())
    }
}
