//! Transport to the inspected page.
//!
//! `PageSession` speaks WebDriver to a locally running driver and targets the
//! tab whose URL matches the configured host pattern. Round-trips follow a
//! two-attempt policy: an empty reply or a transport error drops the cached
//! session, re-attaches a fresh one, and retries once. Exhausting the
//! attempts surfaces as [`Delivery::Unreachable`]; a page that answered but
//! reported a failure surfaces as [`Delivery::ContentError`]. Neither is ever
//! thrown across this boundary.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use fantoccini::{Client, ClientBuilder};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use super::frame::{self, FrameRequest, RasterFrame};
use super::probe::{self, PageMeasurements};

const MAX_DELIVERY_ATTEMPTS: u32 = 2;

/// Outcome of one message round-trip to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The page answered and the payload parsed.
    Delivered(T),
    /// No endpoint answered after the retry policy ran out.
    Unreachable,
    /// The page answered with a tagged failure (no video, zero resolution,
    /// rasterization error, ...).
    ContentError(String),
}

impl<T> Delivery<T> {
    pub fn delivered(self) -> Option<T> {
        match self {
            Delivery::Delivered(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Delivery::Delivered(value) => Delivery::Delivered(f(value)),
            Delivery::Unreachable => Delivery::Unreachable,
            Delivery::ContentError(reason) => Delivery::ContentError(reason),
        }
    }
}

/// The page side of the capture protocol, as the orchestrator sees it.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fresh raw measurements of the dominant video element.
    async fn measurements(&self) -> Delivery<PageMeasurements>;

    /// Rasterize the video element in-page at the requested surface size.
    async fn capture_frame(&self, request: FrameRequest) -> Delivery<RasterFrame>;

    /// Full-viewport screenshot, PNG-encoded.
    async fn viewport_screenshot(&self) -> Delivery<Vec<u8>>;

    /// Current page URL, for navigation watching.
    async fn location(&self) -> Delivery<String>;
}

pub struct PageSession {
    webdriver_url: String,
    host_pattern: String,
    debugger_address: Option<String>,
    client: Mutex<Option<Client>>,
}

impl PageSession {
    /// `debugger_address` attaches the driver to an already-running browser
    /// instead of spawning one, when the driver supports it.
    pub fn new(
        webdriver_url: impl Into<String>,
        host_pattern: impl Into<String>,
        debugger_address: Option<String>,
    ) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            host_pattern: host_pattern.into(),
            debugger_address,
            client: Mutex::new(None),
        }
    }

    /// Connects a fresh WebDriver session and switches it to the first tab
    /// whose URL matches the host pattern.
    async fn attach(&self) -> Result<Client> {
        let mut builder = ClientBuilder::rustls().context("webdriver TLS setup failed")?;

        if let Some(address) = &self.debugger_address {
            let mut chrome_options = serde_json::Map::new();
            chrome_options.insert("debuggerAddress".into(), Value::String(address.clone()));
            let mut capabilities = serde_json::Map::new();
            capabilities.insert("goog:chromeOptions".into(), Value::Object(chrome_options));
            builder.capabilities(capabilities);
        }

        let client = builder
            .connect(&self.webdriver_url)
            .await
            .with_context(|| format!("failed to connect to webdriver at {}", self.webdriver_url))?;

        let handles = client
            .windows()
            .await
            .context("failed to enumerate browser tabs")?;

        for handle in handles {
            client
                .switch_to_window(handle)
                .await
                .context("failed to switch tab")?;
            let url = client.current_url().await.context("failed to read tab URL")?;
            if url.as_str().contains(&self.host_pattern) {
                info!("attached to tab {url}");
                return Ok(client);
            }
        }

        let _ = client.close().await;
        bail!("no open tab matches host pattern '{}'", self.host_pattern);
    }

    async fn client(&self) -> Result<Client> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self.attach().await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn invalidate(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.close().await;
        }
    }

    /// The two-attempt policy shared by every round-trip.
    async fn with_retry<F>(&self, describe: &str, op: F) -> Delivery<Value>
    where
        F: AsyncRoundTrip,
    {
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            let client = match self.client().await {
                Ok(client) => client,
                Err(err) => {
                    warn!("{describe}: attach failed (attempt {attempt}): {err:#}");
                    continue;
                }
            };

            match op.run(client).await {
                Ok(value) if !value.is_null() => return Delivery::Delivered(value),
                Ok(_) => {
                    warn!("{describe}: empty reply, re-attaching (attempt {attempt})");
                    self.invalidate().await;
                }
                Err(err) => {
                    warn!("{describe}: round-trip failed, re-attaching (attempt {attempt}): {err}");
                    self.invalidate().await;
                }
            }
        }

        Delivery::Unreachable
    }

    async fn eval(&self, describe: &str, script: String, args: Vec<Value>) -> Delivery<Value> {
        self.with_retry(describe, ScriptCall {
            script,
            args,
            asynchronous: false,
        })
        .await
    }

    async fn eval_async(&self, describe: &str, script: String, args: Vec<Value>) -> Delivery<Value> {
        self.with_retry(describe, ScriptCall {
            script,
            args,
            asynchronous: true,
        })
        .await
    }
}

/// One concrete WebDriver command, retried as a unit.
#[async_trait]
trait AsyncRoundTrip: Send + Sync {
    async fn run(&self, client: Client) -> Result<Value>;
}

struct ScriptCall {
    script: String,
    args: Vec<Value>,
    asynchronous: bool,
}

#[async_trait]
impl AsyncRoundTrip for ScriptCall {
    async fn run(&self, client: Client) -> Result<Value> {
        let result = if self.asynchronous {
            client.execute_async(&self.script, self.args.clone()).await
        } else {
            client.execute(&self.script, self.args.clone()).await
        };
        result.map_err(|err| anyhow!("script execution failed: {err}"))
    }
}

struct ScreenshotCall;

#[async_trait]
impl AsyncRoundTrip for ScreenshotCall {
    async fn run(&self, client: Client) -> Result<Value> {
        let bytes = client
            .screenshot()
            .await
            .map_err(|err| anyhow!("viewport screenshot failed: {err}"))?;
        // Wrapped so the shared retry loop can see a non-null reply; unpacked
        // by the caller below.
        Ok(Value::String(BASE64.encode(bytes)))
    }
}

/// Splits a tagged page reply into payload or content failure.
pub(crate) fn parse_tagged<T: DeserializeOwned>(value: Value) -> Delivery<T> {
    let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let reason = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unspecified page failure")
            .to_string();
        return Delivery::ContentError(reason);
    }

    match serde_json::from_value::<T>(value) {
        Ok(payload) => Delivery::Delivered(payload),
        Err(err) => Delivery::ContentError(format!("malformed page reply: {err}")),
    }
}

#[derive(Debug, serde::Deserialize)]
struct RasterReply {
    data_url: String,
    width: u32,
    height: u32,
}

#[async_trait]
impl FrameSource for PageSession {
    async fn measurements(&self) -> Delivery<PageMeasurements> {
        match self.eval("video info", probe::measure_script(), Vec::new()).await {
            Delivery::Delivered(value) => parse_tagged(value),
            Delivery::Unreachable => Delivery::Unreachable,
            Delivery::ContentError(reason) => Delivery::ContentError(reason),
        }
    }

    async fn capture_frame(&self, request: FrameRequest) -> Delivery<RasterFrame> {
        let args = vec![
            Value::from(request.width),
            Value::from(request.height),
            Value::from(request.format.mime()),
            request
                .format
                .canvas_quality()
                .map(Value::from)
                .unwrap_or(Value::Null),
            Value::from(frame::READINESS_TIMEOUT_MS),
        ];

        let reply = match self
            .eval_async("frame capture", frame::rasterize_script(), args)
            .await
        {
            Delivery::Delivered(value) => parse_tagged::<RasterReply>(value),
            Delivery::Unreachable => return Delivery::Unreachable,
            Delivery::ContentError(reason) => return Delivery::ContentError(reason),
        };

        match reply {
            Delivery::Delivered(raw) => match frame::decode_data_url(&raw.data_url) {
                Ok(bytes) => Delivery::Delivered(RasterFrame {
                    bytes,
                    width: raw.width,
                    height: raw.height,
                }),
                Err(err) => Delivery::ContentError(format!("undecodable frame payload: {err}")),
            },
            Delivery::Unreachable => Delivery::Unreachable,
            Delivery::ContentError(reason) => Delivery::ContentError(reason),
        }
    }

    async fn viewport_screenshot(&self) -> Delivery<Vec<u8>> {
        match self.with_retry("viewport screenshot", ScreenshotCall).await {
            Delivery::Delivered(Value::String(encoded)) => match BASE64.decode(encoded) {
                Ok(bytes) => Delivery::Delivered(bytes),
                Err(err) => Delivery::ContentError(format!("bad screenshot payload: {err}")),
            },
            Delivery::Delivered(_) => Delivery::ContentError("bad screenshot payload".into()),
            Delivery::Unreachable => Delivery::Unreachable,
            Delivery::ContentError(reason) => Delivery::ContentError(reason),
        }
    }

    async fn location(&self) -> Delivery<String> {
        match self
            .eval("page location", probe::LOCATION_SCRIPT.to_string(), Vec::new())
            .await
        {
            Delivery::Delivered(Value::String(href)) => Delivery::Delivered(href),
            Delivery::Delivered(other) => {
                Delivery::ContentError(format!("unexpected location reply: {other}"))
            }
            Delivery::Unreachable => Delivery::Unreachable,
            Delivery::ContentError(reason) => Delivery::ContentError(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    #[test]
    fn tagged_ok_parses_payload() {
        let reply = parse_tagged::<Payload>(json!({"ok": true, "value": 7}));
        assert_eq!(reply, Delivery::Delivered(Payload { value: 7 }));
    }

    #[test]
    fn tagged_failure_carries_reason() {
        let reply = parse_tagged::<Payload>(json!({"ok": false, "error": "no video element found"}));
        assert_eq!(
            reply,
            Delivery::ContentError("no video element found".into())
        );

        let reply = parse_tagged::<Payload>(json!({"unrelated": 1}));
        assert!(matches!(reply, Delivery::ContentError(_)));
    }

    #[test]
    fn tagged_ok_with_bad_shape_is_content_error() {
        let reply = parse_tagged::<Payload>(json!({"ok": true, "value": "seven"}));
        assert!(matches!(reply, Delivery::ContentError(_)));
    }

    #[test]
    fn delivery_combinators() {
        assert_eq!(Delivery::Delivered(2).map(|n| n * 2), Delivery::Delivered(4));
        assert_eq!(Delivery::<u32>::Unreachable.map(|n| n * 2), Delivery::Unreachable);
        assert_eq!(Delivery::Delivered(5).delivered(), Some(5));
        assert_eq!(Delivery::<u32>::Unreachable.delivered(), None);
    }
}
