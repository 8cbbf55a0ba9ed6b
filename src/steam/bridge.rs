//! HTTP client for a PICS bridge sidecar that holds the actual CM connection.
//!
//! Lifecycle calls return as soon as the request is spawned; the outcome is pushed
//! onto the event queue when the sidecar answers, the same way a native CM client
//! raises callbacks.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::events::SteamEvent;
use super::transport::{ChangesResponse, EventSender, ProductInfoResponse, SteamTransport};

#[derive(Debug, Deserialize)]
struct LogOnReply {
    success: bool,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProductInfoRequest<'a> {
    apps: &'a [u32],
    packages: &'a [u32],
}

pub struct BridgeTransport {
    client: Client,
    base: Url,
    events: EventSender,
    connected: Arc<AtomicBool>,
}

impl BridgeTransport {
    pub fn new(base_url: &str, timeout: Duration, events: EventSender) -> Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid bridge url {base_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("steam-promo-scraper/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building bridge http client")?;
        Ok(Self {
            client,
            base,
            events,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("joining bridge path {path}"))
    }

    /// Fires `path` in the background and reports the outcome as a callback.
    fn spawn_lifecycle<F>(&self, path: &'static str, on_reply: F) -> Result<()>
    where
        F: FnOnce(Result<reqwest::Response, reqwest::Error>) -> BoxFuture<'static, SteamEvent>
            + Send
            + 'static,
    {
        let url = self.endpoint(path)?;
        let client = self.client.clone();
        let events = self.events.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let reply = client
                .post(url)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = &reply {
                warn!(path, error = %e, "bridge lifecycle call failed");
            }
            let event = on_reply(reply).await;
            match &event {
                SteamEvent::Connected => connected.store(true, Ordering::SeqCst),
                SteamEvent::Disconnected { .. } => connected.store(false, Ordering::SeqCst),
                _ => {}
            }
            debug!(path, kind = %event.kind(), "bridge callback");
            if events.send(event).is_err() {
                debug!(path, "callback queue closed; dropping event");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SteamTransport for BridgeTransport {
    async fn connect(&self) -> Result<()> {
        self.spawn_lifecycle("session/connect", |reply| {
            async move {
                match reply {
                    Ok(_) => SteamEvent::Connected,
                    Err(_) => SteamEvent::Disconnected {
                        user_initiated: false,
                    },
                }
            }
            .boxed()
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.spawn_lifecycle("session/disconnect", |_| {
            async move {
                SteamEvent::Disconnected {
                    user_initiated: true,
                }
            }
            .boxed()
        })
    }

    async fn log_on_anonymous(&self) -> Result<()> {
        self.spawn_lifecycle("session/logon", |reply| {
            async move {
                let parsed = match reply {
                    Ok(resp) => resp.json::<LogOnReply>().await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match parsed {
                    Ok(r) => SteamEvent::LoggedOn {
                        success: r.success,
                        detail: r.detail,
                    },
                    Err(detail) => SteamEvent::LoggedOn {
                        success: false,
                        detail: Some(detail),
                    },
                }
            }
            .boxed()
        })
    }

    async fn log_off(&self) -> Result<()> {
        self.spawn_lifecycle("session/logoff", |_| {
            async move { SteamEvent::LoggedOff { reason: None } }.boxed()
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn changes_since(
        &self,
        since: u32,
        include_apps: bool,
        include_packages: bool,
    ) -> Result<ChangesResponse> {
        let mut url = self.endpoint("changes")?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_string())
            .append_pair("apps", if include_apps { "1" } else { "0" })
            .append_pair("packages", if include_packages { "1" } else { "0" });
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("changes request")?
            .error_for_status()
            .context("changes status")?;
        resp.json::<ChangesResponse>()
            .await
            .context("decoding changes response")
    }

    async fn product_info(&self, apps: &[u32], packages: &[u32]) -> Result<ProductInfoResponse> {
        let url = self.endpoint("product-info")?;
        let resp = self
            .client
            .post(url)
            .json(&ProductInfoRequest { apps, packages })
            .send()
            .await
            .context("product-info request")?
            .error_for_status()
            .context("product-info status")?;
        resp.json::<ProductInfoResponse>()
            .await
            .context("decoding product-info response")
    }
}
