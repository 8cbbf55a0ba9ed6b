//! Scripted in-memory transport for unit tests.
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::SteamEvent;
use super::keyvalue::KeyValue;
use super::session::{SessionConfig, SteamSession};
use super::transport::{
    event_queue, ChangeData, ChangesResponse, EventQueue, EventSender, ProductInfoResponse,
    ProductInfoResult, SteamTransport,
};

pub struct FakeTransport {
    events: EventSender,
    queue: Mutex<Option<EventQueue>>,
    auto_events: bool,
    connected: AtomicBool,
    logon_success: AtomicBool,
    changes: Mutex<VecDeque<anyhow::Result<ChangesResponse>>>,
    product_info: Mutex<VecDeque<anyhow::Result<ProductInfoResponse>>>,
    calls: Mutex<Vec<String>>,
    product_info_served: AtomicUsize,
    cancel_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeTransport {
    fn build(auto_events: bool) -> Arc<Self> {
        let (events, queue) = event_queue();
        Arc::new(Self {
            events,
            queue: Mutex::new(Some(queue)),
            auto_events,
            connected: AtomicBool::new(false),
            logon_success: AtomicBool::new(true),
            changes: Mutex::new(VecDeque::new()),
            product_info: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            product_info_served: AtomicUsize::new(0),
            cancel_at: Mutex::new(None),
        })
    }

    /// Answers every lifecycle call with the matching callback.
    pub fn auto() -> Arc<Self> {
        Self::build(true)
    }

    /// Never raises callbacks on its own.
    pub fn silent() -> Arc<Self> {
        Self::build(false)
    }

    pub fn take_queue(&self) -> EventQueue {
        self.queue
            .lock()
            .unwrap()
            .take()
            .expect("event queue already taken")
    }

    pub fn set_logon_success(&self, ok: bool) {
        self.logon_success.store(ok, Ordering::SeqCst);
    }

    pub fn push_changes(&self, resp: anyhow::Result<ChangesResponse>) {
        self.changes.lock().unwrap().push_back(resp);
    }

    pub fn push_product_info(&self, resp: anyhow::Result<ProductInfoResponse>) {
        self.product_info.lock().unwrap().push_back(resp);
    }

    /// Cancels `token` while serving the `nth` product-info request (1-based),
    /// after the scripted answer has been picked.
    pub fn cancel_on_product_info(&self, nth: usize, token: CancellationToken) {
        *self.cancel_at.lock().unwrap() = Some((nth, token));
    }

    pub fn emit(&self, event: SteamEvent) {
        let _ = self.events.send(event);
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(SteamEvent::Disconnected {
            user_initiated: false,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SteamTransport for FakeTransport {
    async fn connect(&self) -> anyhow::Result<()> {
        self.record("connect".into());
        if self.auto_events {
            self.connected.store(true, Ordering::SeqCst);
            self.emit(SteamEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.record("disconnect".into());
        if self.auto_events {
            self.connected.store(false, Ordering::SeqCst);
            self.emit(SteamEvent::Disconnected {
                user_initiated: true,
            });
        }
        Ok(())
    }

    async fn log_on_anonymous(&self) -> anyhow::Result<()> {
        self.record("log_on_anonymous".into());
        if self.auto_events {
            let success = self.logon_success.load(Ordering::SeqCst);
            self.emit(SteamEvent::LoggedOn {
                success,
                detail: (!success).then(|| "ServiceUnavailable".to_string()),
            });
        }
        Ok(())
    }

    async fn log_off(&self) -> anyhow::Result<()> {
        self.record("log_off".into());
        if self.auto_events {
            self.emit(SteamEvent::LoggedOff { reason: None });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn changes_since(
        &self,
        since: u32,
        include_apps: bool,
        include_packages: bool,
    ) -> anyhow::Result<ChangesResponse> {
        self.record(format!("changes_since:{since}:{include_apps}:{include_packages}"));
        self.changes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted change response")))
    }

    async fn product_info(
        &self,
        apps: &[u32],
        packages: &[u32],
    ) -> anyhow::Result<ProductInfoResponse> {
        self.record(format!("product_info:{apps:?}:{packages:?}"));
        let served = self.product_info_served.fetch_add(1, Ordering::SeqCst) + 1;
        let answer = self.product_info.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ProductInfoResponse {
                failed: true,
                results: Vec::new(),
            })
        });
        if let Some((nth, token)) = self.cancel_at.lock().unwrap().as_ref() {
            if *nth == served {
                token.cancel();
            }
        }
        answer
    }
}

pub struct SessionHarness {
    pub transport: Arc<FakeTransport>,
    pub session: Arc<SteamSession>,
    pub pump_shutdown: CancellationToken,
    pub pump: JoinHandle<u64>,
}

impl SessionHarness {
    pub fn shutdown(&self) {
        self.pump_shutdown.cancel();
    }
}

/// Wires transport, session and a running pump the way `main` does.
pub fn spawn_session(transport: Arc<FakeTransport>, config: SessionConfig) -> SessionHarness {
    let (session, pump) = super::wire_session(transport.clone(), transport.take_queue(), config);
    let pump_shutdown = CancellationToken::new();
    let pump = tokio::spawn(pump.run(pump_shutdown.clone()));
    SessionHarness {
        transport,
        session,
        pump_shutdown,
        pump,
    }
}

/// Harness already connected and logged on.
pub async fn logged_on_session() -> SessionHarness {
    let h = spawn_session(FakeTransport::auto(), SessionConfig::default());
    let ct = CancellationToken::new();
    h.session.connect(&ct).await.expect("connect");
    h.session.log_on(&ct).await.expect("log on");
    h
}

// descriptor fixtures

pub fn promo_package(package_id: u32, app_id: u32) -> (u32, KeyValue) {
    (
        package_id,
        KeyValue::node(
            package_id.to_string(),
            vec![
                KeyValue::node("appids", vec![KeyValue::leaf("0", app_id.to_string())]),
                KeyValue::node(
                    "extended",
                    vec![
                        KeyValue::leaf("freepromotion", "1"),
                        KeyValue::leaf("starttime", "1700000000"),
                        KeyValue::leaf("expirytime", "1700003600"),
                    ],
                ),
            ],
        ),
    )
}

pub fn full_app(app_id: u32, name: &str) -> ProductInfoResponse {
    let mut apps = BTreeMap::new();
    apps.insert(
        app_id,
        KeyValue::node(
            "appinfo",
            vec![KeyValue::node(
                "common",
                vec![
                    KeyValue::leaf("name", name),
                    KeyValue::node("header_image", vec![KeyValue::leaf("english", "header.jpg")]),
                ],
            )],
        ),
    );
    ProductInfoResponse {
        failed: false,
        results: vec![ProductInfoResult {
            apps,
            packages: BTreeMap::new(),
        }],
    }
}

pub fn changes(current: u32, apps: &[u32], packages: &[u32]) -> ChangesResponse {
    let data = |id: &u32| (*id, ChangeData { change_number: current, needs_token: false });
    ChangesResponse {
        current_change_number: current,
        app_changes: apps.iter().map(data).collect(),
        package_changes: packages.iter().map(data).collect(),
    }
}

pub fn batch(packages: Vec<(u32, KeyValue)>) -> ProductInfoResponse {
    ProductInfoResponse {
        failed: false,
        results: vec![ProductInfoResult {
            apps: BTreeMap::new(),
            packages: packages.into_iter().collect(),
        }],
    }
}
