//! Seam between the session/sync code and whatever actually talks to Steam.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::events::SteamEvent;
use super::keyvalue::KeyValue;

/// Sending half of the transport's callback queue; the pump owns the receiver.
pub type EventSender = mpsc::UnboundedSender<SteamEvent>;
pub type EventQueue = mpsc::UnboundedReceiver<SteamEvent>;

pub fn event_queue() -> (EventSender, EventQueue) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeData {
    pub change_number: u32,
    #[serde(default)]
    pub needs_token: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    pub current_change_number: u32,
    #[serde(default)]
    pub app_changes: BTreeMap<u32, ChangeData>,
    #[serde(default)]
    pub package_changes: BTreeMap<u32, ChangeData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfoResult {
    #[serde(default)]
    pub apps: BTreeMap<u32, KeyValue>,
    #[serde(default)]
    pub packages: BTreeMap<u32, KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfoResponse {
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub results: Vec<ProductInfoResult>,
}

impl ProductInfoResponse {
    /// Every app and package descriptor across all result pages.
    pub fn descriptors(&self) -> impl Iterator<Item = &KeyValue> {
        self.results
            .iter()
            .flat_map(|r| r.apps.values().chain(r.packages.values()))
    }

    pub fn app(&self, app_id: u32) -> Option<&KeyValue> {
        self.results.iter().find_map(|r| r.apps.get(&app_id))
    }
}

/// Operations the remote session exposes.
///
/// Lifecycle calls only start the operation; completion arrives later as a
/// [`SteamEvent`] on the queue handed out at construction. Requests are plain
/// request/response pairs.
#[async_trait]
pub trait SteamTransport: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
    async fn log_on_anonymous(&self) -> anyhow::Result<()>;
    async fn log_off(&self) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;

    async fn changes_since(
        &self,
        since: u32,
        include_apps: bool,
        include_packages: bool,
    ) -> anyhow::Result<ChangesResponse>;

    async fn product_info(
        &self,
        apps: &[u32],
        packages: &[u32],
    ) -> anyhow::Result<ProductInfoResponse>;
}
