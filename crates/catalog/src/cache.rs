//! Process-lifetime catalog memo.
//!
//! [`CatalogCache::get_catalog`] runs discovery against every configured
//! worker on first use and hands out the same `Arc<Catalog>` afterwards.
//! Concurrent first callers serialize on the write lock; whoever takes it
//! first discovers, the rest find the slot filled.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rustedbridge_core::event::{DomainEvent, EventBus};
use rustedbridge_core::rpc::ToolSchema;
use rustedbridge_core::worker::WorkerSpec;
use rustedbridge_transport::session::WorkerClient;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::selector::selector_schema;

/// One worker's discovered operations and its synthesized selector.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub worker: WorkerSpec,
    pub tools: Vec<ToolSchema>,
    pub selector: ToolSchema,
}

impl CatalogEntry {
    pub fn new(worker: WorkerSpec, tools: Vec<ToolSchema>) -> Self {
        let selector = selector_schema(&worker, &tools);
        Self {
            worker,
            tools,
            selector,
        }
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn operation_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Discovered workers, in configured order. Workers that yielded no
/// operations are absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, worker: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.worker.name == worker)
    }

    /// One selector per worker, as presented to the reasoning component.
    pub fn selector_schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(|e| e.selector.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CatalogCache {
    client: WorkerClient,
    workers: Vec<WorkerSpec>,
    slot: RwLock<Option<Arc<Catalog>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl CatalogCache {
    pub fn new(client: WorkerClient, workers: Vec<WorkerSpec>) -> Self {
        Self {
            client,
            workers,
            slot: RwLock::new(None),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn client(&self) -> &WorkerClient {
        &self.client
    }

    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    /// The catalog, discovering it on first call.
    pub async fn get_catalog(&self) -> Arc<Catalog> {
        if let Some(catalog) = self.slot.read().await.as_ref() {
            return catalog.clone();
        }

        let mut slot = self.slot.write().await;
        if let Some(catalog) = slot.as_ref() {
            return catalog.clone();
        }

        let catalog = Arc::new(self.discover().await);
        *slot = Some(catalog.clone());
        catalog
    }

    pub async fn selector_schemas(&self) -> Vec<ToolSchema> {
        self.get_catalog().await.selector_schemas()
    }

    pub async fn entry(&self, worker: &str) -> Option<CatalogEntry> {
        self.get_catalog().await.entry(worker).cloned()
    }

    /// Drop the memo; the next `get_catalog` re-runs discovery.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
        tracing::info!("Catalog invalidated");
    }

    pub async fn is_populated(&self) -> bool {
        self.slot.read().await.is_some()
    }

    async fn discover(&self) -> Catalog {
        let started = Instant::now();
        let mut entries = Vec::with_capacity(self.workers.len());

        for worker in &self.workers {
            match self.client.list_tools(worker).await {
                Ok(tools) if !tools.is_empty() => {
                    tracing::info!(worker = %worker.name, tools = tools.len(), "Discovered worker tools");
                    self.publish(DomainEvent::CatalogDiscovered {
                        worker: worker.name.clone(),
                        tool_count: tools.len(),
                        timestamp: Utc::now(),
                    });
                    entries.push(CatalogEntry::new(worker.clone(), tools));
                }
                Ok(_) => self.skip(worker, "worker advertised no tools".into()),
                Err(e) => self.skip(worker, e.to_string()),
            }
        }

        tracing::info!(
            workers = entries.len(),
            configured = self.workers.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Catalog discovery finished"
        );
        Catalog::new(entries)
    }

    fn skip(&self, worker: &WorkerSpec, reason: String) {
        tracing::warn!(worker = %worker.name, reason = %reason, "Skipping worker with no tools");
        self.publish(DomainEvent::WorkerSkipped {
            worker: worker.name.clone(),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustedbridge_transport::session::SessionConfig;
    use rustedbridge_transport::testing::{ScriptedConnector, ScriptedWorker};
    use std::time::Duration;

    fn specs() -> Vec<WorkerSpec> {
        vec![
            WorkerSpec::new("Kadaster", "eai-kadaster-service", "Land registry"),
            WorkerSpec::new("CBS", "eai-cbs-service", "Statistics"),
            WorkerSpec::new("Rijkswaterstaat", "eai-rijkswaterstaat-service", "Infrastructure"),
        ]
    }

    fn connector() -> ScriptedConnector {
        ScriptedConnector::new()
            .with_worker(
                ScriptedWorker::new("Kadaster")
                    .with_tool("find_address", "Find an address")
                    .with_tool("get_property_info", "Property details"),
            )
            .with_worker(ScriptedWorker::new("CBS").not_ready("exited"))
            .with_worker(
                ScriptedWorker::new("Rijkswaterstaat")
                    .with_tool("get_water_levels", "Water levels")
                    .with_delay(Duration::from_millis(20)),
            )
    }

    fn cache(connector: Arc<ScriptedConnector>) -> CatalogCache {
        CatalogCache::new(
            WorkerClient::new(connector, SessionConfig::default()),
            specs(),
        )
    }

    #[tokio::test]
    async fn failed_worker_is_skipped_not_fatal() {
        let connector = Arc::new(connector());
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let cache = cache(connector.clone()).with_event_bus(bus);

        let catalog = cache.get_catalog().await;
        let names: Vec<_> = catalog.entries().iter().map(|e| e.worker.name.as_str()).collect();
        assert_eq!(names, vec!["Kadaster", "Rijkswaterstaat"]);
        assert!(catalog.entry("CBS").is_none());
        assert_eq!(
            catalog.entry("Kadaster").unwrap().operation_names(),
            vec!["find_address", "get_property_info"]
        );

        let mut skipped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::WorkerSkipped { worker, .. } = event.as_ref() {
                skipped.push(worker.clone());
            }
        }
        assert_eq!(skipped, vec!["CBS"]);
    }

    #[tokio::test]
    async fn empty_catalog_is_skipped() {
        let connector = Arc::new(ScriptedConnector::new().with_worker(ScriptedWorker::new("Kadaster")));
        let cache = CatalogCache::new(
            WorkerClient::new(connector, SessionConfig::default()),
            vec![WorkerSpec::new("Kadaster", "k", "")],
        );
        assert!(cache.get_catalog().await.is_empty());
    }

    #[tokio::test]
    async fn second_call_reuses_memo() {
        let connector = Arc::new(connector());
        let cache = cache(connector.clone());

        let first = cache.get_catalog().await;
        let second = cache.get_catalog().await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.requests("Kadaster", "tools/list"), 1);
        assert_eq!(cache.selector_schemas().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_discover_once() {
        let connector = Arc::new(connector());
        let cache = Arc::new(cache(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_catalog().await }));
        }
        let mut catalogs = Vec::new();
        for handle in handles {
            catalogs.push(handle.await.unwrap());
        }

        assert!(catalogs.iter().all(|c| Arc::ptr_eq(c, &catalogs[0])));
        assert_eq!(connector.requests("Kadaster", "tools/list"), 1);
        assert_eq!(connector.requests("Rijkswaterstaat", "tools/list"), 1);
        assert_eq!(connector.opens("Kadaster"), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rediscovery() {
        let connector = Arc::new(connector());
        let cache = cache(connector.clone());

        cache.get_catalog().await;
        assert!(cache.is_populated().await);
        cache.invalidate().await;
        assert!(!cache.is_populated().await);
        cache.get_catalog().await;

        assert_eq!(connector.requests("Kadaster", "tools/list"), 2);
    }

    #[tokio::test]
    async fn entry_returns_selector() {
        let cache = cache(Arc::new(connector()));
        let entry = cache.entry("Rijkswaterstaat").await.unwrap();
        assert_eq!(entry.selector.name, "Rijkswaterstaat");
        assert!(cache.entry("CBS").await.is_none());
    }
}
