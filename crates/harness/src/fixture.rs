use std::sync::Arc;
use std::time::Duration;

use cxsync_core::{
    AspectRead, ColumnType, ElementHandle, ElementKind, FieldValue, RemoteNetworkRecord, columns,
};
use cxsync_engine::{
    DedicatedThreadEngine, NetworkService, RemoteTarget, RetryPolicy, SaveParams, StaticTarget,
    SyncBridge, SyncConfig, shared_document,
};
use cxsync_storage::{AttributeStore, GraphDocument, SqliteDocument, StorageError, TableRef};

use crate::init_test_logging;
use crate::remote::{FakeConnector, FakeRemoteStore};

pub const SERVER_URL: &str = "https://fake.example.org/v2";
pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";

/// A service over an in-memory document and a fake remote store, with the
/// default attempt bound and no delay between attempts.
pub struct TestContext {
    pub service: NetworkService<SqliteDocument>,
    pub remote: Arc<FakeRemoteStore>,
    pub connector: Arc<FakeConnector>,
    pub targets: Arc<StaticTarget>,
    pub engine: Arc<DedicatedThreadEngine>,
}

impl TestContext {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = SyncConfig::default();
        config.retry = RetryPolicy::new(config.retry.max_attempts, Duration::ZERO);
        Self::with_config(config)
    }

    pub fn with_config(config: SyncConfig) -> Result<Self, Box<dyn std::error::Error>> {
        init_test_logging();
        let document = shared_document(SqliteDocument::open_in_memory()?);
        Self::with_document(document, config)
    }

    pub fn with_document(
        document: cxsync_engine::SharedDocument<SqliteDocument>,
        config: SyncConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let engine = Arc::new(DedicatedThreadEngine::spawn("cxsync-test-engine")?);
        let remote = Arc::new(FakeRemoteStore::new());
        let connector = Arc::new(FakeConnector::new(Arc::clone(&remote)));
        let targets = Arc::new(StaticTarget::new(Some(Self::target())));
        let service = NetworkService::new(
            document,
            SyncBridge::for_engine(Arc::clone(&engine)),
            connector.clone(),
            targets.clone(),
            config,
        );
        Ok(Self {
            service,
            remote,
            connector,
            targets,
            engine,
        })
    }

    pub fn target() -> RemoteTarget {
        RemoteTarget::new(SERVER_URL, USERNAME, PASSWORD)
    }

    pub fn save_params(&self) -> SaveParams {
        SaveParams::new(Self::target())
    }

    /// Runs `f` with the document locked.
    pub fn with_doc<R>(&self, f: impl FnOnce(&mut SqliteDocument) -> R) -> R {
        let mut doc = self.service.document().lock();
        f(&mut doc)
    }

    /// A network of three named nodes on a path `a - b - c`.
    pub fn create_sample_network(&self, name: &str) -> Result<ElementHandle, StorageError> {
        self.with_doc(|doc| {
            let network = doc.create_network(None, name)?;
            let nodes = TableRef::elements(network, ElementKind::Node);
            let edges = TableRef::elements(network, ElementKind::Edge);
            doc.get_or_create_column(nodes, columns::NODE_NAME, ColumnType::Text)?;
            doc.get_or_create_column(edges, columns::EDGE_INTERACTION, ColumnType::Text)?;

            let mut handles = Vec::new();
            for label in ["a", "b", "c"] {
                let node = doc.add_node(network)?;
                doc.set(nodes, node, columns::NODE_NAME, FieldValue::Text(label.into()))?;
                handles.push(node);
            }
            for pair in handles.windows(2) {
                let edge = doc.add_edge(network, pair[0], pair[1])?;
                doc.set(edges, edge, columns::EDGE_INTERACTION, FieldValue::Text("links".into()))?;
            }
            Ok(network)
        })
    }

    pub fn remote_record(
        &self,
        network: ElementHandle,
    ) -> Result<AspectRead<RemoteNetworkRecord>, StorageError> {
        let cache = self.service.cache();
        self.with_doc(|doc| cache.remote_record(&*doc, network))
    }

    pub fn set_remote_record(
        &self,
        network: ElementHandle,
        record: &RemoteNetworkRecord,
    ) -> Result<(), StorageError> {
        let cache = self.service.cache();
        self.with_doc(|doc| cache.set_remote_record(doc, network, record))
    }
}
