use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use cxsync_core::{RemoteUuid, cx};
use cxsync_engine::{NetworkSummary, RemoteConnector, RemoteError, RemoteStore, RemoteTarget};

const CLOCK_START: i64 = 1_700_000_000_000;
const CLOCK_STEP: i64 = 1_000;

/// One request received by the fake store, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    Create,
    Update(RemoteUuid),
    Summary(RemoteUuid),
    Fetch(RemoteUuid),
}

struct StoredNetwork {
    payload: Vec<u8>,
    summary: NetworkSummary,
}

#[derive(Default)]
struct Failures {
    create: VecDeque<RemoteError>,
    update: VecDeque<RemoteError>,
    summary: VecDeque<RemoteError>,
    fetch: VecDeque<RemoteError>,
}

struct FakeState {
    networks: BTreeMap<RemoteUuid, StoredNetwork>,
    clock: i64,
    failures: Failures,
    calls: Vec<RemoteCall>,
}

impl FakeState {
    fn tick(&mut self) -> i64 {
        self.clock += CLOCK_STEP;
        self.clock
    }
}

/// In-memory remote store with scripted failures. Each scripted failure is
/// consumed by the next request of its kind.
pub struct FakeRemoteStore {
    state: Mutex<FakeState>,
}

impl Default for FakeRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                networks: BTreeMap::new(),
                clock: CLOCK_START,
                failures: Failures::default(),
                calls: Vec::new(),
            }),
        }
    }

    /// Stores a network owned by `owner` without logging a call.
    pub fn seed_network(&self, owner: &str, payload: &[u8]) -> RemoteUuid {
        let mut state = self.state.lock();
        let uuid = RemoteUuid::from_uuid(Uuid::new_v4());
        let modified_at = state.tick();
        state.networks.insert(
            uuid,
            StoredNetwork {
                payload: payload.to_vec(),
                summary: NetworkSummary {
                    uuid,
                    name: network_name(payload),
                    owner: owner.to_string(),
                    modified_at,
                    is_read_only: false,
                    can_write: false,
                },
            },
        );
        uuid
    }

    pub fn set_access(&self, uuid: RemoteUuid, is_read_only: bool, can_write: bool) {
        if let Some(network) = self.state.lock().networks.get_mut(&uuid) {
            network.summary.is_read_only = is_read_only;
            network.summary.can_write = can_write;
        }
    }

    /// Simulates another client changing the network. Returns the new
    /// modification time.
    pub fn touch(&self, uuid: RemoteUuid) -> Option<i64> {
        let mut state = self.state.lock();
        let modified_at = state.tick();
        let network = state.networks.get_mut(&uuid)?;
        network.summary.modified_at = modified_at;
        Some(modified_at)
    }

    pub fn remove(&self, uuid: RemoteUuid) {
        self.state.lock().networks.remove(&uuid);
    }

    pub fn fail_next_creates(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state.failures.create.extend(std::iter::repeat_n(error, count));
    }

    pub fn fail_next_updates(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state.failures.update.extend(std::iter::repeat_n(error, count));
    }

    pub fn fail_next_summaries(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state.failures.summary.extend(std::iter::repeat_n(error, count));
    }

    pub fn fail_next_fetches(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        state.failures.fetch.extend(std::iter::repeat_n(error, count));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|call| matches!(call, RemoteCall::Create))
    }

    pub fn update_calls(&self) -> usize {
        self.count(|call| matches!(call, RemoteCall::Update(_)))
    }

    pub fn summary(&self, uuid: RemoteUuid) -> Option<NetworkSummary> {
        self.state.lock().networks.get(&uuid).map(|n| n.summary.clone())
    }

    pub fn payload(&self, uuid: RemoteUuid) -> Option<Vec<u8>> {
        self.state.lock().networks.get(&uuid).map(|n| n.payload.clone())
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().networks.len()
    }

    fn count(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn create_as(&self, username: &str, payload: &[u8]) -> Result<RemoteUuid, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Create);
        if let Some(error) = state.failures.create.pop_front() {
            return Err(error);
        }
        drop(state);
        Ok(self.seed_network(username, payload))
    }

    fn update_as(&self, username: &str, uuid: RemoteUuid, payload: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Update(uuid));
        if let Some(error) = state.failures.update.pop_front() {
            return Err(error);
        }
        let modified_at = state.tick();
        let network = state.networks.get_mut(&uuid).ok_or(RemoteError::NotFound(uuid))?;
        let summary = &mut network.summary;
        if summary.is_read_only || (summary.owner != username && !summary.can_write) {
            return Err(RemoteError::PermissionDenied(format!("{username} cannot write {uuid}")));
        }
        summary.modified_at = modified_at;
        summary.name = network_name(payload);
        network.payload = payload.to_vec();
        Ok(())
    }

    fn summary_of(&self, uuid: RemoteUuid) -> Result<NetworkSummary, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Summary(uuid));
        if let Some(error) = state.failures.summary.pop_front() {
            return Err(error);
        }
        state
            .networks
            .get(&uuid)
            .map(|n| n.summary.clone())
            .ok_or(RemoteError::NotFound(uuid))
    }

    fn fetch(&self, uuid: RemoteUuid) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Fetch(uuid));
        if let Some(error) = state.failures.fetch.pop_front() {
            return Err(error);
        }
        state
            .networks
            .get(&uuid)
            .map(|n| n.payload.clone())
            .ok_or(RemoteError::NotFound(uuid))
    }
}

fn network_name(payload: &[u8]) -> String {
    cx::read_document(payload)
        .ok()
        .and_then(|doc| doc.network_name().map(String::from))
        .unwrap_or_default()
}

/// A [`FakeRemoteStore`] seen through one account.
struct FakeSession {
    store: Arc<FakeRemoteStore>,
    username: String,
}

impl RemoteStore for FakeSession {
    fn create_network(&self, payload: &[u8]) -> Result<RemoteUuid, RemoteError> {
        self.store.create_as(&self.username, payload)
    }

    fn update_network(&self, uuid: RemoteUuid, payload: &[u8]) -> Result<(), RemoteError> {
        self.store.update_as(&self.username, uuid, payload)
    }

    fn get_network_summary(&self, uuid: RemoteUuid) -> Result<NetworkSummary, RemoteError> {
        self.store.summary_of(uuid)
    }

    fn fetch_network(&self, uuid: RemoteUuid) -> Result<Vec<u8>, RemoteError> {
        self.store.fetch(uuid)
    }
}

pub struct FakeConnector {
    store: Arc<FakeRemoteStore>,
    refusal: Mutex<Option<RemoteError>>,
    connections: Mutex<Vec<RemoteTarget>>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeRemoteStore>) -> Self {
        Self {
            store,
            refusal: Mutex::new(None),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Makes every following `connect` fail with `error`.
    pub fn refuse(&self, error: RemoteError) {
        *self.refusal.lock() = Some(error);
    }

    pub fn accept(&self) {
        *self.refusal.lock() = None;
    }

    pub fn connections(&self) -> Vec<RemoteTarget> {
        self.connections.lock().clone()
    }
}

impl RemoteConnector for FakeConnector {
    fn connect(&self, target: &RemoteTarget) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        if let Some(error) = self.refusal.lock().clone() {
            return Err(error);
        }
        self.connections.lock().push(target.clone());
        Ok(Arc::new(FakeSession {
            store: Arc::clone(&self.store),
            username: target.username.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(store: &Arc<FakeRemoteStore>, username: &str) -> Arc<dyn RemoteStore> {
        FakeConnector::new(Arc::clone(store))
            .connect(&RemoteTarget::new("https://fake.example", username, "pw"))
            .unwrap()
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let store = Arc::new(FakeRemoteStore::new());
        let alice = session(&store, "alice");
        let uuid = alice.create_network(b"[]").unwrap();
        store.fail_next_updates(2, RemoteError::Transport("down".into()));

        assert!(alice.update_network(uuid, b"[]").is_err());
        assert!(alice.update_network(uuid, b"[]").is_err());
        assert!(alice.update_network(uuid, b"[]").is_ok());
        assert_eq!(store.update_calls(), 3);
    }

    #[test]
    fn writes_advance_the_modification_time() {
        let store = Arc::new(FakeRemoteStore::new());
        let alice = session(&store, "alice");
        let uuid = alice.create_network(b"[]").unwrap();
        let before = alice.get_network_summary(uuid).unwrap().modified_at;
        alice.update_network(uuid, b"[]").unwrap();
        assert!(alice.get_network_summary(uuid).unwrap().modified_at > before);
    }

    #[test]
    fn other_accounts_need_a_grant() {
        let store = Arc::new(FakeRemoteStore::new());
        let uuid = session(&store, "alice").create_network(b"[]").unwrap();
        let bob = session(&store, "bob");
        assert!(matches!(
            bob.update_network(uuid, b"[]"),
            Err(RemoteError::PermissionDenied(_))
        ));
        store.set_access(uuid, false, true);
        assert!(bob.update_network(uuid, b"[]").is_ok());
    }
}
