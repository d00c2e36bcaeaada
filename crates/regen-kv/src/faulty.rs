//! Fault-injecting wrapper for exercising degraded-store behaviour.

use async_trait::async_trait;
use regen_core::{Error, KeyValueStore, Result, StorePath, Timestamp};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Path reads of the store clock are checked against.
const SERVER_TIME: &str = ".info/serverTime";

/// Wraps a store and fails reads or writes on demand.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_prefix: std::sync::RwLock<Option<String>>,
}

impl<S: KeyValueStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_prefix: std::sync::RwLock::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Restrict injected failures to paths starting with `prefix`.
    pub fn only_under(&self, prefix: Option<&str>) {
        if let Ok(mut guard) = self.fail_prefix.write() {
            *guard = prefix.map(str::to_string);
        }
    }

    fn check(&self, flag: &AtomicBool, path: &StorePath, op: &str) -> Result<()> {
        if !flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        let scoped = self
            .fail_prefix
            .read()
            .ok()
            .and_then(|prefix| prefix.clone())
            .is_none_or(|prefix| path.to_string().starts_with(&prefix));
        if scoped {
            debug!(%path, op, "Injected store failure");
            return Err(Error::StoreUnavailable(format!("injected {} failure at {}", op, path)));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FaultyStore<S> {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        self.check(&self.fail_reads, path, "get")?;
        self.inner.get(path).await
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.check(&self.fail_writes, path, "update")?;
        self.inner.update(path, fields).await
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        self.check(&self.fail_writes, path, "set")?;
        self.inner.set(path, value).await
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.check(&self.fail_writes, path, "remove")?;
        self.inner.remove(path).await
    }

    async fn fetch_max(&self, path: &StorePath, candidate: i64) -> Result<i64> {
        self.check(&self.fail_writes, path, "fetch_max")?;
        self.inner.fetch_max(path, candidate).await
    }

    async fn now(&self) -> Result<Timestamp> {
        self.check(&self.fail_reads, &StorePath::root(SERVER_TIME), "now")?;
        self.inner.now().await
    }
}
