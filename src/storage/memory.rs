use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Value};

use super::query::{document_id, group_key, reference_key, Aggregation, Document, Filter, Update};
use super::{Cache, ServerStatus, Store, StoreError, Transaction};

type Collections = HashMap<String, Vec<Document>>;

struct StoreInner {
    collections: RwLock<Collections>,
    available: AtomicBool,
    started: Instant,
}

impl StoreInner {
    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

/// In-process document store.
///
/// Collections are created on first insert and keep insertion order. Reads of
/// an unknown collection behave like reads of an empty one.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                collections: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                started: Instant::now(),
            }),
        }
    }

    /// Builds a store from `{ "<collection>": [ { "id": .. }, .. ], .. }`.
    pub fn from_json(fixture: Value) -> Result<Self, StoreError> {
        let store = Self::new();
        let collections = match fixture {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidFixture(
                    "top level must be an object of collections".to_string(),
                ))
            }
        };

        {
            let mut guard = store.inner.collections.write();
            for (name, rows) in collections {
                let rows = match rows {
                    Value::Array(rows) => rows,
                    _ => {
                        return Err(StoreError::InvalidFixture(format!(
                            "collection '{name}' must be an array"
                        )))
                    }
                };
                for row in rows {
                    let doc = match row {
                        Value::Object(doc) => doc,
                        _ => {
                            return Err(StoreError::InvalidFixture(format!(
                                "collection '{name}' contains a non-object row"
                            )))
                        }
                    };
                    insert_into(&mut guard, &name, doc)?;
                }
            }
        }

        Ok(store)
    }

    /// Simulates an outage: while unavailable every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_into(cols: &mut Collections, collection: &str, doc: Document) -> Result<(), StoreError> {
    let id = document_id(&doc).ok_or_else(|| StoreError::MissingId(collection.to_string()))?;
    let rows = cols.entry(collection.to_string()).or_default();
    if rows.iter().any(|row| document_id(row).as_deref() == Some(id.as_str())) {
        return Err(StoreError::DuplicateId {
            collection: collection.to_string(),
            id,
        });
    }
    rows.push(doc);
    Ok(())
}

fn update_in(cols: &mut Collections, collection: &str, filter: &Filter, updates: &[Update]) -> u64 {
    let mut modified = 0;
    if let Some(rows) = cols.get_mut(collection) {
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            let mut changed = false;
            for update in updates {
                changed |= update.apply(row);
            }
            if changed {
                modified += 1;
            }
        }
    }
    modified
}

fn delete_in(cols: &mut Collections, collection: &str, filter: &Filter) -> u64 {
    match cols.get_mut(collection) {
        Some(rows) => {
            let before = rows.len();
            rows.retain(|row| !filter.matches(row));
            (before - rows.len()) as u64
        }
        None => 0,
    }
}

fn aggregate_in(cols: &Collections, collection: &str, aggregation: &Aggregation) -> Vec<Document> {
    let rows = match cols.get(collection) {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    match aggregation {
        Aggregation::UnmatchedReferences {
            local_field,
            foreign_collection,
            foreign_field,
        } => {
            let known: HashSet<String> = cols
                .get(foreign_collection)
                .map(|foreign| {
                    foreign
                        .iter()
                        .filter_map(|doc| doc.get(foreign_field))
                        .filter_map(reference_key)
                        .collect()
                })
                .unwrap_or_default();

            rows.iter()
                .filter(|row| match row.get(local_field).and_then(reference_key) {
                    Some(reference) => !known.contains(&reference),
                    None => false,
                })
                .cloned()
                .collect()
        }
        Aggregation::GroupByKey {
            field,
            case_insensitive,
            min_count,
        } => {
            let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for row in rows {
                let key = match row.get(field).and_then(|v| group_key(v, *case_insensitive)) {
                    Some(key) => key,
                    None => continue,
                };
                if let Some(id) = document_id(row) {
                    groups.entry(key).or_default().push(id);
                }
            }

            groups
                .into_iter()
                .filter(|(_, ids)| ids.len() >= *min_count)
                .filter_map(|(key, ids)| {
                    json!({ "key": key, "count": ids.len(), "ids": ids })
                        .as_object()
                        .cloned()
                })
                .collect()
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ensure_available()
    }

    async fn server_status(&self) -> Result<ServerStatus, StoreError> {
        self.inner.ensure_available()?;
        Ok(ServerStatus {
            version: format!("memory-{}", env!("CARGO_PKG_VERSION")),
            uptime_secs: self.inner.started.elapsed().as_secs(),
            collections: self.inner.collections.read().len(),
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.ensure_available()?;
        let cols = self.inner.collections.read();
        let rows = match cols.get(collection) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };
        Ok(rows
            .iter()
            .filter(|row| filter.matches(row))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.ensure_available()?;
        let cols = self.inner.collections.read();
        Ok(cols
            .get(collection)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        self.inner.ensure_available()?;
        insert_into(&mut self.inner.collections.write(), collection, doc)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> Result<u64, StoreError> {
        self.inner.ensure_available()?;
        Ok(update_in(
            &mut self.inner.collections.write(),
            collection,
            filter,
            updates,
        ))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.ensure_available()?;
        Ok(delete_in(&mut self.inner.collections.write(), collection, filter))
    }

    async fn aggregate(
        &self,
        collection: &str,
        aggregation: &Aggregation,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.ensure_available()?;
        Ok(aggregate_in(
            &self.inner.collections.read(),
            collection,
            aggregation,
        ))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.inner.ensure_available()?;
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.inner),
            working: HashMap::new(),
            staged: Vec::new(),
        }))
    }
}

enum StagedWrite {
    Insert(String, Document),
    Update(String, Filter, Vec<Update>),
    Delete(String, Filter),
}

impl StagedWrite {
    fn collection(&self) -> &str {
        match self {
            StagedWrite::Insert(c, _) | StagedWrite::Update(c, _, _) | StagedWrite::Delete(c, _) => c,
        }
    }

    fn apply(&self, cols: &mut Collections) -> Result<u64, StoreError> {
        match self {
            StagedWrite::Insert(c, doc) => insert_into(cols, c, doc.clone()).map(|_| 1),
            StagedWrite::Update(c, filter, updates) => Ok(update_in(cols, c, filter, updates)),
            StagedWrite::Delete(c, filter) => Ok(delete_in(cols, c, filter)),
        }
    }
}

/// Writes are applied to private copies of the touched collections so counts
/// reflect earlier writes in the same transaction. Commit replays the staged
/// writes against the live data and swaps the results in under one lock.
struct MemoryTransaction {
    store: Arc<StoreInner>,
    working: Collections,
    staged: Vec<StagedWrite>,
}

impl MemoryTransaction {
    fn stage(&mut self, write: StagedWrite) -> Result<u64, StoreError> {
        self.store.ensure_available()?;
        let name = write.collection().to_string();
        if !self.working.contains_key(&name) {
            let snapshot = self
                .store
                .collections
                .read()
                .get(&name)
                .cloned()
                .unwrap_or_default();
            self.working.insert(name, snapshot);
        }
        let affected = write.apply(&mut self.working)?;
        self.staged.push(write);
        Ok(affected)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert(&mut self, collection: &str, doc: Document) -> Result<(), StoreError> {
        self.stage(StagedWrite::Insert(collection.to_string(), doc))
            .map(|_| ())
    }

    async fn update_many(
        &mut self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> Result<u64, StoreError> {
        self.stage(StagedWrite::Update(
            collection.to_string(),
            filter.clone(),
            updates.to_vec(),
        ))
    }

    async fn delete_many(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.stage(StagedWrite::Delete(collection.to_string(), filter.clone()))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.store.ensure_available()?;
        let mut live = self.store.collections.write();

        let mut touched: Collections = HashMap::new();
        for write in &self.staged {
            let name = write.collection();
            if !touched.contains_key(name) {
                touched.insert(name.to_string(), live.get(name).cloned().unwrap_or_default());
            }
        }
        for write in &self.staged {
            write.apply(&mut touched)?;
        }

        live.extend(touched);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        log::debug!("Rolled back {} staged writes", self.staged.len());
        Ok(())
    }
}

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-process cache with per-key TTLs. A zero TTL never expires.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    available: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Simulates an outage: while unavailable every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory cache offline".to_string()))
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates a `*`/`?` glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).map_err(|e| StoreError::InvalidPattern(e.to_string()))
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at.map(|t| t > now).unwrap_or(true) => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_available()?;
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - entries.len()) as u64)
    }
}
