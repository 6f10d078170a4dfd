//! In-process backend for local runs and tests.

use crate::search::backend::{
    IndexBatchResult, ScoredResult, SearchBackend, SearchPage, SearchRequest,
};
use crate::search::document::{fields, ActionKind, PendingAction};
use crate::search::error::{SearchError, SearchResult};
use crate::search::schema::{IndexSchema, SynonymMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

static TYPE_EQ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Type eq '((?:[^']|'')*)'").expect("valid regex"));
static INDEXED_GE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"IndexedDate ge (\S+)").expect("valid regex"));
static INDEXED_LT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"IndexedDate lt (\S+)").expect("valid regex"));

/// Backend operation, used to record calls and to script failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CallKind {
    CreateOrUpdateIndex,
    DeleteIndex,
    GetIndex,
    CreateOrUpdateSynonymMap,
    IndexDocuments,
    Query,
}

/// A call as the backend saw it
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateOrUpdateIndex(String),
    DeleteIndex(String),
    GetIndex(String),
    CreateOrUpdateSynonymMap(String),
    IndexDocuments {
        index: String,
        actions: Vec<(ActionKind, String)>,
    },
    Query {
        index: String,
        request: SearchRequest,
    },
}

impl BackendCall {
    pub fn kind(&self) -> CallKind {
        match self {
            BackendCall::CreateOrUpdateIndex(_) => CallKind::CreateOrUpdateIndex,
            BackendCall::DeleteIndex(_) => CallKind::DeleteIndex,
            BackendCall::GetIndex(_) => CallKind::GetIndex,
            BackendCall::CreateOrUpdateSynonymMap(_) => CallKind::CreateOrUpdateSynonymMap,
            BackendCall::IndexDocuments { .. } => CallKind::IndexDocuments,
            BackendCall::Query { .. } => CallKind::Query,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    indexes: HashMap<String, IndexSchema>,
    synonym_maps: HashMap<String, SynonymMap>,
    documents: HashMap<String, BTreeMap<String, Value>>,
    calls: Vec<BackendCall>,
    /// Failure, its call kind and how many calls of that kind still pass first
    scripted: VecDeque<(CallKind, u32, SearchError)>,
    latency: Option<Duration>,
}

/// Stores documents by key per index and evaluates filters loosely: `Type`
/// equality and `IndexedDate` comparisons are honoured, anything else in a
/// filter is ignored.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that already holds an empty index called `name`
    pub fn with_index(name: &str) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            state.indexes.insert(
                name.to_string(),
                crate::search::schema::unified_index_schema(name),
            );
            state.documents.insert(name.to_string(), BTreeMap::new());
        }
        backend
    }

    /// Make the next call of `kind` fail with `error`. Scripted failures are
    /// consumed in the order they were added.
    pub fn fail_next(&self, kind: CallKind, error: SearchError) {
        self.fail_after(kind, 0, error);
    }

    /// Let `calls` more calls of `kind` succeed, then fail the next one
    /// with `error`
    pub fn fail_after(&self, kind: CallKind, calls: u32, error: SearchError) {
        self.state.lock().scripted.push_back((kind, calls, error));
    }

    /// Delay every document and query call
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_kinds(&self) -> Vec<CallKind> {
        self.state.lock().calls.iter().map(BackendCall::kind).collect()
    }

    pub fn count_calls(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Actions of every batch call, in call order
    pub fn batches(&self) -> Vec<Vec<(ActionKind, String)>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::IndexDocuments { actions, .. } => Some(actions.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().indexes.contains_key(name)
    }

    pub fn has_synonym_map(&self, name: &str) -> bool {
        self.state.lock().synonym_maps.contains_key(name)
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .documents
            .get(index)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn document(&self, index: &str, key: &str) -> Option<Value> {
        self.state.lock().documents.get(index)?.get(key).cloned()
    }

    /// Put a document straight into storage without recording a call
    pub fn insert_raw(&self, index: &str, key: &str, document: Value) {
        self.state
            .lock()
            .documents
            .entry(index.to_string())
            .or_default()
            .insert(key.to_string(), document);
    }

    /// Record the call and return the scripted failure for it, if any
    fn begin(&self, call: BackendCall) -> SearchResult<Option<Duration>> {
        let mut state = self.state.lock();
        let kind = call.kind();
        state.calls.push(call);
        if let Some(pos) = state.scripted.iter().position(|(k, _, _)| *k == kind) {
            if let Some((_, remaining, _)) = state.scripted.get_mut(pos) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(state.latency);
                }
            }
            if let Some((_, _, err)) = state.scripted.remove(pos) {
                return Err(err);
            }
        }
        Ok(state.latency)
    }

    async fn pause(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn missing_index(operation: &str, name: &str) -> SearchError {
    SearchError::from_status(operation, 404, format!("index '{}' not found", name))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim_end_matches(')');
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn indexed_date(document: &Value) -> Option<DateTime<Utc>> {
    document
        .get(fields::INDEXED_DATE)
        .and_then(Value::as_str)
        .and_then(parse_date)
}

fn matches_filter(document: &Value, filter: &str) -> bool {
    if let Some(caps) = TYPE_EQ.captures(filter) {
        let wanted = caps[1].replace("''", "'");
        if document.get(fields::TYPE).and_then(Value::as_str) != Some(wanted.as_str()) {
            return false;
        }
    }

    let indexed = indexed_date(document);

    if let Some(cutoff) = INDEXED_GE.captures(filter).and_then(|c| parse_date(&c[1])) {
        if !matches!(indexed, Some(at) if at >= cutoff) {
            return false;
        }
    }

    if let Some(cutoff) = INDEXED_LT.captures(filter).and_then(|c| parse_date(&c[1])) {
        let null_allowed = filter.contains("IndexedDate eq null");
        let keep = match indexed {
            Some(at) => at < cutoff,
            None => null_allowed,
        };
        if !keep {
            return false;
        }
    }

    true
}

fn matches_text(document: &Value, text: &str) -> bool {
    let needle = text.to_lowercase();
    let contains = |value: &Value| match value {
        Value::String(s) => s.to_lowercase().contains(&needle),
        _ => false,
    };
    match document {
        Value::Object(map) => map.values().any(|value| match value {
            Value::Array(items) => items.iter().any(contains),
            other => contains(other),
        }),
        _ => false,
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn create_or_update_index(&self, schema: &IndexSchema) -> SearchResult<()> {
        self.begin(BackendCall::CreateOrUpdateIndex(schema.name.clone()))?;
        let mut state = self.state.lock();
        state.indexes.insert(schema.name.clone(), schema.clone());
        state.documents.entry(schema.name.clone()).or_default();
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> SearchResult<()> {
        self.begin(BackendCall::DeleteIndex(name.to_string()))?;
        let mut state = self.state.lock();
        if state.indexes.remove(name).is_none() {
            return Err(missing_index("delete index", name));
        }
        state.documents.remove(name);
        Ok(())
    }

    async fn get_index(&self, name: &str) -> SearchResult<IndexSchema> {
        self.begin(BackendCall::GetIndex(name.to_string()))?;
        self.state
            .lock()
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| missing_index("get index", name))
    }

    async fn create_or_update_synonym_map(&self, map: &SynonymMap) -> SearchResult<()> {
        self.begin(BackendCall::CreateOrUpdateSynonymMap(map.name.clone()))?;
        self.state
            .lock()
            .synonym_maps
            .insert(map.name.clone(), map.clone());
        Ok(())
    }

    async fn index_documents(
        &self,
        index: &str,
        batch: &[PendingAction],
    ) -> SearchResult<IndexBatchResult> {
        let latency = self.begin(BackendCall::IndexDocuments {
            index: index.to_string(),
            actions: batch
                .iter()
                .map(|a| (a.kind, a.document.key.clone()))
                .collect(),
        })?;
        Self::pause(latency).await;

        let encoded = batch
            .iter()
            .map(|action| Ok((action.kind, serde_json::to_value(&action.document)?)))
            .collect::<SearchResult<Vec<_>>>()?;

        let mut state = self.state.lock();
        if !state.indexes.contains_key(index) {
            return Err(missing_index("index documents", index));
        }
        let documents = state.documents.entry(index.to_string()).or_default();
        for ((kind, value), action) in encoded.into_iter().zip(batch) {
            let key = action.document.key.clone();
            match kind {
                ActionKind::Delete => {
                    documents.remove(&key);
                }
                ActionKind::Upload | ActionKind::MergeOrUpload => {
                    documents.insert(key, value);
                }
                ActionKind::Merge => {
                    if let Some(Value::Object(existing)) = documents.get_mut(&key) {
                        if let Value::Object(update) = value {
                            existing.extend(update);
                        }
                    }
                }
            }
        }

        Ok(IndexBatchResult::all_succeeded(batch))
    }

    async fn query(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchPage> {
        let latency = self.begin(BackendCall::Query {
            index: index.to_string(),
            request: request.clone(),
        })?;
        Self::pause(latency).await;

        let state = self.state.lock();
        let documents = state
            .documents
            .get(index)
            .filter(|_| state.indexes.contains_key(index))
            .ok_or_else(|| missing_index("query", index))?;

        let text = request
            .search_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "*");

        let hits: Vec<&Value> = documents
            .values()
            .filter(|doc| {
                request
                    .options
                    .filter
                    .as_deref()
                    .map_or(true, |f| matches_filter(doc, f))
            })
            .filter(|doc| text.map_or(true, |t| matches_text(doc, t)))
            .collect();

        let total = hits.len() as u64;
        let skip = request.options.skip.unwrap_or(0);
        let top = request.options.size.unwrap_or(50);
        let results = hits
            .into_iter()
            .skip(skip)
            .take(top)
            .map(|doc| ScoredResult {
                document: doc.clone(),
                score: 1.0,
            })
            .collect();

        Ok(SearchPage {
            results,
            total_count: request.options.include_total_count.unwrap_or(false).then_some(total),
        })
    }
}
