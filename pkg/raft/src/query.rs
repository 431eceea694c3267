use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::Node;

/// A decoded time-value pair's value. The core never interprets the payload
/// beyond carrying its type ordinal alongside the bytes, per
/// `fetchSingleSeries`'s wire contract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// The single leading type-ordinal byte `fetchSingleSeries` prefixes
    /// its response with.
    pub fn type_ordinal(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int32(_) => 1,
            Value::Int64(_) => 2,
            Value::Float(_) => 3,
            Value::Double(_) => 4,
            Value::Text(_) => 5,
        }
    }
}

/// A point reader bound to a single series, combining leader-synchronised
/// local data with an optional time filter. The core only ever calls
/// `next_batch`; the actual storage access lives behind the `StorageEngine`
/// collaborator that constructed it.
#[async_trait::async_trait]
pub trait SeriesReader: Send + Sync {
    async fn next_batch(&mut self, max: usize) -> Vec<(i64, Value)>;
}

/// Identifies a query context: the requesting node plus its query id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub requester: Node,
    pub query_id: i64,
}

struct QueryContext {
    readers: HashMap<u64, Box<dyn SeriesReader>>,
}

/// Maps `(requesterNode, queryId)` to a local context of registered reader
/// handles. Reader ids are allocated per-process monotonically.
pub struct QuerySessionRegistry {
    contexts: Mutex<HashMap<QueryKey, QueryContext>>,
    next_reader_id: AtomicU64,
}

impl QuerySessionRegistry {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            next_reader_id: AtomicU64::new(1),
        }
    }

    pub async fn get_or_create_context(&self, key: QueryKey) {
        let mut contexts = self.contexts.lock().await;
        contexts.entry(key).or_insert_with(|| QueryContext {
            readers: HashMap::new(),
        });
    }

    /// Allocates a reader-id and stores `reader` under `key`'s context,
    /// creating the context if it does not already exist.
    pub async fn register_reader(
        &self,
        key: QueryKey,
        reader: Box<dyn SeriesReader>,
    ) -> u64 {
        let id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let mut contexts = self.contexts.lock().await;
        contexts
            .entry(key)
            .or_insert_with(|| QueryContext {
                readers: HashMap::new(),
            })
            .readers
            .insert(id, reader);
        id
    }

    /// Pulls up to `max` (time, value) pairs from reader `id`. `None` means
    /// `ReaderNotFound`; `Some(vec![])` means the reader is simply exhausted.
    ///
    /// Readers are looked up by scanning every context: the reader-id space
    /// is global, not scoped per-context, mirroring the source's flat
    /// reader-manager.
    pub async fn fetch(&self, id: u64, max: usize) -> Option<Vec<(i64, Value)>> {
        let mut contexts = self.contexts.lock().await;
        for ctx in contexts.values_mut() {
            if let Some(reader) = ctx.readers.get_mut(&id) {
                return Some(reader.next_batch(max).await);
            }
        }
        None
    }

    /// Releases every reader registered under `key` and removes the
    /// context entirely.
    pub async fn end_query(&self, key: &QueryKey) {
        self.contexts.lock().await.remove(key);
    }
}

impl Default for QuerySessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedQuerySessionRegistry = Arc<QuerySessionRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReader(Vec<(i64, Value)>);

    #[async_trait::async_trait]
    impl SeriesReader for FixedReader {
        async fn next_batch(&mut self, max: usize) -> Vec<(i64, Value)> {
            let take = max.min(self.0.len());
            self.0.drain(..take).collect()
        }
    }

    #[tokio::test]
    async fn register_and_fetch_reader() {
        let registry = QuerySessionRegistry::new();
        let key = QueryKey {
            requester: Node::new("h", 1, 1),
            query_id: 7,
        };
        let reader = Box::new(FixedReader(vec![(1, Value::Int64(10))]));
        let id = registry.register_reader(key.clone(), reader).await;

        let batch = registry.fetch(id, 10).await.unwrap();
        assert_eq!(batch, vec![(1, Value::Int64(10))]);

        registry.end_query(&key).await;
        assert!(registry.fetch(id, 10).await.is_none());
    }

    #[tokio::test]
    async fn unknown_reader_returns_none() {
        let registry = QuerySessionRegistry::new();
        assert!(registry.fetch(999, 1).await.is_none());
    }
}
