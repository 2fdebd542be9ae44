use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::config::TableConfig;
use index::NGramIndex;
use storage::doc_store::DocumentStore;

/// The mutable half of a table: its index and document store, guarded
/// together so a dump reads a consistent pair.
#[derive(Debug)]
pub struct TableState {
    pub index: NGramIndex,
    pub docs: DocumentStore,
}

/// One mirrored table: configuration plus exclusively owned state.
///
/// The apply worker is the only writer; search handlers and the dump writer
/// take read views.
#[derive(Debug)]
pub struct TableContext {
    pub config: TableConfig,
    state: RwLock<TableState>,
    last_update_time: AtomicU64,
}

impl TableContext {
    pub fn new(config: TableConfig) -> Self {
        let index = NGramIndex::new(config.ngram_size, config.kanji_ngram_size);
        TableContext {
            config,
            state: RwLock::new(TableState {
                index,
                docs: DocumentStore::new(),
            }),
            last_update_time: AtomicU64::new(0),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().unwrap()
    }

    /// Replaces index and doc store wholesale, for DUMP LOAD.
    pub fn replace_state(&self, index: NGramIndex, docs: DocumentStore) {
        let mut state = self.state.write().unwrap();
        state.index = index;
        state.docs = docs;
    }

    pub fn touch(&self, epoch_seconds: u64) {
        self.last_update_time.store(epoch_seconds, Ordering::Relaxed);
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time.load(Ordering::Relaxed)
    }
}

/// Owner of every table context, plus the two coarse server states the dump
/// path toggles: read-only while a dump is written, loading while one is
/// restored.
#[derive(Debug)]
pub struct TableCatalog {
    tables: HashMap<String, Arc<TableContext>>,
    read_only: AtomicBool,
    loading: AtomicBool,
}

impl TableCatalog {
    pub fn from_configs(configs: &[TableConfig]) -> Self {
        let tables = configs
            .iter()
            .map(|config| (config.name.clone(), Arc::new(TableContext::new(config.clone()))))
            .collect();
        TableCatalog {
            tables,
            read_only: AtomicBool::new(false),
            loading: AtomicBool::new(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableContext>> {
        self.tables.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<TableContext>)> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::Release);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }
}
