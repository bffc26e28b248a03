use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FallbackConfig;
use crate::errors::{FeeError, Result};

/// local, non-authoritative store; each collection is read and written whole
pub trait FallbackCache {
    fn load(&self, collection: &str) -> Result<Vec<Value>>;

    fn store(&mut self, collection: &str, entries: Vec<Value>) -> Result<()>;
}

/// process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FallbackCache for MemoryCache {
    fn load(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    fn store(&mut self, collection: &str, entries: Vec<Value>) -> Result<()> {
        self.collections.insert(collection.to_string(), entries);
        Ok(())
    }
}

/// one json file per collection under a directory
#[derive(Debug)]
pub struct JsonFileCache {
    directory: PathBuf,
}

impl JsonFileCache {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|err| cache_error(&directory, err))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.directory.join(format!("{collection}.json"))
    }
}

impl FallbackCache for JsonFileCache {
    fn load(&self, collection: &str) -> Result<Vec<Value>> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(|err| cache_error(&path, err))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn store(&mut self, collection: &str, entries: Vec<Value>) -> Result<()> {
        let path = self.path(collection);
        let staging = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&entries)?;
        fs::write(&staging, text).map_err(|err| cache_error(&staging, err))?;
        fs::rename(&staging, &path).map_err(|err| cache_error(&path, err))?;
        Ok(())
    }
}

/// cache selected by configuration
#[derive(Debug)]
pub enum LocalCache {
    Memory(MemoryCache),
    File(JsonFileCache),
}

impl LocalCache {
    pub fn from_config(config: &FallbackConfig) -> Result<Self> {
        match &config.directory {
            Some(directory) => Ok(LocalCache::File(JsonFileCache::open(directory)?)),
            None => Ok(LocalCache::Memory(MemoryCache::new())),
        }
    }
}

impl FallbackCache for LocalCache {
    fn load(&self, collection: &str) -> Result<Vec<Value>> {
        match self {
            LocalCache::Memory(cache) => cache.load(collection),
            LocalCache::File(cache) => cache.load(collection),
        }
    }

    fn store(&mut self, collection: &str, entries: Vec<Value>) -> Result<()> {
        match self {
            LocalCache::Memory(cache) => cache.store(collection, entries),
            LocalCache::File(cache) => cache.store(collection, entries),
        }
    }
}

fn cache_error(path: &Path, err: std::io::Error) -> FeeError {
    FeeError::Cache {
        message: format!("{}: {}", path.display(), err),
    }
}
