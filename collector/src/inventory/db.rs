use rocksdb::{DB, IteratorMode, Options, ReadOptions};
use serde::{Serialize, de::DeserializeOwned};
use std::{path::Path, sync::Arc};

const MAX_OPEN_FILES: i32 = 64;

/// Persistent host cache. Values are serde_json documents keyed by host,
/// so records survive collector restarts and schema additions stay cheap.
#[derive(Clone)]
pub struct CacheDb {
    inner: Arc<DB>,
}

impl CacheDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(MAX_OPEN_FILES);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            inner: Arc::new(db),
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let v = self.inner.get(key.as_bytes())?;
        if let Some(raw) = v {
            let t = serde_json::from_slice::<T>(&raw)?;
            Ok(Some(t))
        } else {
            Ok(None)
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let buf = serde_json::to_vec(value)?;
        self.inner.put(key.as_bytes(), buf)?;
        Ok(())
    }

    pub fn iter(&self) -> rocksdb::DBIterator<'_> {
        let readopts = ReadOptions::default();
        self.inner.iterator_opt(IteratorMode::Start, readopts)
    }
}
