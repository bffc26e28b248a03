use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, warn};

use crate::errors::{FeeError, Result};

use super::backend::RemoteResult;
use super::cache::FallbackCache;

/// record that can live in the fallback cache
pub trait CacheRecord: Serialize + DeserializeOwned + Clone {
    /// business key used for deduplication instead of a server-assigned id
    type Key: Eq + Hash + Clone + Debug;
    const COLLECTION: &'static str;

    fn natural_key(&self) -> Self::Key;
}

/// where a returned record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Remote,
    /// written locally while the backend was unreachable; not yet synced
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persisted<T> {
    pub record: T,
    pub origin: Origin,
}

impl<T> Persisted<T> {
    pub fn remote(record: T) -> Self {
        Self { record, origin: Origin::Remote }
    }

    pub fn fallback(record: T) -> Self {
        Self { record, origin: Origin::Fallback }
    }

    pub fn is_synced(&self) -> bool {
        self.origin == Origin::Remote
    }
}

/// per-operation decision on transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// write the record to the fallback cache under its natural key
    FallbackOnTransport,
    /// like `FallbackOnTransport` for append-only records: a key already pending in the
    /// fallback cache is rejected instead of replaced
    AppendOnTransport,
    /// surface the failure
    RemoteOnly,
}

impl WritePolicy {
    fn falls_back(self) -> bool {
        !matches!(self, WritePolicy::RemoteOnly)
    }
}

/// remote-first writes with a local fallback, and merged reads
pub struct DualSource<C> {
    cache: C,
    fallback_enabled: bool,
}

impl<C: FallbackCache> DualSource<C> {
    pub fn new(cache: C, fallback_enabled: bool) -> Self {
        Self {
            cache,
            fallback_enabled,
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// try the backend; on transport failure keep `record` locally when the policy allows
    ///
    /// Logical rejections are never routed to the cache.
    pub fn write<T, F>(
        &mut self,
        operation: &str,
        policy: WritePolicy,
        record: T,
        remote: F,
    ) -> Result<Persisted<T>>
    where
        T: CacheRecord,
        F: FnOnce(&T) -> RemoteResult<T>,
    {
        if policy == WritePolicy::AppendOnTransport {
            let key = record.natural_key();
            if self.find::<T>(&key)?.is_some() {
                return Err(FeeError::Rejected {
                    operation: operation.to_string(),
                    status: 409,
                    message: format!("{key:?} already recorded and awaiting sync"),
                });
            }
        }

        match remote(&record) {
            Ok(saved) => {
                self.evict::<T>(&saved.natural_key())?;
                Ok(Persisted::remote(saved))
            }
            Err(err) if err.is_transport() && self.fallback_enabled && policy.falls_back() => {
                warn!(
                    operation,
                    collection = T::COLLECTION,
                    key = ?record.natural_key(),
                    error = %err,
                    "backend unreachable, writing to fallback cache"
                );
                self.stash(record.clone())?;
                Ok(Persisted::fallback(record))
            }
            Err(err) => Err(FeeError::remote(operation, err)),
        }
    }

    /// remote entries first, then fallback-only entries; remote wins on key collisions
    ///
    /// A transport failure on the remote side degrades to an empty remote result.
    pub fn merge<T, P>(
        &self,
        operation: &str,
        remote: RemoteResult<Vec<T>>,
        belongs: P,
    ) -> Result<Vec<Persisted<T>>>
    where
        T: CacheRecord,
        P: Fn(&T) -> bool,
    {
        let remote = match remote {
            Ok(records) => records,
            Err(err) if err.is_transport() => {
                warn!(operation, error = %err, "remote read failed, serving fallback cache only");
                Vec::new()
            }
            Err(err) => return Err(FeeError::remote(operation, err)),
        };
        self.combine(operation, remote, belongs)
    }

    /// like `merge`, but any remote failure is returned instead of degrading
    pub fn merge_strict<T, P>(
        &self,
        operation: &str,
        remote: RemoteResult<Vec<T>>,
        belongs: P,
    ) -> Result<Vec<Persisted<T>>>
    where
        T: CacheRecord,
        P: Fn(&T) -> bool,
    {
        let remote = remote.map_err(|err| FeeError::remote(operation, err))?;
        self.combine(operation, remote, belongs)
    }

    fn combine<T, P>(&self, operation: &str, remote: Vec<T>, belongs: P) -> Result<Vec<Persisted<T>>>
    where
        T: CacheRecord,
        P: Fn(&T) -> bool,
    {
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len());
        for record in remote {
            if seen.insert(record.natural_key()) {
                merged.push(Persisted::remote(record));
            }
        }

        let local = self.load::<T>()?;
        let before = merged.len();
        for record in local.into_iter().filter(|r| belongs(r)) {
            if seen.insert(record.natural_key()) {
                merged.push(Persisted::fallback(record));
            }
        }
        debug!(
            operation,
            remote = before,
            fallback = merged.len() - before,
            "merged remote and fallback records"
        );
        Ok(merged)
    }

    pub fn find<T: CacheRecord>(&self, key: &T::Key) -> Result<Option<T>> {
        Ok(self.load::<T>()?.into_iter().find(|r| &r.natural_key() == key))
    }

    /// every fallback entry of a collection
    pub fn pending<T: CacheRecord>(&self) -> Result<Vec<T>> {
        self.load()
    }

    /// insert or replace by natural key
    pub fn stash<T: CacheRecord>(&mut self, record: T) -> Result<()> {
        let key = record.natural_key();
        let mut records = self.load::<T>()?;
        match records.iter_mut().find(|r| r.natural_key() == key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(records)
    }

    pub fn evict<T: CacheRecord>(&mut self, key: &T::Key) -> Result<bool> {
        let mut records = self.load::<T>()?;
        let before = records.len();
        records.retain(|r| &r.natural_key() != key);
        if records.len() == before {
            return Ok(false);
        }
        self.save(records)?;
        Ok(true)
    }

    fn load<T: CacheRecord>(&self) -> Result<Vec<T>> {
        self.cache
            .load(T::COLLECTION)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(FeeError::from))
            .collect()
    }

    fn save<T: CacheRecord>(&mut self, records: Vec<T>) -> Result<()> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.cache.store(T::COLLECTION, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCache, RemoteError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Seat {
        batch: u32,
        student: u32,
        note: String,
    }

    impl CacheRecord for Seat {
        type Key = (u32, u32);
        const COLLECTION: &'static str = "seats";

        fn natural_key(&self) -> Self::Key {
            (self.batch, self.student)
        }
    }

    fn seat(batch: u32, student: u32, note: &str) -> Seat {
        Seat { batch, student, note: note.to_string() }
    }

    fn offline<T>() -> RemoteResult<T> {
        Err(RemoteError::Timeout { millis: 1_000 })
    }

    #[test]
    fn test_transport_failure_falls_back() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        let saved = store
            .write("enroll", WritePolicy::FallbackOnTransport, seat(1, 7, "local"), |_| offline())
            .unwrap();

        assert_eq!(saved.origin, Origin::Fallback);
        assert_eq!(store.pending::<Seat>().unwrap(), vec![seat(1, 7, "local")]);
    }

    #[test]
    fn test_rejection_is_not_cached() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        let err = store
            .write("enroll", WritePolicy::FallbackOnTransport, seat(1, 7, "x"), |_| {
                Err(RemoteError::conflict("duplicate"))
            })
            .unwrap_err();

        assert!(matches!(err, FeeError::Rejected { status: 409, .. }));
        assert!(store.pending::<Seat>().unwrap().is_empty());
    }

    #[test]
    fn test_remote_only_policy_and_disabled_fallback_surface_transport() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        let err = store
            .write("refund", WritePolicy::RemoteOnly, seat(1, 1, "x"), |_| offline())
            .unwrap_err();
        assert!(err.is_transport());

        let mut disabled = DualSource::new(MemoryCache::new(), false);
        let err = disabled
            .write("enroll", WritePolicy::FallbackOnTransport, seat(1, 1, "x"), |_| offline())
            .unwrap_err();
        assert!(err.is_transport());
        assert!(disabled.pending::<Seat>().unwrap().is_empty());
    }

    #[test]
    fn test_remote_success_evicts_stale_fallback() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store.stash(seat(2, 3, "old")).unwrap();

        let saved = store
            .write("enroll", WritePolicy::FallbackOnTransport, seat(2, 3, "new"), |s| Ok(s.clone()))
            .unwrap();
        assert!(saved.is_synced());
        assert!(store.find::<Seat>(&(2, 3)).unwrap().is_none());
    }

    #[test]
    fn test_merge_prefers_remote_and_keeps_fallback_only() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store.stash(seat(1, 1, "local copy")).unwrap();
        store.stash(seat(1, 2, "only local")).unwrap();
        store.stash(seat(9, 9, "other batch")).unwrap();

        let merged = store
            .merge("list", Ok(vec![seat(1, 1, "remote copy")]), |s: &Seat| s.batch == 1)
            .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], Persisted::remote(seat(1, 1, "remote copy")));
        assert_eq!(merged[1], Persisted::fallback(seat(1, 2, "only local")));
    }

    #[test]
    fn test_merge_degrades_on_transport_but_not_on_rejection() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store.stash(seat(1, 1, "local")).unwrap();

        let merged = store.merge::<Seat, _>("list", offline(), |_| true).unwrap();
        assert_eq!(merged, vec![Persisted::fallback(seat(1, 1, "local"))]);

        let rejected = store.merge::<Seat, _>(
            "list",
            Err(RemoteError::Rejected { status: 401, message: "expired".to_string() }),
            |_| true,
        );
        assert!(rejected.is_err());
    }

    #[test]
    fn test_append_policy_never_replaces_pending_entry() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store
            .write("record payment", WritePolicy::AppendOnTransport, seat(5, 1, "first"), |_| offline())
            .unwrap();

        let err = store
            .write("record payment", WritePolicy::AppendOnTransport, seat(5, 1, "second"), |_| offline())
            .unwrap_err();
        assert!(matches!(err, FeeError::Rejected { status: 409, .. }));

        // a reachable backend does not get to evict the pending entry either
        let err = store
            .write("record payment", WritePolicy::AppendOnTransport, seat(5, 1, "third"), |s| Ok(s.clone()))
            .unwrap_err();
        assert!(!err.is_transport());
        assert_eq!(store.pending::<Seat>().unwrap(), vec![seat(5, 1, "first")]);
    }

    #[test]
    fn test_strict_merge_surfaces_transport() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store.stash(seat(1, 1, "local")).unwrap();

        let err = store.merge_strict::<Seat, _>("list", offline(), |_| true).unwrap_err();
        assert!(err.is_transport());

        let merged = store.merge_strict("list", Ok(vec![seat(1, 2, "remote")]), |_: &Seat| true).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_stash_is_idempotent_on_key() {
        let mut store = DualSource::new(MemoryCache::new(), true);
        store.stash(seat(4, 4, "a")).unwrap();
        store.stash(seat(4, 4, "b")).unwrap();
        assert_eq!(store.pending::<Seat>().unwrap(), vec![seat(4, 4, "b")]);
        assert!(store.evict::<Seat>(&(4, 4)).unwrap());
        assert!(!store.evict::<Seat>(&(4, 4)).unwrap());
    }
}
