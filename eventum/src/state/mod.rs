//! Three state scopes (§3 "State"): `Local` (per template alias), `Shared` (per run, all
//! templates), and `Composed` (cross-process, see below).
//!
//! `Local` and `Shared` share the same `get`/`set`/`get_for_update`/`cancel_update` shape so the
//! renderer can expose them to templates uniformly. Guarded with `std::sync::Mutex` rather than
//! an async mutex: per §5, these ops never block beyond a process-local lock, so there is never
//! an await point held across the guard -- which also lets the renderer's Tera functions
//! (synchronous by contract) call straight through without a runtime handle.

use crate::Error;
use fs4::fs_std::FileExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// A single process-local key/value map guarded by a mutex.
///
/// Used directly for `Local` (one instance per template alias) and `Shared` (one instance per
/// run). `get_for_update` holds the lock across the caller's read-modify-write window; the
/// caller must follow up with [`StateMap::commit_update`] or [`StateMap::cancel_update`] to
/// release it.
#[derive(Default)]
pub struct StateMap {
    inner: Mutex<HashMap<String, Value>>,
}

impl StateMap {
    /// Builds an empty map.
    pub fn new() -> Self {
        StateMap::default()
    }

    /// Reads `key`, or `Value::Null` if absent.
    pub fn get(&self, key: &str) -> Value {
        self.inner
            .lock()
            .expect("state map lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Writes `value` under `key`.
    pub fn set(&self, key: &str, value: Value) {
        self.inner
            .lock()
            .expect("state map lock poisoned")
            .insert(key.to_string(), value);
    }

    /// Acquires the lock and returns the current value under `key`, holding the lock until the
    /// guard is consumed by [`StateMap::commit_update`]/[`StateMap::cancel_update`].
    pub fn get_for_update(&self, key: &str) -> (MutexGuard<'_, HashMap<String, Value>>, Value) {
        let guard = self.inner.lock().expect("state map lock poisoned");
        let current = guard.get(key).cloned().unwrap_or(Value::Null);
        (guard, current)
    }

    /// Writes `value` under `key` using a guard obtained from
    /// [`StateMap::get_for_update`], releasing the lock.
    pub fn commit_update(&self, mut guard: MutexGuard<'_, HashMap<String, Value>>, key: &str, value: Value) {
        guard.insert(key.to_string(), value);
    }

    /// Releases a guard obtained from [`StateMap::get_for_update`] without writing anything.
    pub fn cancel_update(&self, _guard: MutexGuard<'_, HashMap<String, Value>>) {}

    /// Snapshots the whole map, for condition evaluation against `shared`.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().expect("state map lock poisoned").clone()
    }
}

/// Length, in bytes, of the big-endian size header prefixing the encoded map on disk (§6).
const HEADER_SIZE: usize = 8;

/// Composed state: the one scope visible across independently launched processes, not just
/// threads within one (§3, §5). §9 names a named mutex plus a memory-mapped file as the
/// canonical cross-process primitive; this crate forbids `unsafe` (`unsafe_code = "forbid"`),
/// and every safe way to read or write a `mmap`'d region still requires an `unsafe` block at the
/// call site, so the mapped segment is replaced here with a plain file on disk and the named
/// mutex with an OS advisory lock taken on that same file (`fs4`). Any number of processes
/// pointed at the same path see each other's writes. The file's layout matches what a true
/// shared-memory segment would carry: an 8-byte big-endian length header followed by the
/// `rmp_serde`-encoded map (§6).
pub struct ComposedState {
    path: PathBuf,
    max_bytes: usize,
}

/// Holds the composed state file locked exclusively across a `get_for_update`-then-`commit_update`
/// (or `cancel_update`) window, along with the map as of the lock being taken.
pub struct ComposedGuard {
    file: File,
    map: HashMap<String, Value>,
}

impl ComposedState {
    /// Opens the composed state file at `path`, creating and seeding it with an empty map if it
    /// doesn't already hold one, capped at `max_bytes` of encoded payload.
    pub fn new(path: impl Into<PathBuf>, max_bytes: usize) -> Result<Self, Error> {
        let state = ComposedState {
            path: path.into(),
            max_bytes,
        };
        let mut file = state.open_locked(true)?;
        let len = file
            .metadata()
            .map_err(|e| Error::ComposedState(format!("failed to stat composed state file: {e}")))?
            .len();
        if len == 0 {
            state.write_locked(&mut file, &HashMap::new())?;
        }
        Ok(state)
    }

    fn open_locked(&self, exclusive: bool) -> Result<File, Error> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                Error::ComposedState(format!(
                    "failed to open composed state file {}: {e}",
                    self.path.display()
                ))
            })?;
        let locked = if exclusive { file.lock_exclusive() } else { file.lock_shared() };
        locked.map_err(|e| Error::ComposedState(format!("failed to lock composed state file: {e}")))?;
        Ok(file)
    }

    fn read_locked(file: &mut File) -> Result<HashMap<String, Value>, Error> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::ComposedState(format!("failed to seek composed state file: {e}")))?;
        let mut header = [0u8; HEADER_SIZE];
        if file.read_exact(&mut header).is_err() {
            return Ok(HashMap::new());
        }
        let len = u64::from_be_bytes(header) as usize;
        if len == 0 {
            return Ok(HashMap::new());
        }
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|e| Error::ComposedState(format!("failed to read composed state: {e}")))?;
        rmp_serde::from_slice(&payload)
            .map_err(|e| Error::ComposedState(format!("failed to decode composed state: {e}")))
    }

    /// Encodes `map` as an 8-byte big-endian length header plus its `rmp_serde` payload and
    /// writes it to `file`, rejecting the write if it would exceed `max_bytes` (write fails
    /// rather than truncates, per §3).
    fn write_locked(&self, file: &mut File, map: &HashMap<String, Value>) -> Result<(), Error> {
        let payload = rmp_serde::to_vec(map)
            .map_err(|e| Error::ComposedState(format!("failed to encode composed state: {e}")))?;
        let total = HEADER_SIZE + payload.len();
        if total > self.max_bytes {
            return Err(Error::ComposedState(format!(
                "composed state write would exceed max_bytes ({total} > {})",
                self.max_bytes
            )));
        }
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::ComposedState(format!("failed to seek composed state file: {e}")))?;
        file.set_len(0)
            .map_err(|e| Error::ComposedState(format!("failed to truncate composed state file: {e}")))?;
        file.write_all(&(payload.len() as u64).to_be_bytes())
            .and_then(|()| file.write_all(&payload))
            .and_then(|()| file.flush())
            .map_err(|e| Error::ComposedState(format!("failed to write composed state file: {e}")))
    }

    /// Reads `key` under a shared lock, or `Value::Null` if absent or the file can't be read.
    pub fn get(&self, key: &str) -> Value {
        match self.open_locked(false).and_then(|mut f| Self::read_locked(&mut f)) {
            Ok(map) => map.get(key).cloned().unwrap_or(Value::Null),
            Err(e) => {
                warn!(error = %e, "composed state read failed");
                Value::Null
            }
        }
    }

    /// Writes `value` under `key` under an exclusive lock spanning the read-modify-write.
    pub fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut file = self.open_locked(true)?;
        let mut map = Self::read_locked(&mut file)?;
        map.insert(key.to_string(), value);
        self.write_locked(&mut file, &map)
    }

    /// Acquires an exclusive lock across the whole read-then-write window and returns the
    /// current value under `key`; the lock is released once the returned guard is consumed by
    /// [`ComposedState::commit_update`] or [`ComposedState::cancel_update`].
    pub fn get_for_update(&self, key: &str) -> Result<(ComposedGuard, Value), Error> {
        let mut file = self.open_locked(true)?;
        let map = Self::read_locked(&mut file)?;
        let current = map.get(key).cloned().unwrap_or(Value::Null);
        Ok((ComposedGuard { file, map }, current))
    }

    /// Writes `value` under `key` using a guard obtained from
    /// [`ComposedState::get_for_update`], enforcing `max_bytes`.
    pub fn commit_update(&self, mut guard: ComposedGuard, key: &str, value: Value) -> Result<(), Error> {
        guard.map.insert(key.to_string(), value);
        self.write_locked(&mut guard.file, &guard.map)
    }

    /// Releases a guard obtained from [`ComposedState::get_for_update`] without writing
    /// anything.
    pub fn cancel_update(&self, _guard: ComposedGuard) {}

    /// Snapshots the whole map under a shared lock.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        match self.open_locked(false).and_then(|mut f| Self::read_locked(&mut f)) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "composed state snapshot failed");
                HashMap::new()
            }
        }
    }
}

/// The three state scopes a single event render has access to: one [`StateMap`] private to the
/// chosen template alias, one [`StateMap`] shared by the whole run, and one [`ComposedState`]
/// shared across every process pointed at the same path, with a capacity.
pub struct StateScopes {
    /// Per-template-alias local maps.
    pub locals: HashMap<String, Arc<StateMap>>,
    /// Process-wide shared map.
    pub shared: Arc<StateMap>,
    /// Cross-process composed map.
    pub composed: Arc<ComposedState>,
}

impl StateScopes {
    /// Builds a scope set with one `locals` entry per `aliases`, composed state backed by the
    /// file at `composed_path`, capped at `max_bytes` of composed-state capacity.
    pub fn new(
        aliases: impl IntoIterator<Item = String>,
        composed_path: PathBuf,
        max_bytes: usize,
    ) -> Result<Self, Error> {
        Ok(StateScopes {
            locals: aliases
                .into_iter()
                .map(|alias| (alias, Arc::new(StateMap::new())))
                .collect(),
            shared: Arc::new(StateMap::new()),
            composed: Arc::new(ComposedState::new(composed_path, max_bytes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_composed_path() -> PathBuf {
        std::env::temp_dir().join(format!("eventum-composed-state-test-{}.state", uuid::Uuid::new_v4()))
    }

    #[test]
    fn local_writes_do_not_cross_aliases() {
        let scopes = StateScopes::new(["a".to_string(), "b".to_string()], temp_composed_path(), 4096).unwrap();
        scopes.locals["a"].set("x", Value::from(1));
        assert_eq!(scopes.locals["a"].get("x"), Value::from(1));
        assert_eq!(scopes.locals["b"].get("x"), Value::Null);
    }

    #[test]
    fn shared_write_visible_to_next_read() {
        let scopes = StateScopes::new(["a".to_string()], temp_composed_path(), 4096).unwrap();
        scopes.shared.set("counter", Value::from(1));
        assert_eq!(scopes.shared.get("counter"), Value::from(1));
    }

    #[test]
    fn composed_rejects_write_over_capacity() {
        let composed = ComposedState::new(temp_composed_path(), 16).unwrap();
        let err = composed
            .set("k", Value::String("a much too long value to fit".into()))
            .unwrap_err();
        assert!(matches!(err, Error::ComposedState(_)));
    }

    #[test]
    fn composed_accepts_write_within_capacity() {
        let composed = ComposedState::new(temp_composed_path(), 4096).unwrap();
        composed.set("k", Value::from(42)).unwrap();
        assert_eq!(composed.get("k"), Value::from(42));
    }

    #[test]
    fn composed_write_is_visible_from_a_second_handle_on_the_same_path() {
        let path = temp_composed_path();
        let first = ComposedState::new(path.clone(), 4096).unwrap();
        first.set("k", Value::from(7)).unwrap();

        let second = ComposedState::new(path, 4096).unwrap();
        assert_eq!(second.get("k"), Value::from(7));
    }

    #[test]
    fn composed_get_for_update_then_cancel_leaves_value_unchanged() {
        let composed = ComposedState::new(temp_composed_path(), 4096).unwrap();
        composed.set("k", Value::from(1)).unwrap();
        let (guard, current) = composed.get_for_update("k").unwrap();
        assert_eq!(current, Value::from(1));
        composed.cancel_update(guard);
        assert_eq!(composed.get("k"), Value::from(1));
    }

    #[test]
    fn get_for_update_then_cancel_leaves_value_unchanged() {
        let scopes = StateScopes::new(["a".to_string()], temp_composed_path(), 4096).unwrap();
        scopes.locals["a"].set("x", Value::from(1));
        let (guard, current) = scopes.locals["a"].get_for_update("x");
        assert_eq!(current, Value::from(1));
        scopes.locals["a"].cancel_update(guard);
        assert_eq!(scopes.locals["a"].get("x"), Value::from(1));
    }
}
