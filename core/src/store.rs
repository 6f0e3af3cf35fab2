use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::RenewError;
use crate::keyblock::{self, GeneratedLicenseKey};

/// Filesystem-backed key/value store used as the default KV engine.
#[derive(Clone)]
pub struct FsKv {
    root: PathBuf,
}

/// Minimal key/value interface over byte keys and values.
pub trait Kv: Clone + Send + Sync + 'static {
    /// Get value bytes for `key`, if present.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    /// Set value bytes for `key`, overwriting if it exists.
    fn put(&self, key: &[u8], val: &[u8]) -> Result<()>;
    /// Delete `key`; returns `true` if a value existed.
    fn delete(&self, key: &[u8]) -> bool;
}

/// Serde helpers layered on top of any [`Kv`] implementation.
pub trait KvSerde: Kv {
    /// Deserialize type `T` stored at `key` using `bincode`.
    fn get_t<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key) {
            Some(bytes) => {
                let v = bincode::deserialize::<T>(&bytes)
                    .with_context(|| "bincode deserialize")?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }
    /// Serialize `val` with `bincode` and store at `key`.
    fn put_t<T: Serialize>(&self, key: &[u8], val: &T) -> Result<()> {
        let buf = bincode::serialize(val).with_context(|| "bincode serialize")?;
        self.put(key, &buf)
    }
}
impl<T: Kv> KvSerde for T {}

/// Default KV type exported by this crate (FS-backed).
pub type DefaultKv = FsKv;

/// Open an FS-backed KV rooted at `dir` (created if missing).
pub fn open_default<P: AsRef<Path>>(dir: P) -> Result<DefaultKv> {
    let root = dir.as_ref().to_path_buf();
    fs::create_dir_all(&root)
        .with_context(|| format!("create kv dir {}", root.display()))?;
    Ok(FsKv { root })
}

/// Build a namespaced key as bytes: `"{ns}:{key}"`.
pub fn ns(ns: &str, key: &str) -> Vec<u8> {
    let mut s = String::with_capacity(ns.len() + 1 + key.len());
    s.push_str(ns);
    s.push(':');
    s.push_str(key);
    s.into_bytes()
}

/* --------------------- impl FsKv --------------------- */

impl FsKv {
    pub(crate) fn path_for(&self, key: &[u8]) -> PathBuf {
        // Windows-safe: map arbitrary bytes to a hex file name.
        let mut name = String::with_capacity(key.len() * 2);
        for &b in key {
            name.push(hex_digit(b >> 4));
            name.push(hex_digit(b & 0xF));
        }
        self.root.join(name)
    }
}

fn hex_digit(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '?',
    }
}

impl Kv for FsKv {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut f = fs::File::open(self.path_for(key)).ok()?;
        let mut buf = Vec::new();
        if f.read_to_end(&mut buf).is_ok() { Some(buf) } else { None }
    }

    fn put(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        // Write temp then rename so readers never see half a record.
        let tmp = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(val).with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all().with_context(|| format!("sync {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))
    }

    fn delete(&self, key: &[u8]) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }
}

/* --------------------- license key store --------------------- */

/// Identity of a stored license key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An existing license key eligible for renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    /// Domain the key is issued for.
    pub domain: String,
    /// Backing record, used when the key is superseded.
    pub id: SlotId,
}

/// Persisted license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Record identity.
    pub id: SlotId,
    /// Domain from the first line of the key block.
    pub domain: String,
    /// Parsed expiration, absent for records added by domain only.
    pub expires_on: Option<NaiveDate>,
    /// Key block exactly as the licensing service returned it.
    pub raw_block: String,
}

/// Persistent store of license key records.
pub trait KeyStore {
    /// Current records eligible for renewal, in store order.
    fn slots(&self) -> Result<Vec<KeySlot>, RenewError>;
    /// Persist a freshly generated key and return its identity.
    fn insert(&self, key: &GeneratedLicenseKey) -> Result<SlotId, RenewError>;
    /// Remove a record; `Ok(false)` if it was already gone.
    fn delete(&self, id: SlotId) -> Result<bool, RenewError>;
}

const KEYS: &str = "keys";

/// [`KeyStore`] over any [`Kv`]: an id registry plus one bincode record per key.
#[derive(Clone)]
pub struct KvKeyStore<K: Kv> {
    kv: K,
}

fn store_err(e: anyhow::Error) -> RenewError {
    RenewError::Store(format!("{e:#}"))
}

impl<K: Kv> KvKeyStore<K> {
    /// Wrap a KV engine.
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    fn registry(&self) -> Result<Vec<SlotId>, RenewError> {
        Ok(self.kv.get_t(&ns(KEYS, "registry")).map_err(store_err)?.unwrap_or_default())
    }

    fn put_registry(&self, ids: &[SlotId]) -> Result<(), RenewError> {
        self.kv.put_t(&ns(KEYS, "registry"), &ids).map_err(store_err)
    }

    fn next_id(&self) -> Result<SlotId, RenewError> {
        let seq: u64 = self.kv.get_t(&ns(KEYS, "seq")).map_err(store_err)?.unwrap_or(0) + 1;
        self.kv.put_t(&ns(KEYS, "seq"), &seq).map_err(store_err)?;
        Ok(SlotId(seq))
    }

    fn record_key(id: SlotId) -> Vec<u8> {
        ns(KEYS, &id.to_string())
    }

    fn append(&self, domain: String, expires_on: Option<NaiveDate>, raw_block: String) -> Result<SlotId, RenewError> {
        let id = self.next_id()?;
        let rec = LicenseRecord { id, domain, expires_on, raw_block };
        self.kv.put_t(&Self::record_key(id), &rec).map_err(store_err)?;
        let mut ids = self.registry()?;
        ids.push(id);
        self.put_registry(&ids)?;
        Ok(id)
    }

    /// Look up one record.
    pub fn get(&self, id: SlotId) -> Result<Option<LicenseRecord>, RenewError> {
        self.kv.get_t(&Self::record_key(id)).map_err(store_err)
    }

    /// All records in registry order. Registry entries whose record vanished are skipped.
    pub fn records(&self) -> Result<Vec<LicenseRecord>, RenewError> {
        let mut out = Vec::new();
        for id in self.registry()? {
            if let Some(rec) = self.get(id)? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    /// Store a key block obtained out of band (e.g. the first manually issued key).
    pub fn import_raw(&self, raw_block: &str) -> Result<SlotId, RenewError> {
        let key = keyblock::parse(raw_block)?;
        self.insert(&key)
    }

    /// Register a domain with no key block yet, so the next run renews it.
    pub fn add_domain(&self, domain: &str) -> Result<SlotId, RenewError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(RenewError::Store("empty domain".into()));
        }
        self.append(domain.to_string(), None, String::new())
    }
}

impl<K: Kv> KeyStore for KvKeyStore<K> {
    fn slots(&self) -> Result<Vec<KeySlot>, RenewError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|r| KeySlot { domain: r.domain, id: r.id })
            .collect())
    }

    fn insert(&self, key: &GeneratedLicenseKey) -> Result<SlotId, RenewError> {
        // The stored domain is re-derived from the block, not trusted from the caller.
        let domain = key
            .raw_block
            .lines()
            .next()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&key.domain)
            .to_string();
        self.append(domain, Some(key.expires_on), key.raw_block.clone())
    }

    fn delete(&self, id: SlotId) -> Result<bool, RenewError> {
        let mut ids = self.registry()?;
        let before = ids.len();
        ids.retain(|i| *i != id);
        if ids.len() != before {
            self.put_registry(&ids)?;
        }
        let existed = self.kv.delete(&Self::record_key(id));
        Ok(existed || ids.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(domain: &str, exp: &str) -> String {
        format!("{domain}\nPRODUCT:CX13\nSERIAL:SN-1\nEXPIRATION:{exp}\nSIGNATURE:abc")
    }

    fn store() -> (tempfile::TempDir, KvKeyStore<FsKv>) {
        let dir = tempfile::tempdir().unwrap();
        let kv = open_default(dir.path()).unwrap();
        (dir, KvKeyStore::new(kv))
    }

    #[test]
    fn kv_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open_default(dir.path()).unwrap();
        let key = ns("task", "state");
        assert!(kv.get(&key).is_none());
        kv.put_t(&key, &42u64).unwrap();
        assert_eq!(kv.get_t::<u64>(&key).unwrap(), Some(42));
        assert!(kv.delete(&key));
        assert!(!kv.delete(&key));
    }

    #[test]
    fn slots_keep_insertion_order() {
        let (_dir, store) = store();
        let a = store.import_raw(&block("a.com", "20250601")).unwrap();
        let b = store.add_domain("b.com").unwrap();
        let c = store.import_raw(&block("c.com", "20240101")).unwrap();

        let slots = store.slots().unwrap();
        let domains: Vec<_> = slots.iter().map(|s| s.domain.as_str()).collect();
        assert_eq!(domains, ["a.com", "b.com", "c.com"]);
        assert_eq!(slots.iter().map(|s| s.id).collect::<Vec<_>>(), [a, b, c]);
    }

    #[test]
    fn insert_keeps_raw_block_verbatim() {
        let (_dir, store) = store();
        let raw = "a.com\r\nX\r\nY\r\nEXPIRATION:20250601\r\n";
        let key = keyblock::parse(raw).unwrap();
        let id = store.insert(&key).unwrap();

        let rec = store.get(id).unwrap().unwrap();
        assert_eq!(rec.raw_block, raw);
        assert_eq!(rec.domain, "a.com");
        assert_eq!(rec.expires_on, NaiveDate::from_ymd_opt(2025, 6, 1));
    }

    #[test]
    fn delete_removes_slot() {
        let (_dir, store) = store();
        let a = store.add_domain("a.com").unwrap();
        let b = store.add_domain("b.com").unwrap();

        assert!(store.delete(a).unwrap());
        assert!(!store.delete(a).unwrap());
        let slots = store.slots().unwrap();
        assert_eq!(slots, vec![KeySlot { domain: "b.com".into(), id: b }]);
    }

    #[test]
    fn failed_record_write_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open_default(dir.path()).unwrap();
        let store = KvKeyStore::new(kv.clone());
        let a = store.add_domain("a.com").unwrap();
        // A directory where the next record belongs makes the rename fail.
        fs::create_dir(kv.path_for(&ns(KEYS, "2"))).unwrap();

        let err = store.import_raw(&block("b.com", "20250601")).unwrap_err();
        assert!(matches!(err, RenewError::Store(_)));
        assert_eq!(store.slots().unwrap(), vec![KeySlot { domain: "a.com".into(), id: a }]);
    }

    #[test]
    fn kv_put_surfaces_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let kv = open_default(dir.path()).unwrap();
        let key = ns("task", "state");
        fs::create_dir(kv.path_for(&key)).unwrap();
        assert!(kv.put(&key, b"x").is_err());
        assert!(kv.put_t(&key, &1u64).is_err());
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let (_dir, store) = store();
        let a = store.add_domain("a.com").unwrap();
        store.delete(a).unwrap();
        let b = store.add_domain("b.com").unwrap();
        assert!(b > a);
    }

    #[test]
    fn import_rejects_malformed_block() {
        let (_dir, store) = store();
        let err = store.import_raw("a.com\nonly two lines").unwrap_err();
        assert!(matches!(err, RenewError::MalformedKeyBlock(_)));
        assert!(store.slots().unwrap().is_empty());
    }
}
