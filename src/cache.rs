use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::SpeciesKey;
use crate::error::XenoError;

/// Identifies one cached API page: species plus page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub species: SpeciesKey,
    pub page: u32,
}

impl CacheKey {
    pub fn new(species: SpeciesKey, page: u32) -> Self {
        Self { species, page }
    }

    pub fn file_name(&self) -> String {
        format!("{}_page{}.json", self.species, self.page)
    }

    /// Parses `<key>_page<N>.json` back into a key. Foreign files yield None.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        let (species, page) = stem.rsplit_once("_page")?;
        let page: u32 = page.parse().ok()?;
        let species: SpeciesKey = species.parse().ok()?;
        Some(Self { species, page })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} page {}", self.species, self.page)
    }
}

/// Durable store of raw API pages, one file per (species, page). The store
/// is the single source of truth consulted before any network call.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), XenoError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| XenoError::Filesystem(err.to_string()))
    }

    pub fn path(&self, key: &CacheKey) -> Utf8PathBuf {
        self.root.join(key.file_name())
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.path(key).as_std_path().is_file()
    }

    pub fn read(&self, key: &CacheKey) -> Result<Vec<u8>, XenoError> {
        let path = self.path(key);
        if !path.as_std_path().is_file() {
            return Err(XenoError::CacheMiss(key.to_string()));
        }
        fs::read(path.as_std_path()).map_err(|err| XenoError::Filesystem(err.to_string()))
    }

    /// Persists a page atomically: full payload is written to a temporary
    /// name in the cache directory, then renamed into place, so no reader
    /// ever observes a truncated page.
    pub fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<(), XenoError> {
        self.ensure_root()?;
        let path = self.path(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(tmp_path.as_std_path(), payload)
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// All cached pages grouped per species, pages in ascending order.
    pub fn all_pages(&self) -> Result<BTreeMap<SpeciesKey, Vec<u32>>, XenoError> {
        let mut pages: BTreeMap<SpeciesKey, Vec<u32>> = BTreeMap::new();
        if !self.root.as_std_path().is_dir() {
            return Ok(pages);
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| XenoError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = CacheKey::from_file_name(name) {
                pages.entry(key.species).or_default().push(key.page);
            }
        }
        for list in pages.values_mut() {
            list.sort_unstable();
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
        (temp, CacheStore::new(root))
    }

    fn key(name: &str, page: u32) -> CacheKey {
        CacheKey::new(name.parse().unwrap(), page)
    }

    #[test]
    fn file_name_round_trip() {
        let key = key("Cossypha_caffra", 3);
        assert_eq!(key.file_name(), "Cossypha_caffra_page3.json");
        assert_eq!(
            CacheKey::from_file_name("Cossypha_caffra_page3.json"),
            Some(key)
        );
        assert_eq!(CacheKey::from_file_name("notes.txt"), None);
        assert_eq!(CacheKey::from_file_name("Cossypha_caffra_pageX.json"), None);
    }

    #[test]
    fn write_then_read_is_byte_identical() {
        let (_temp, store) = store();
        let key = key("Turdus_merula", 1);
        let payload = br#"{"numPages":"2","recordings":[]}"#;

        store.write(&key, payload).unwrap();
        assert!(store.exists(&key));
        assert_eq!(store.read(&key).unwrap(), payload.to_vec());
    }

    #[test]
    fn overwrite_is_idempotent() {
        let (_temp, store) = store();
        let key = key("Turdus_merula", 1);
        store.write(&key, b"first").unwrap();
        store.write(&key, b"first").unwrap();
        assert_eq!(store.read(&key).unwrap(), b"first".to_vec());
    }

    #[test]
    fn missing_key_is_a_cache_miss() {
        let (_temp, store) = store();
        let err = store.read(&key("Turdus_merula", 9)).unwrap_err();
        assert_matches!(err, XenoError::CacheMiss(_));
    }

    #[test]
    fn no_temp_file_left_behind_after_write() {
        let (_temp, store) = store();
        let key = key("Turdus_merula", 1);
        store.write(&key, b"payload").unwrap();
        let tmp = store.path(&key).with_extension("json.tmp");
        assert!(!tmp.as_std_path().exists());
    }

    #[test]
    fn all_pages_ignores_foreign_files_and_sorts() {
        let (_temp, store) = store();
        store.write(&key("Apus_apus", 2), b"{}").unwrap();
        store.write(&key("Apus_apus", 1), b"{}").unwrap();
        store.write(&key("Turdus_merula", 1), b"{}").unwrap();
        fs::write(store.root().join("README.txt").as_std_path(), b"x").unwrap();

        let pages = store.all_pages().unwrap();
        assert_eq!(pages.len(), 2);
        let apus: SpeciesKey = "Apus_apus".parse().unwrap();
        let turdus: SpeciesKey = "Turdus_merula".parse().unwrap();
        assert_eq!(pages[&apus], vec![1, 2]);
        assert_eq!(pages[&turdus], vec![1]);
    }

    #[test]
    fn all_pages_on_missing_root_is_empty() {
        let (_temp, store) = store();
        assert!(store.all_pages().unwrap().is_empty());
    }
}
