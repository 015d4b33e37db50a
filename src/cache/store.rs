use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Content-addressed file store keyed by BLAKE3 digests.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hash(content: &[u8]) -> String {
        blake3::hash(content).to_hex().to_string()
    }

    /// Location of the entry for `hash`, whether or not it exists yet.
    pub fn path_for(&self, hash: &str, extension: &str) -> PathBuf {
        // two-char shard directory
        let (prefix, rest) = hash.split_at(2.min(hash.len()));
        self.dir.join(prefix).join(format!("{rest}.{extension}"))
    }

    pub fn get(&self, hash: &str, extension: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(hash, extension)).ok()
    }

    pub fn put(&self, hash: &str, extension: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(hash, extension);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_sharded() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("deobfuscated")).unwrap();
        let hash = CacheStore::hash(b"var _0x1 = 1;");

        assert!(store.get(&hash, "js").is_none());
        store.put(&hash, "js", b"var a = 1;").unwrap();
        assert_eq!(store.get(&hash, "js").unwrap(), b"var a = 1;");

        let path = store.path_for(&hash, "js");
        assert!(path.parent().unwrap().ends_with(&hash[..2]));
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(CacheStore::hash(b"abc"), CacheStore::hash(b"abc"));
        assert_ne!(CacheStore::hash(b"abc"), CacheStore::hash(b"abd"));
        assert_eq!(CacheStore::hash(b"").len(), 64);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.put("abcdef", "js", b"x").unwrap();
        store.clear().unwrap();
        assert!(store.get("abcdef", "js").is_none());
        assert!(store.dir().exists());
    }
}
