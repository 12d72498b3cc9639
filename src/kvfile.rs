//! A trivial string key/value file, shared by the persistent lock and
//! property stores. The whole map is kept in memory by the owning
//! store; this module only (de)serializes it. Writes go through a
//! temp-file rename so a crash never leaves a half-written store.
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub(crate) struct KvFile {
    path: PathBuf,
}

impl KvFile {
    pub fn new<P: AsRef<Path>>(path: P) -> KvFile {
        KvFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the store. A missing file is an empty store.
    pub fn load(&self) -> io::Result<HashMap<String, String>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&data).map_err(io::Error::other)
    }

    /// Rewrite the store atomically.
    pub fn save(&self, map: &HashMap<String, String>) -> io::Result<()> {
        let data = serde_json::to_vec(map).map_err(io::Error::other)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvFile::new(dir.path().join("store"));
        assert!(kv.load().unwrap().is_empty());

        let mut map = HashMap::new();
        map.insert("URLLOCK:/a/b".to_string(), "[\"tok\"]".to_string());
        kv.save(&map).unwrap();

        let map2 = kv.load().unwrap();
        assert_eq!(map, map2);
    }
}
