// src/store/sled_engine.rs
use sled::{Db, IVec, Tree};

use super::kv_trait::{Storage, StoreError};

const DATA_TREE: &[u8] = b"kece";

pub struct SledEngine {
    db: Db,
    tree: Tree,
}

impl SledEngine {
    pub fn new(storage_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(storage_path)?;
        let tree = db.open_tree(DATA_TREE)?;
        Ok(Self { db, tree })
    }

    fn decode(key: &str, v: IVec) -> Result<String, StoreError> {
        String::from_utf8(v.to_vec())
            .map_err(|e| StoreError::Backend(format!("value for '{}' is not utf-8: {}", key, e)))
    }
}

impl Storage for SledEngine {
    fn get(&self, key: &str) -> Result<String, StoreError> {
        match self.tree.get(key)? {
            Some(v) => Self::decode(key, v),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.tree.remove(key)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn auth(&self, identity: &str, secret: &str) -> Result<(), StoreError> {
        self.set(identity, secret)
    }

    /// Flush dirty pages to disk.
    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sled_roundtrip_and_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let path = path.to_str().unwrap();

        {
            let engine = SledEngine::new(path).unwrap();
            engine.set("foo", "bar").unwrap();
            engine.auth("10.0.0.1:4000", "s3cret").unwrap();
            engine.flush().unwrap();
        }

        let engine = SledEngine::new(path).unwrap();
        assert_eq!(engine.get("foo").unwrap(), "bar");
        assert_eq!(engine.get("10.0.0.1:4000").unwrap(), "s3cret");

        engine.delete("foo").unwrap();
        assert!(matches!(engine.get("foo"), Err(StoreError::NotFound(_))));
        assert!(matches!(engine.delete("foo"), Err(StoreError::NotFound(_))));
    }
}
