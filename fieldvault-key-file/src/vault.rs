use async_trait::async_trait;
use fieldvault::error::{Error, StoreError};
use fieldvault::key_vault::{DataKeyRecord, InsertOutcome, KeyVaultStore, DEFAULT_KEY_ALT_NAME};
use fieldvault::keys::DataKeyId;
use fieldvault::schema::parse_namespace;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Key vault collection stored as a directory of JSON records.
///
/// The key alt name is kept unique by hard-linking each new record to
/// `<keyAltName>.json` before it is linked as `<id>.json`; the first link
/// fails if another process got there first.
#[derive(Debug, Clone)]
pub struct FileKeyVault {
    dir: PathBuf,
    namespace: String,
}

impl FileKeyVault {
    /// Opens the collection for `namespace` under `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for a malformed namespace and
    /// `Error::KeyVaultUnavailable` if the directory cannot be created.
    pub async fn open(root: impl AsRef<Path>, namespace: &str) -> Result<Self, Error> {
        let (database, collection) = parse_namespace(namespace)?;
        for part in [database, collection] {
            if part.contains(&['/', '\\'][..]) || part == ".." {
                return Err(Error::InvalidConfig(format!("unusable namespace: {namespace}")));
            }
        }

        let dir = root.as_ref().join(database).join(collection);
        tokio::fs::create_dir_all(&dir).await.map_err(StoreError::from)?;
        debug!(dir = %dir.display(), "opened file key vault");
        Ok(Self { dir, namespace: namespace.to_string() })
    }

    /// Returns the collection directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: DataKeyId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn alt_name_path(&self, key_alt_name: &str) -> PathBuf {
        self.dir.join(format!("{key_alt_name}.json"))
    }

    async fn read_record(path: &Path) -> Result<Option<DataKeyRecord>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    /// Ids of every `<id>.json` file in the collection.
    async fn record_ids(&self) -> Result<Vec<DataKeyId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok());
            if let Some(id) = id {
                ids.push(DataKeyId::from(id));
            }
        }
        Ok(ids)
    }

    /// Marks the oldest unmarked record as the default key.
    ///
    /// A record file without its marker is only left behind when the marker was
    /// removed out of band; every such record is still a usable key.
    async fn adopt_unmarked(&self, marker: &Path) -> Result<Option<DataKeyRecord>, StoreError> {
        let mut oldest: Option<DataKeyRecord> = None;
        for id in self.record_ids().await? {
            if let Some(record) = Self::read_record(&self.record_path(id)).await? {
                if oldest.as_ref().map_or(true, |o| record.created_at < o.created_at) {
                    oldest = Some(record);
                }
            }
        }
        let Some(record) = oldest else {
            return Ok(None);
        };

        match tokio::fs::hard_link(self.record_path(record.id), marker).await {
            Ok(()) => {
                warn!(key_id = %record.id, "re-marked unmarked data key record");
                Ok(Some(record))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::read_record(marker).await,
            Err(e) => Err(e.into()),
        }
    }
}

async fn discard(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "failed to remove temporary record"),
    }
}

#[async_trait]
impl KeyVaultStore for FileKeyVault {
    async fn find_one(&self) -> Result<Option<DataKeyRecord>, StoreError> {
        let marker = self.alt_name_path(DEFAULT_KEY_ALT_NAME);
        match Self::read_record(&marker).await? {
            Some(record) => Ok(Some(record)),
            None => self.adopt_unmarked(&marker).await,
        }
    }

    async fn find_by_id(&self, id: DataKeyId) -> Result<Option<DataKeyRecord>, StoreError> {
        if let Some(record) = Self::read_record(&self.record_path(id)).await? {
            return Ok(Some(record).filter(|r| r.id == id));
        }
        let marked = Self::read_record(&self.alt_name_path(DEFAULT_KEY_ALT_NAME)).await?;
        Ok(marked.filter(|r| r.id == id))
    }

    async fn insert_if_absent(&self, record: DataKeyRecord) -> Result<InsertOutcome, StoreError> {
        if record.key_alt_name.contains(&['/', '\\'][..]) || record.key_alt_name.starts_with('.') {
            return Err(StoreError::Corrupt(format!(
                "unusable key alt name: {}",
                record.key_alt_name
            )));
        }

        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let temp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&temp, &json).await {
            discard(&temp).await;
            return Err(e.into());
        }

        // The marker is claimed first, so a record is never visible without it.
        match tokio::fs::hard_link(&temp, self.alt_name_path(&record.key_alt_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                discard(&temp).await;
                return Ok(InsertOutcome::Conflict);
            }
            Err(e) => {
                discard(&temp).await;
                return Err(e.into());
            }
        }

        // The marker already holds the record; `find_by_id` falls back to it.
        if let Err(e) = tokio::fs::hard_link(&temp, self.record_path(record.id)).await {
            warn!(key_id = %record.id, error = %e, "failed to link data key record by id");
        }
        discard(&temp).await;

        debug!(key_id = %record.id, "stored data key record");
        Ok(InsertOutcome::Inserted)
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut ids: HashSet<DataKeyId> = self.record_ids().await?.into_iter().collect();
        if let Some(marked) = Self::read_record(&self.alt_name_path(DEFAULT_KEY_ALT_NAME)).await? {
            ids.insert(marked.id);
        }
        Ok(ids.len())
    }
}
