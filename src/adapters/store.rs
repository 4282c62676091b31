use crate::domain::model::AssignmentRecord;
use crate::domain::ports::ConfigStore;
use crate::utils::error::Result;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const RECORD_EXTENSION: &str = "json";

/// One JSON file per local port: `<dir>/<port>.json`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    base_path: PathBuf,
}

impl FileConfigStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, port: u16) -> PathBuf {
        self.base_path.join(format!("{}.{}", port, RECORD_EXTENSION))
    }
}

impl ConfigStore for FileConfigStore {
    async fn write(&self, port: u16, record: &AssignmentRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        let data = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(port);
        // 先寫入暫存檔再改名，避免讀到寫一半的檔案
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn read(&self, port: u16) -> Result<Option<AssignmentRecord>> {
        match tokio::fs::read(self.record_path(port)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, port: u16) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(port)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<u16>> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(port) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u16>().ok())
            {
                ports.push(port);
            }
        }
        ports.sort_unstable();
        Ok(ports)
    }
}

/// In-memory store for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    records: Arc<Mutex<BTreeMap<u16, AssignmentRecord>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    async fn write(&self, port: u16, record: &AssignmentRecord) -> Result<()> {
        self.records.lock().await.insert(port, record.clone());
        Ok(())
    }

    async fn read(&self, port: u16) -> Result<Option<AssignmentRecord>> {
        Ok(self.records.lock().await.get(&port).cloned())
    }

    async fn delete(&self, port: u16) -> Result<()> {
        self.records.lock().await.remove(&port);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<u16>> {
        Ok(self.records.lock().await.keys().copied().collect())
    }
}

/// Reads every record, skipping ports whose file vanished in between.
pub async fn load_all<S: ConfigStore>(store: &S) -> Result<Vec<AssignmentRecord>> {
    let mut records = Vec::new();
    for port in store.list().await? {
        if let Some(record) = store.read(port).await? {
            records.push(record);
        }
    }
    Ok(records)
}
