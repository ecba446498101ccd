use crate::error::{Error, Result};
use crate::layers::PaperRecord;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, create_dir_all};
use walkdir::WalkDir;

pub const SNAPSHOT_FILE: &str = "papers.snapshot";
pub const ALIASES_FILE: &str = "papers.aliases";

/// On-disk paper cache, sharded by the first characters of the paper id.
///
/// The id index lives in memory; records are read back from disk on demand unless
/// the store was opened from a snapshot, in which case they are served from memory.
pub struct PaperStore {
    root: PathBuf,
    index: HashMap<String, PathBuf>,
    loaded: HashMap<String, PaperRecord>,
    // requested id -> canonical id
    aliases: BTreeMap<String, String>,
}

impl PaperStore {
    /// Opens a store with an empty index, creating the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_dir_all(&root).await.map_err(|e| Error::io(&root, e))?;
        Ok(Self {
            root,
            index: HashMap::new(),
            loaded: HashMap::new(),
            aliases: BTreeMap::new(),
        })
    }

    /// Opens a store and restores its index. Records come from the snapshot when
    /// there is one; shard files missing from it or written after it are picked up
    /// from disk.
    pub async fn resume(root: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::open(root).await?;
        store.load_aliases().await?;

        let taken = store.load_snapshot().await?;
        let from_snapshot = store.len();
        let root = store.root.clone();
        let found = store.bulk_load(&root).await?;

        match taken {
            Some(taken) => {
                let stale = store.drop_stale(taken).await?;
                tracing::info!(
                    "Loaded {} papers from snapshot, {} more on disk, {} newer than the snapshot",
                    from_snapshot,
                    store.len() - from_snapshot,
                    stale
                );
            }
            None => tracing::info!("Indexed {} papers from {}", found, root.display()),
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, paper_id: &str) -> bool {
        self.index.contains_key(self.canonical(paper_id))
    }

    fn canonical<'a>(&'a self, paper_id: &'a str) -> &'a str {
        match self.aliases.get(paper_id) {
            Some(canonical) if !self.index.contains_key(paper_id) => canonical.as_str(),
            _ => paper_id,
        }
    }

    /// `root/c0/c1/c2/<id>.json`, using as many leading characters as the id has
    /// (at most three).
    pub fn path_for(&self, paper_id: &str) -> Result<PathBuf> {
        validate_id(paper_id)?;
        let mut path = self.root.clone();
        for c in paper_id.chars().take(3) {
            path.push(c.to_string());
        }
        path.push(format!("{paper_id}.json"));
        Ok(path)
    }

    pub async fn put(&mut self, record: &PaperRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.paper_id)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        create_dir_all(&parent).await.map_err(|e| Error::io(&parent, e))?;

        let data = serde_json::to_vec_pretty(record).map_err(|e| Error::Record {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &data).await?;

        if let Some(slot) = self.loaded.get_mut(&record.paper_id) {
            *slot = record.clone();
        }
        self.index.insert(record.paper_id.clone(), path.clone());
        Ok(path)
    }

    pub async fn get(&self, paper_id: &str) -> Result<PaperRecord> {
        let paper_id = self.canonical(paper_id);
        if let Some(record) = self.loaded.get(paper_id) {
            return Ok(record.clone());
        }
        let path = self
            .index
            .get(paper_id)
            .ok_or_else(|| Error::NotFound(paper_id.to_string()))?;
        read_record(path).await
    }

    /// Remembers that looking up `requested` returned the record stored as `canonical`.
    pub async fn alias(&mut self, requested: &str, canonical: &str) -> Result<()> {
        if requested == canonical || self.aliases.get(requested).map(String::as_str) == Some(canonical) {
            return Ok(());
        }
        validate_id(requested)?;
        self.aliases.insert(requested.to_string(), canonical.to_string());

        let path = self.root.join(ALIASES_FILE);
        let data = serde_json::to_vec_pretty(&self.aliases).map_err(|e| Error::Record {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &data).await
    }

    async fn load_aliases(&mut self) -> Result<()> {
        let path = self.root.join(ALIASES_FILE);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(&path, e)),
        };
        self.aliases = serde_json::from_slice(&data).map_err(|e| Error::Record { path, source: e })?;
        Ok(())
    }

    /// Indexes every `*.json` file below `dir` by file stem. Returns how many were found.
    pub async fn bulk_load(&mut self, dir: &Path) -> Result<usize> {
        let files = json_files(dir).await?;
        let found = files.len();
        for path in files {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.index.insert(stem.to_string(), path.clone());
            }
        }
        Ok(found)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    /// Writes the whole id -> record map to a single file.
    pub async fn write_snapshot(&self) -> Result<PathBuf> {
        let mut papers = BTreeMap::new();
        for id in self.index.keys() {
            papers.insert(id.clone(), self.get(id).await?);
        }

        let path = self.snapshot_path();
        let data = serde_json::to_vec(&papers).map_err(|e| Error::Record {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &data).await?;
        tracing::info!("Wrote snapshot of {} papers to {}", papers.len(), path.display());
        Ok(path)
    }

    /// Loads the snapshot if present and returns when it was written.
    pub async fn load_snapshot(&mut self) -> Result<Option<SystemTime>> {
        let path = self.snapshot_path();
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        let taken = fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| Error::io(&path, e))?;
        let papers: HashMap<String, PaperRecord> =
            serde_json::from_slice(&data).map_err(|e| Error::Record { path, source: e })?;

        for id in papers.keys() {
            let shard = self.path_for(id)?;
            self.index.insert(id.clone(), shard);
        }
        self.loaded.extend(papers);
        Ok(Some(taken))
    }

    /// Forgets snapshot copies whose shard file was rewritten after `taken`.
    async fn drop_stale(&mut self, taken: SystemTime) -> Result<usize> {
        let mut stale = Vec::new();
        for id in self.loaded.keys() {
            let Some(path) = self.index.get(id) else { continue };
            let modified = match fs::metadata(path).await {
                Ok(meta) => meta.modified().map_err(|e| Error::io(path, e))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::io(path, e)),
            };
            if modified > taken {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            self.loaded.remove(id);
        }
        Ok(stale.len())
    }
}

/// Every `*.json` file below `dir`, sorted by path.
pub(crate) async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let root = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&root).to_path_buf();
                Error::io(path, e.into())
            })?;
            if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok::<_, Error>(files)
    })
    .await
    .map_err(|e| Error::io(dir, e.into()))?
}

fn validate_id(paper_id: &str) -> Result<()> {
    let unsafe_id = paper_id.is_empty()
        || paper_id == "."
        || paper_id.contains("..")
        || paper_id.contains(['/', '\\', '\0']);
    if unsafe_id {
        return Err(Error::InvalidId(paper_id.to_string()));
    }
    Ok(())
}

async fn read_record(path: &Path) -> Result<PaperRecord> {
    let data = fs::read(path).await.map_err(|e| Error::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| Error::Record {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes through a sibling temp file so an interrupted write never leaves a
/// truncated file behind.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await.map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).await.map_err(|e| Error::io(path, e))
}
