//! FileTreeReportStore - directory tree に report を追記する store
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<bucket>/<task-file>.jsonl
//! ```
//!
//! `bucket` is two hex digits of an FNV-1a hash of the task id, and each line
//! of a task file is one `StoredReport` JSON object. The task/tag/recency index
//! lives in memory and is rebuilt from the tree by `initialize`.
//!
//! A task file only ever ends in a complete line: a failed append is rolled
//! back, and an unterminated last line left by a crash is cut off on the next
//! `initialize`. Corruption anywhere else refuses to open.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, Lines, Take};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::index::TaskIndex;
use crate::domain::{Report, ReportFields, Tag, TaskId, TaskRecord};
use crate::error::{PersistError, QueryError, StoreError, StoreInitError};
use crate::ports::{Clock, QueryableReportStore, ReportSequence, ReportStore, StoreStats};

pub const NAME: &str = "file-tree";

pub const DEFAULT_MAX_OPEN_FILES: usize = 128;

/// Longest escaped task-file stem; longer ids are cut and suffixed with a hash.
const MAX_STEM_LEN: usize = 200;

const REPORT_FILE_EXT: &str = "jsonl";

/// One line of a task file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredReport {
    seq: u64,
    received_at: DateTime<Utc>,
    report: Report,
}

pub struct FileTreeReportStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    index: RwLock<TaskIndex>,
    writers: Mutex<WriterCache>,
    closed: AtomicBool,
    read_only: bool,
    /// Readable prefix of task files whose torn tail was left on disk.
    torn_tails: RwLock<HashMap<PathBuf, u64>>,
}

impl FileTreeReportStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            index: RwLock::new(TaskIndex::new()),
            writers: Mutex::new(WriterCache::new(DEFAULT_MAX_OPEN_FILES)),
            closed: AtomicBool::new(false),
            read_only: false,
            torn_tails: RwLock::new(HashMap::new()),
        }
    }

    /// Open an existing tree for queries only.
    ///
    /// Nothing is created or repaired: a missing root is an error and
    /// `persist` fails with `StoreError::ReadOnly`.
    pub async fn open_existing(
        root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreInitError> {
        let store = Self {
            read_only: true,
            ..Self::new(root, clock)
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Bound on task files kept open for appending. Minimum 1.
    pub fn with_max_open_files(mut self, max_open: usize) -> Self {
        self.writers = Mutex::new(WriterCache::new(max_open.max(1)));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn task_path(&self, task_id: &TaskId) -> PathBuf {
        self.root
            .join(bucket(task_id))
            .join(format!("{}.{REPORT_FILE_EXT}", file_stem(task_id)))
    }

    async fn root_exists(&self) -> bool {
        fs::try_exists(&self.root).await.unwrap_or(false)
    }

    /// A write error is per item unless the root itself has gone away.
    async fn classify_write_error(&self, err: io::Error) -> StoreError {
        if self.root_exists().await {
            PersistError::Io(err).into()
        } else {
            StoreError::Unusable(format!(
                "store root {} is gone: {err}",
                self.root.display()
            ))
        }
    }
}

#[async_trait]
impl ReportStore for FileTreeReportStore {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<(), StoreInitError> {
        if self.read_only {
            let meta = fs::metadata(&self.root)
                .await
                .map_err(|e| init_io_error(&self.root, e))?;
            if !meta.is_dir() {
                let err = io::Error::new(io::ErrorKind::NotADirectory, "not a directory");
                return Err(init_io_error(&self.root, err));
            }
        } else {
            fs::create_dir_all(&self.root)
                .await
                .map_err(|e| init_io_error(&self.root, e))?;
        }

        let (index, torn_tails) = rebuild_index(&self.root, !self.read_only).await?;
        *self.torn_tails.write().await = torn_tails;
        let stats = index.stats();
        *self.index.write().await = index;

        info!(
            root = %self.root.display(),
            tasks = stats.num_tasks,
            reports = stats.num_reports,
            "file-tree store opened"
        );
        Ok(())
    }

    async fn persist(&self, report: Report) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let fields = ReportFields::parse(&report);
        let task_id = fields.task_id.clone().ok_or(PersistError::MissingTaskId)?;
        let path = self.task_path(&task_id);
        let received_at = self.clock.now();

        // writers lock が追記を直列化するので、ここで読んだ seq が apply() の seq と一致する
        let mut writers = self.writers.lock().await;
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let seq = self.index.read().await.next_seq();

        let mut line = serde_json::to_vec(&StoredReport {
            seq,
            received_at,
            report,
        })
        .map_err(PersistError::from)?;
        line.push(b'\n');

        if let Err(e) = writers.append(&path, &line).await {
            return Err(self.classify_write_error(e).await);
        }

        // still under the writers lock: a query snapshot taken after this
        // append also sees the index update
        self.index.write().await.apply(&task_id, &fields, received_at);
        debug!(task_id = %task_id, seq, "report appended");
        Ok(())
    }

    async fn sync(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut writers = self.writers.lock().await;
        if !self.root_exists().await {
            return Err(StoreError::Unusable(format!(
                "store root {} is gone",
                self.root.display()
            )));
        }
        writers.sync_all().await?;
        debug!(open_files = writers.len(), "file-tree store synced");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("file-tree store already shut down");
            return Ok(());
        }
        let mut writers = self.writers.lock().await;
        writers.close_all().await?;
        info!(root = %self.root.display(), "file-tree store closed");
        Ok(())
    }
}

#[async_trait]
impl QueryableReportStore for FileTreeReportStore {
    async fn get_reports_by_task(&self, task_id: &TaskId) -> Result<ReportSequence, QueryError> {
        // index と writers の lock は同時に持たない（persist と逆順になるため）
        if !self.index.read().await.contains(task_id) {
            return Ok(ReportSequence::empty());
        }
        let path = self.task_path(task_id);

        // persist() applies the index before releasing this lock, so every
        // byte up to `len` belongs to an indexed report
        let len = {
            let mut writers = self.writers.lock().await;
            writers.flush(&path).await?;
            match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            }
        };
        let len = match self.torn_tails.read().await.get(&path) {
            Some(&readable) => len.min(readable),
            None => len,
        };

        Ok(ReportSequence::new(move || read_reports(path.clone(), len).boxed()))
    }

    async fn get_latest_tasks(&self, n: usize) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.index.read().await.latest(n))
    }

    async fn get_tasks_since(&self, since: DateTime<Utc>) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.index.read().await.since(since))
    }

    async fn get_tasks_by_tag(&self, tag: &Tag) -> Result<Vec<TaskRecord>, QueryError> {
        Ok(self.index.read().await.by_tag(tag))
    }

    async fn stats(&self) -> Result<StoreStats, QueryError> {
        Ok(self.index.read().await.stats())
    }
}

/// Open append handles, evicted oldest-first once `max_open` is reached.
struct WriterCache {
    open: HashMap<PathBuf, BufWriter<File>>,
    order: VecDeque<PathBuf>,
    max_open: usize,
}

impl WriterCache {
    fn new(max_open: usize) -> Self {
        Self {
            open: HashMap::new(),
            order: VecDeque::new(),
            max_open,
        }
    }

    fn len(&self) -> usize {
        self.open.len()
    }

    /// Append one line. On failure the file is cut back to its previous end.
    async fn append(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if !self.open.contains_key(path) {
            if self.open.len() >= self.max_open {
                self.evict_oldest().await?;
            }
            let file = open_for_append(path).await?;
            self.open.insert(path.to_path_buf(), BufWriter::new(file));
            self.order.push_back(path.to_path_buf());
        }
        let Some(writer) = self.open.get_mut(path) else {
            return Err(io::Error::other("writer missing after open"));
        };

        // earlier lines reach the file first, so `committed` ends on a line boundary
        writer.flush().await?;
        let committed = writer.get_ref().metadata().await?.len();

        let written = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            let rollback = writer.get_ref().set_len(committed).await;
            // the buffer holds only part of this line now
            self.discard(path);
            if let Err(rollback) = rollback {
                warn!(
                    path = %path.display(),
                    error = %rollback,
                    "could not roll back failed append"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn discard(&mut self, path: &Path) {
        self.open.remove(path);
        self.order.retain(|p| p != path);
    }

    /// Close the oldest writer. It stays cached if its flush fails.
    async fn evict_oldest(&mut self) -> io::Result<()> {
        let Some(path) = self.order.front().cloned() else {
            return Ok(());
        };
        if let Some(writer) = self.open.get_mut(&path) {
            writer.flush().await?;
        }
        self.discard(&path);
        Ok(())
    }

    async fn flush(&mut self, path: &Path) -> io::Result<()> {
        if let Some(writer) = self.open.get_mut(path) {
            writer.flush().await?;
        }
        Ok(())
    }

    async fn sync_all(&mut self) -> io::Result<()> {
        for writer in self.open.values_mut() {
            writer.flush().await?;
            writer.get_ref().sync_data().await?;
        }
        Ok(())
    }

    async fn close_all(&mut self) -> io::Result<()> {
        let result = self.sync_all().await;
        self.open.clear();
        self.order.clear();
        result
    }
}

/// Opens a task file, creating its bucket directory but never the root.
async fn open_for_append(path: &Path) -> io::Result<File> {
    if let Some(bucket_dir) = path.parent() {
        match fs::create_dir(bucket_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Reports stored in the first `len` bytes of a task file.
fn read_reports(
    path: PathBuf,
    len: u64,
) -> impl Stream<Item = Result<Report, QueryError>> + Send + 'static {
    try_stream! {
        let mut lines = open_lines(&path, len).await?;
        if let Some(lines) = lines.as_mut() {
            while let Some(line) = lines.next_line().await.map_err(QueryError::from)? {
                if line.trim().is_empty() {
                    continue;
                }
                let stored: StoredReport = serde_json::from_str(&line).map_err(|e| {
                    QueryError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                yield stored.report;
            }
        }
    }
}

async fn open_lines(
    path: &Path,
    len: u64,
) -> Result<Option<Lines<BufReader<Take<File>>>>, QueryError> {
    match File::open(path).await {
        Ok(file) => Ok(Some(BufReader::new(file.take(len)).lines())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Index every task file under `root`, plus the readable length of files
/// left with a torn tail (only when not repairing).
async fn rebuild_index(
    root: &Path,
    repair: bool,
) -> Result<(TaskIndex, HashMap<PathBuf, u64>), StoreInitError> {
    let mut index = TaskIndex::new();
    let mut torn_tails = HashMap::new();
    let mut buckets = fs::read_dir(root)
        .await
        .map_err(|e| init_io_error(root, e))?;

    while let Some(bucket) = buckets
        .next_entry()
        .await
        .map_err(|e| init_io_error(root, e))?
    {
        let bucket_path = bucket.path();
        let file_type = bucket
            .file_type()
            .await
            .map_err(|e| init_io_error(&bucket_path, e))?;
        if !file_type.is_dir() {
            warn!(path = %bucket_path.display(), "ignoring stray file in store root");
            continue;
        }

        let mut files = fs::read_dir(&bucket_path)
            .await
            .map_err(|e| init_io_error(&bucket_path, e))?;
        while let Some(entry) = files
            .next_entry()
            .await
            .map_err(|e| init_io_error(&bucket_path, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(REPORT_FILE_EXT) {
                continue;
            }
            if let Some(readable) = load_task_file(&path, &mut index, repair).await? {
                torn_tails.insert(path, readable);
            }
        }
    }
    Ok((index, torn_tails))
}

/// Index one task file.
///
/// An unterminated last line is a torn append from a crash: it is skipped,
/// and with `repair` the file is cut back (or, if the line is whole, given
/// its missing newline). Any other unparseable line is corruption.
async fn load_task_file(
    path: &Path,
    index: &mut TaskIndex,
    repair: bool,
) -> Result<Option<u64>, StoreInitError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| init_io_error(path, e))?;

    let mut offset = 0;
    for (i, chunk) in content.split_inclusive('\n').enumerate() {
        let start = offset;
        offset += chunk.len();
        let terminated = chunk.ends_with('\n');
        let line = chunk.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        let corrupt = |reason: String| StoreInitError::Corrupt {
            path: path.to_path_buf(),
            line: i + 1,
            reason,
        };

        let stored: StoredReport = match serde_json::from_str(line) {
            Ok(stored) => stored,
            Err(e) if !terminated => {
                warn!(
                    path = %path.display(),
                    line = i + 1,
                    error = %e,
                    "dropping torn last line of task file"
                );
                if !repair {
                    return Ok(Some(start as u64));
                }
                truncate_file(path, start as u64).await?;
                break;
            }
            Err(e) => return Err(corrupt(e.to_string())),
        };
        let fields = ReportFields::parse(&stored.report);
        let Some(task_id) = fields.task_id.clone() else {
            return Err(corrupt("report has no task identifier".to_string()));
        };
        index.restore(&task_id, &fields, stored.received_at, stored.seq);

        if !terminated && repair {
            // whole record, only the newline was lost
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .await
                .map_err(|e| init_io_error(path, e))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| init_io_error(path, e))?;
        }
    }
    Ok(None)
}

async fn truncate_file(path: &Path, len: u64) -> Result<(), StoreInitError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| init_io_error(path, e))?;
    file.set_len(len).await.map_err(|e| init_io_error(path, e))
}

fn init_io_error(path: &Path, source: io::Error) -> StoreInitError {
    StoreInitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn bucket(task_id: &TaskId) -> String {
    format!("{:02x}", fnv1a(task_id.as_str().as_bytes()) & 0xff)
}

// stable across builds, unlike std's DefaultHasher
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// File-name-safe form of a task id: `[A-Za-z0-9_-]` kept, other bytes `%XX`.
///
/// Stems longer than `MAX_STEM_LEN` are cut and end in `~` plus the id's
/// full FNV-1a hash. Files are matched back to tasks by their content, never
/// by name.
fn file_stem(task_id: &TaskId) -> String {
    let mut stem = String::with_capacity(task_id.as_str().len());
    for b in task_id.as_str().bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("%{b:02X}"));
        }
    }
    if stem.len() > MAX_STEM_LEN {
        let hash = format!("~{:016x}", fnv1a(task_id.as_str().as_bytes()));
        // ASCII only, so any byte index is a char boundary
        stem.truncate(MAX_STEM_LEN - hash.len());
        stem.push_str(&hash);
    }
    stem
}
