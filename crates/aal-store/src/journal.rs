use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::object::{BatchRecord, Entry, RecoveredState};
use crate::traits::DurableStore;

/// One journal line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    Batch(BatchRecord),
    Pending(Entry),
}

/// Flush/sync strategy for the journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append.
    #[default]
    EveryWrite,
    /// Flush to the OS and let it decide when to hit the disk.
    OsDefault,
}

/// Append-only, line-oriented file store (the fallback tier).
///
/// Line format:
/// ```text
/// <crc32 of json, 8 lowercase hex digits> <json JournalRecord>\n
/// ```
///
/// Later lines supersede earlier ones for the same batch id. Lines that fail
/// the CRC check or do not parse are skipped on recovery; they are torn
/// writes from a crash.
pub struct JournalStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    sync_mode: SyncMode,
}

impl JournalStore {
    /// Open (or create) the journal at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            sync_mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, record: &JournalRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        let line = format!("{:08x} {}\n", crc32fast::hash(json.as_bytes()), json);

        let mut w = self.writer.lock().expect("journal mutex poisoned");
        w.write_all(line.as_bytes())?;
        w.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            w.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Read every intact record, in file order.
    pub fn recover(&self) -> StoreResult<Vec<JournalRecord>> {
        // Hold the writer lock so no half-written line is observed.
        let _w = self.writer.lock().expect("journal mutex poisoned");
        Ok(self.read_records()?.0)
    }

    /// Recover the ledger state, then rewrite the journal if it holds
    /// superseded copies or unreadable lines. The rewrite goes to a sibling
    /// temp file that is renamed over the original; if it fails the journal
    /// is left as it was and the state is still returned.
    pub fn load_compacted(&self) -> StoreResult<RecoveredState> {
        let mut w = self.writer.lock().expect("journal mutex poisoned");
        let (records, lines) = self.read_records()?;
        let state = state_of(records);

        let live = state.batches.len() + state.pending.len();
        if lines > live {
            match self.rewrite(&state) {
                Ok(file) => {
                    *w = BufWriter::new(file);
                    debug!(dropped = lines - live, path = %self.path.display(), "journal compacted");
                }
                Err(e) => warn!(error = %e, path = %self.path.display(), "journal compaction failed"),
            }
        }
        Ok(state)
    }

    /// Intact records plus the number of non-blank lines read.
    fn read_records(&self) -> StoreResult<(Vec<JournalRecord>, usize)> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        let mut lines = 0;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match parse_line(&line) {
                Ok(record) => records.push(record),
                Err(reason) => warn!(line = lineno + 1, %reason, "skipping journal line"),
            }
        }

        debug!(recovered = records.len(), "journal recovery complete");
        Ok((records, lines))
    }

    /// Write `state` to a temp file, rename it over the journal and return
    /// the reopened file for appending.
    fn rewrite(&self, state: &RecoveredState) -> StoreResult<File> {
        let tmp = self.path.with_extension("compact.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let records = state
                .batches
                .iter()
                .cloned()
                .map(JournalRecord::Batch)
                .chain(state.pending.iter().cloned().map(JournalRecord::Pending));
            for record in records {
                let json = serde_json::to_string(&record)?;
                writeln!(out, "{:08x} {}", crc32fast::hash(json.as_bytes()), json)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }
}

fn state_of(records: Vec<JournalRecord>) -> RecoveredState {
    let mut batches = Vec::new();
    let mut pending = Vec::new();
    for record in records {
        match record {
            JournalRecord::Batch(b) => batches.push(b),
            JournalRecord::Pending(e) => pending.push(e),
        }
    }
    // from_parts keeps the last copy of each batch id.
    RecoveredState::from_parts(0, batches, pending)
}

fn parse_line(line: &str) -> Result<JournalRecord, String> {
    let (crc, json) = line
        .split_once(' ')
        .ok_or_else(|| "missing checksum".to_string())?;
    let expected = u32::from_str_radix(crc, 16).map_err(|_| format!("bad checksum field {crc:?}"))?;
    let actual = crc32fast::hash(json.as_bytes());
    if expected != actual {
        return Err(format!("crc mismatch: expected {expected:08x}, got {actual:08x}"));
    }
    serde_json::from_str(json).map_err(|e| e.to_string())
}

#[async_trait]
impl DurableStore for JournalStore {
    fn name(&self) -> &str {
        "journal"
    }

    async fn save_batch(&self, batch: &BatchRecord) -> StoreResult<()> {
        self.append(&JournalRecord::Batch(batch.clone()))
    }

    async fn save_pending(&self, entry: &Entry) -> StoreResult<()> {
        self.append(&JournalRecord::Pending(entry.clone()))
    }

    async fn load(&self) -> StoreResult<RecoveredState> {
        self.load_compacted()
    }
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}
