use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aal_crypto::{ChainError, ChainLink, ContentHasher, HashChainVerifier, HasherError, GENESIS_PREV_HASH};
use aal_types::Digest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{AnchorBackend, AnchorPayload, Submission};
use crate::error::{AnchorError, BackendError};

/// One block of the local hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub root_hash: Digest,
    pub previous_hash: Digest,
    pub block_hash: Digest,
    pub timestamp: DateTime<Utc>,
}

/// The hashed subset of a block: every field except `blockHash`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockFields<'a> {
    index: u64,
    root_hash: &'a Digest,
    previous_hash: &'a Digest,
    timestamp: &'a DateTime<Utc>,
}

impl Block {
    fn seal(
        index: u64,
        root_hash: Digest,
        previous_hash: Digest,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, HasherError> {
        let mut block = Self {
            index,
            root_hash,
            previous_hash,
            block_hash: Digest::null(),
            timestamp,
        };
        block.block_hash = block.compute_hash()?;
        Ok(block)
    }

    /// The genesis block: index 0, null root, sentinel previous hash.
    pub fn genesis() -> Result<Self, HasherError> {
        Self::seal(0, Digest::null(), GENESIS_PREV_HASH, Utc::now())
    }

    /// Hash over the block's canonical JSON, excluding `blockHash`.
    pub fn compute_hash(&self) -> Result<Digest, HasherError> {
        ContentHasher::BLOCK.hash_json(&BlockFields {
            index: self.index,
            root_hash: &self.root_hash,
            previous_hash: &self.previous_hash,
            timestamp: &self.timestamp,
        })
    }
}

impl ChainLink for Block {
    fn index(&self) -> u64 {
        self.index
    }

    fn link_hash(&self) -> Digest {
        self.block_hash
    }

    fn prev_hash(&self) -> Digest {
        self.previous_hash
    }

    fn compute_hash(&self) -> Result<Digest, HasherError> {
        Block::compute_hash(self)
    }
}

/// File-backed, hash-linked chain of anchored roots.
///
/// The whole chain is one JSON array, rewritten atomically on every append
/// (write a sibling `.tmp`, fsync, rename).
#[derive(Debug)]
pub struct LocalChain {
    path: PathBuf,
    blocks: Vec<Block>,
}

impl LocalChain {
    /// Open the chain at `path`, creating it with a genesis block if absent.
    ///
    /// An existing file that does not pass [`LocalChain::check_integrity`]
    /// is an error; it is never rebuilt.
    pub fn open(path: &Path) -> Result<Self, AnchorError> {
        if path.exists() {
            let blocks = Self::read_blocks(path)?;
            if !blocks.is_empty() {
                let chain = Self {
                    path: path.to_path_buf(),
                    blocks,
                };
                chain
                    .check_integrity()
                    .map_err(|source| AnchorError::ChainIntegrity {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!(path = %path.display(), blocks = chain.blocks.len(), "local chain loaded");
                return Ok(chain);
            }
        }

        let chain = Self {
            path: path.to_path_buf(),
            blocks: vec![Block::genesis().map_err(|e| AnchorError::Serialization(e.to_string()))?],
        };
        chain.flush()?;
        info!(path = %path.display(), "local chain created");
        Ok(chain)
    }

    /// Read the blocks stored at `path` without verifying them.
    pub fn read_blocks(path: &Path) -> Result<Vec<Block>, AnchorError> {
        let bytes = fs::read(path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Append a block anchoring `root_hash` and persist the chain.
    ///
    /// On a failed write the block is dropped again, so memory never runs
    /// ahead of disk.
    pub fn anchor(&mut self, root_hash: Digest) -> Result<&Block, AnchorError> {
        let previous = self
            .blocks
            .last()
            .ok_or_else(|| AnchorError::Config("local chain has no genesis block".into()))?;
        let block = Block::seal(previous.index + 1, root_hash, previous.block_hash, Utc::now())
            .map_err(|e| AnchorError::Serialization(e.to_string()))?;

        self.blocks.push(block);
        if let Err(e) = self.flush() {
            self.blocks.pop();
            return Err(e);
        }

        let block = &self.blocks[self.blocks.len() - 1];
        debug!(index = block.index, root = %root_hash.short_hex(), "root anchored to local chain");
        Ok(block)
    }

    /// Whether `root_hash` has been anchored (linear scan).
    pub fn verify(&self, root_hash: &Digest) -> bool {
        self.find(root_hash).is_some()
    }

    /// The block anchoring `root_hash`, if any. Genesis never matches.
    pub fn find(&self, root_hash: &Digest) -> Option<&Block> {
        self.blocks
            .iter()
            .skip(1)
            .find(|b| b.root_hash == *root_hash)
    }

    /// Recompute every block hash and check linkage end-to-end.
    pub fn verify_chain_integrity(&self) -> bool {
        self.check_integrity().is_ok()
    }

    /// Like [`LocalChain::verify_chain_integrity`], reporting the first
    /// failure.
    pub fn check_integrity(&self) -> Result<(), ChainError> {
        if let Some(genesis) = self.blocks.first() {
            if !genesis.root_hash.is_null() {
                return Err(ChainError::HashMismatch { index: 0 });
            }
        }
        HashChainVerifier::verify_chain(&self.blocks)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), AnchorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(&self.blocks)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// [`AnchorBackend`] over a [`LocalChain`]. Always available; needs no
/// network.
pub struct LocalChainBackend {
    id: String,
    chain: Arc<Mutex<LocalChain>>,
}

impl LocalChainBackend {
    pub fn open(id: impl Into<String>, path: &Path) -> Result<Self, AnchorError> {
        Ok(Self {
            id: id.into(),
            chain: Arc::new(Mutex::new(LocalChain::open(path)?)),
        })
    }

    /// Shared handle to the underlying chain.
    pub fn chain(&self) -> Arc<Mutex<LocalChain>> {
        Arc::clone(&self.chain)
    }
}

#[async_trait]
impl AnchorBackend for LocalChainBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, payload: &AnchorPayload) -> Result<Submission, BackendError> {
        let chain = Arc::clone(&self.chain);
        let root = payload.root_hash;
        let block = tokio::task::spawn_blocking(move || {
            let mut chain = chain.lock().expect("local chain lock poisoned");
            chain.anchor(root).map(Block::clone)
        })
        .await
        .map_err(|e| BackendError::Chain(format!("anchor task failed: {e}")))?
        .map_err(|e| BackendError::Chain(e.to_string()))?;

        Ok(Submission {
            transaction_id: format!("{}:{}", block.index, block.block_hash),
            confirmed: true,
        })
    }

    async fn is_healthy(&self) -> bool {
        self.chain
            .lock()
            .expect("local chain lock poisoned")
            .path()
            .parent()
            .map_or(true, Path::exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("anchors").join("chain.json")
    }

    #[test]
    fn new_chain_has_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let chain = LocalChain::open(&chain_path(&dir)).unwrap();
        assert_eq!(chain.len(), 1);
        let genesis = &chain.blocks()[0];
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash.to_hex(), "0".repeat(64));
        assert!(genesis.root_hash.is_null());
        assert!(chain.verify_chain_integrity());
        assert!(chain_path(&dir).exists());
    }

    #[test]
    fn anchored_roots_verify_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let roots: Vec<Digest> = (0..5u8).map(|i| Digest::of(&[i])).collect();
        {
            let mut chain = LocalChain::open(&chain_path(&dir)).unwrap();
            for root in &roots {
                chain.anchor(*root).unwrap();
            }
        }

        let chain = LocalChain::open(&chain_path(&dir)).unwrap();
        assert_eq!(chain.len(), 6);
        assert!(chain.verify_chain_integrity());
        for root in &roots {
            assert!(chain.verify(root));
        }
        assert!(!chain.verify(&Digest::of(b"never anchored")));
        assert!(!chain.verify(&Digest::null()));
        assert_eq!(chain.head().unwrap().index, 5);
    }

    #[test]
    fn blocks_link_to_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = LocalChain::open(&chain_path(&dir)).unwrap();
        chain.anchor(Digest::of(b"a")).unwrap();
        chain.anchor(Digest::of(b"b")).unwrap();
        let blocks = chain.blocks();
        assert_eq!(blocks[1].previous_hash, blocks[0].block_hash);
        assert_eq!(blocks[2].previous_hash, blocks[1].block_hash);
    }

    #[test]
    fn tampering_with_any_block_breaks_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = LocalChain::open(&chain_path(&dir)).unwrap();
        for i in 0..4u8 {
            chain.anchor(Digest::of(&[i])).unwrap();
        }

        for target in 0..chain.len() {
            let mut tampered = LocalChain {
                path: chain.path().to_path_buf(),
                blocks: chain.blocks().to_vec(),
            };
            tampered.blocks[target].root_hash = Digest::of(b"forged");
            assert!(!tampered.verify_chain_integrity(), "block {target}");
        }
    }

    #[test]
    fn rehashed_forgery_still_breaks_linkage() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = LocalChain::open(&chain_path(&dir)).unwrap();
        chain.anchor(Digest::of(b"a")).unwrap();
        chain.anchor(Digest::of(b"b")).unwrap();

        chain.blocks[1].root_hash = Digest::of(b"forged");
        chain.blocks[1].block_hash = chain.blocks[1].compute_hash().unwrap();
        assert_eq!(
            chain.check_integrity(),
            Err(ChainError::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn tampered_file_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = chain_path(&dir);
        {
            let mut chain = LocalChain::open(&path).unwrap();
            chain.anchor(Digest::of(b"a")).unwrap();
        }

        let mut blocks = LocalChain::read_blocks(&path).unwrap();
        blocks[1].root_hash = Digest::of(b"forged");
        fs::write(&path, serde_json::to_vec(&blocks).unwrap()).unwrap();

        let err = LocalChain::open(&path).unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn backend_submits_to_chain() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalChainBackend::open("local", &chain_path(&dir)).unwrap();
        let root = Digest::of(b"batch-1");

        let submission = backend.submit(&AnchorPayload::new(root, 1)).await.unwrap();
        assert!(submission.confirmed);
        assert!(submission.transaction_id.starts_with("1:"));
        assert!(backend.is_healthy().await);

        let chain = backend.chain();
        assert!(chain.lock().unwrap().verify(&root));
    }
}
