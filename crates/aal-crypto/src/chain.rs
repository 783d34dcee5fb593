use aal_types::Digest;

use crate::hasher::HasherError;

/// Previous-hash sentinel carried by a genesis block (64 hex zeros).
pub const GENESIS_PREV_HASH: Digest = Digest::null();

/// A link in a hash chain.
pub trait ChainLink {
    /// Position of the link; the genesis link is 0.
    fn index(&self) -> u64;
    /// The link's stored hash.
    fn link_hash(&self) -> Digest;
    /// The stored hash of the preceding link ([`GENESIS_PREV_HASH`] for genesis).
    fn prev_hash(&self) -> Digest;
    /// Recompute the link hash from the link's own fields.
    fn compute_hash(&self) -> Result<Digest, HasherError>;
}

/// Hash chain integrity verifier.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Verify a chain of links end-to-end.
    ///
    /// Checks:
    /// 1. The first link is a genesis link (index 0, sentinel previous hash)
    /// 2. Indices are contiguous
    /// 3. Each link's stored hash matches the hash recomputed from its fields
    /// 4. Each link's previous hash matches the preceding link's hash
    pub fn verify_chain(links: &[impl ChainLink]) -> Result<(), ChainError> {
        let Some(genesis) = links.first() else {
            return Ok(());
        };
        if genesis.prev_hash() != GENESIS_PREV_HASH {
            return Err(ChainError::GenesisHasPrevHash);
        }

        for (position, link) in links.iter().enumerate() {
            let expected_index = position as u64;
            if link.index() != expected_index {
                return Err(ChainError::IndexGap {
                    expected: expected_index,
                    found: link.index(),
                });
            }

            let computed = link
                .compute_hash()
                .map_err(|e| ChainError::Serialization(e.to_string()))?;
            if computed != link.link_hash() {
                return Err(ChainError::HashMismatch {
                    index: expected_index,
                });
            }

            if position > 0 && link.prev_hash() != links[position - 1].link_hash() {
                return Err(ChainError::BrokenLink {
                    index: expected_index,
                });
            }
        }

        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("genesis block carries a previous hash other than the sentinel")]
    GenesisHasPrevHash,

    #[error("index gap: expected block {expected}, found {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("broken link at block {index}: previous hash does not match")]
    BrokenLink { index: u64 },

    #[error("hash mismatch at block {index}: computed hash differs from stored")]
    HashMismatch { index: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}
