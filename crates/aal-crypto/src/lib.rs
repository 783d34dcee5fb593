//! Cryptographic primitives for the Anchored Audit Ledger.
//!
//! Provides domain-separated BLAKE3 hashing, the binary Merkle tree used as
//! the batch accumulator (with inclusion proofs), and hash chain
//! verification for the local chain anchor.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod chain;
pub mod hasher;
pub mod merkle;

pub use chain::{ChainError, ChainLink, HashChainVerifier, GENESIS_PREV_HASH};
pub use hasher::{canonical_json, ContentHasher, HasherError};
pub use merkle::{verify_inclusion, MerkleProof, MerkleTree, Side};
