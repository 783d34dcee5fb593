//! Foundation types for the Anchored Audit Ledger (AAL).
//!
//! Every other AAL crate depends on `aal-types`.
//!
//! # Key Types
//!
//! - [`Digest`]: 32-byte BLAKE3 hash (record hashes, Merkle nodes, roots)
//! - [`AnchorResult`]: outcome of one anchoring attempt against one backend
//! - [`AnchorStatus`]: pending / submitted / confirmed / failed

pub mod anchor;
pub mod digest;
pub mod error;

pub use anchor::{AnchorResult, AnchorStatus};
pub use digest::Digest;
pub use error::TypeError;
