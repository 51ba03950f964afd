//! Primitive types for DPoVP chains.
//!
//! A DPoVP chain is produced by a rotating set of deputy nodes. This crate holds the data the
//! consensus core reasons about:
//! - [`Header`] and [`Block`], whose hash covers every header field except the miner's seal
//! - [`DeputyNode`], one validator of a term, and the merkle root of a deputy list
//! - [`SignData`], a recoverable secp256k1 signature attributable to a [`NodeId`]
//! - [`Transaction`] with its closed set of [`TxKind`]s

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod block;
mod change_log;
mod deputy;
mod merkle;
mod sign;
mod transaction;

pub use block::{Block, Header};
pub use change_log::{change_log_root, ChangeLog};
pub use deputy::{deputy_root, DeputyNode, DeputyNodes};
pub use merkle::{merkle_root, EMPTY_MERKLE_ROOT};
pub use sign::{node_id_from_public_key, sign_hash, NodeId, SignData, SignError, SIGNATURE_LENGTH};
pub use transaction::{
    tx_root, CandidateProfile, Transaction, TxDecodeError, TxKind, MAX_HOST_LENGTH,
};
