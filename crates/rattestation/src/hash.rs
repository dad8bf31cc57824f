//! Digest algorithm identification and computation.
//!
//! Measurement lists carry raw digests without an algorithm tag, so the
//! algorithm is recovered from the digest length. That mapping is lossy:
//! two algorithms with the same output length cannot be told apart.
//!
//! SHA-384 is recognised by [`size_to_algorithm`] but not yet supported by
//! [`algorithm_to_size`] or [`algorithm_to_string`].

use std::fmt;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::error;

/// SHA-1 output length in bytes.
pub const SHA1_DIGEST_LEN: usize = 20;

/// SHA-256 output length in bytes.
pub const SHA256_DIGEST_LEN: usize = 32;

/// SHA-384 output length in bytes.
pub const SHA384_DIGEST_LEN: usize = 48;

/// Digest algorithms known to the measurement code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha384,
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgo::Sha1 => write!(f, "SHA-1"),
            HashAlgo::Sha256 => write!(f, "SHA-256"),
            HashAlgo::Sha384 => write!(f, "SHA-384"),
        }
    }
}

/// Errors from the digest helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    /// The algorithm is known but not supported by this operation.
    #[error("hash algorithm not supported: {0}")]
    Unsupported(HashAlgo),
}

/// Canonical output length of `algo` in bytes.
pub fn algorithm_to_size(algo: HashAlgo) -> Result<usize, HashError> {
    match algo {
        HashAlgo::Sha1 => Ok(SHA1_DIGEST_LEN),
        HashAlgo::Sha256 => Ok(SHA256_DIGEST_LEN),
        HashAlgo::Sha384 => {
            error!(algo = %algo, "Hash algo not supported");
            Err(HashError::Unsupported(algo))
        }
    }
}

/// Algorithm whose output length equals `size`, or `None` if unknown.
pub fn size_to_algorithm(size: usize) -> Option<HashAlgo> {
    match size {
        SHA1_DIGEST_LEN => Some(HashAlgo::Sha1),
        SHA256_DIGEST_LEN => Some(HashAlgo::Sha256),
        SHA384_DIGEST_LEN => Some(HashAlgo::Sha384),
        _ => None,
    }
}

/// Canonical lowercase name of `algo`.
pub fn algorithm_to_string(algo: HashAlgo) -> Result<&'static str, HashError> {
    match algo {
        HashAlgo::Sha1 => Ok("sha1"),
        HashAlgo::Sha256 => Ok("sha256"),
        HashAlgo::Sha384 => {
            error!(algo = %algo, "Hash algo not supported");
            Err(HashError::Unsupported(algo))
        }
    }
}

/// SHA-1 digest of `data`.
pub fn compute_sha1(data: &[u8]) -> [u8; SHA1_DIGEST_LEN] {
    Sha1::digest(data).into()
}

/// SHA-256 digest of `data`.
pub fn compute_sha256(data: &[u8]) -> [u8; SHA256_DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// Digest of `data` with any supported algorithm.
pub fn compute(algo: HashAlgo, data: &[u8]) -> Result<Vec<u8>, HashError> {
    match algo {
        HashAlgo::Sha1 => Ok(compute_sha1(data).to_vec()),
        HashAlgo::Sha256 => Ok(compute_sha256(data).to_vec()),
        HashAlgo::Sha384 => Err(HashError::Unsupported(algo)),
    }
}
