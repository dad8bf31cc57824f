//! rattestation: Measurement helpers for remote attestation.
//!
//! Currently provides the digest algorithm helpers used to interpret and
//! produce measurement values.

pub mod hash;

pub use hash::{
    HashAlgo, HashError, SHA1_DIGEST_LEN, SHA256_DIGEST_LEN, SHA384_DIGEST_LEN,
    algorithm_to_size, algorithm_to_string, compute, compute_sha1, compute_sha256,
    size_to_algorithm,
};
