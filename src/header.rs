// Fixed-layout block header: the on-disk and on-wire record this whole
// store revolves around. Serialized form is exactly `HEADER_BYTES` long;
// anything else is structurally invalid.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{StoreError, StoreResult};

pub const HEADER_BYTES: usize = 112;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_block_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub claim_trie_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub block_height: u32,
}

impl Header {
    /// Serializes to the 112-byte on-disk layout. Integers are little-endian;
    /// hash fields are stored byte-reversed relative to their big-endian hex
    /// display form.
    pub fn serialize(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        let mut prev = self.prev_block_hash;
        prev.reverse();
        out[4..36].copy_from_slice(&prev);
        let mut merkle = self.merkle_root;
        merkle.reverse();
        out[36..68].copy_from_slice(&merkle);
        let mut claim = self.claim_trie_root;
        claim.reverse();
        out[68..100].copy_from_slice(&claim);
        out[100..104].copy_from_slice(&self.timestamp.to_le_bytes());
        out[104..108].copy_from_slice(&self.bits.to_le_bytes());
        out[108..112].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn deserialize(data: &[u8], height: u32) -> StoreResult<Self> {
        if data.len() != HEADER_BYTES {
            return Err(StoreError::InvalidHeader(format!(
                "expected {HEADER_BYTES} bytes, got {}",
                data.len()
            )));
        }
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&data[4..36]);
        prev.reverse();
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&data[36..68]);
        merkle.reverse();
        let mut claim = [0u8; 32];
        claim.copy_from_slice(&data[68..100]);
        claim.reverse();
        Ok(Header {
            version: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            prev_block_hash: prev,
            merkle_root: merkle,
            claim_trie_root: claim,
            timestamp: u32::from_le_bytes(data[100..104].try_into().unwrap()),
            bits: u32::from_le_bytes(data[104..108].try_into().unwrap()),
            nonce: u32::from_le_bytes(data[108..112].try_into().unwrap()),
            block_height: height,
        })
    }

    /// Returns whether this 112-byte record is the reserved "no header"
    /// sentinel (all zero bytes).
    pub fn is_null_record(data: &[u8]) -> bool {
        data.iter().all(|&b| b == 0)
    }
}

/// Double-SHA-256 identity hash, returned big-endian hex. The all-zero
/// sentinel hash used for height -1 / absent headers.
pub const NULL_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

pub fn hash_header(h: &Header) -> String {
    let bytes = h.serialize();
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    let mut reversed = second.to_vec();
    reversed.reverse();
    hex::encode(reversed)
}

/// Custom proof-of-work digest: SHA256d -> SHA512 -> split -> RIPEMD160 each
/// half -> SHA256d the concatenation. Distinct from `hash_header`, which is
/// the header's identity hash.
pub fn pow_hash(h: &Header) -> String {
    let bytes = h.serialize();
    let a = Sha256::digest(Sha256::digest(bytes));
    let b = Sha512::digest(a);
    let r1 = Ripemd160::digest(&b[0..32]);
    let r2 = Ripemd160::digest(&b[32..64]);
    let mut combined = Vec::with_capacity(40);
    combined.extend_from_slice(&r1);
    combined.extend_from_slice(&r2);
    let out = Sha256::digest(Sha256::digest(&combined));
    let mut reversed = out.to_vec();
    reversed.reverse();
    hex::encode(reversed)
}
