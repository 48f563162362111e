//! Posting-list records and their binary layout
//!
//! Format version 1, all integers little-endian:
//!
//! ListHeader (28 bytes):
//!   version u16 | flags u16 | list_id u32 | block_count u32 | record_count u64 | body_bytes u64
//!
//! Block record (20-byte header, then body):
//!   version u16 | flags u16 | block_id u32 | record_count u32 | body_size u32 | body_crc32 u32
//!
//! Keys are big-endian so ordered backends keep lists and blocks in id order:
//!   list header: b'L' | list_id
//!   block:       b'B' | list_id | block_id

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{FingerdbError, Result};

/// Posting list identifier (one list per fingerprint cluster)
pub type ListId = u32;

/// Block identifier, contiguous from 0 within a list
pub type BlockId = u32;

/// Current on-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// Encoded size of a [`ListHeader`]
pub const LIST_HEADER_LEN: usize = 28;

/// Encoded size of a [`BlockHeader`]
pub const BLOCK_HEADER_LEN: usize = 20;

/// Block flag: first block of its list
pub const BLOCK_FLAG_FIRST: u16 = 0x0001;

const LIST_KEY_TAG: u8 = b'L';
const BLOCK_KEY_TAG: u8 = b'B';

pub fn list_key(list_id: ListId) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = LIST_KEY_TAG;
    key[1..].copy_from_slice(&list_id.to_be_bytes());
    key
}

pub fn block_key(list_id: ListId, block_id: BlockId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = BLOCK_KEY_TAG;
    key[1..5].copy_from_slice(&list_id.to_be_bytes());
    key[5..].copy_from_slice(&block_id.to_be_bytes());
    key
}

/// Decode a list header key, `None` for any other record
pub fn parse_list_key(key: &[u8]) -> Option<ListId> {
    if key.len() != 5 || key[0] != LIST_KEY_TAG {
        return None;
    }
    let mut id = [0u8; 4];
    id.copy_from_slice(&key[1..]);
    Some(u32::from_be_bytes(id))
}

/// CRC32 of a block body
pub fn body_checksum(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(b)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn check_version(version: u16, what: &str) -> Result<()> {
    if version != FORMAT_VERSION {
        return Err(FingerdbError::Corruption(format!(
            "{} has format version {}, expected {}",
            what, version, FORMAT_VERSION
        )));
    }
    Ok(())
}

/// Per-list header with aggregate counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHeader {
    pub list_id: ListId,
    /// Number of blocks; blocks are numbered 0..block_count
    pub block_count: u32,
    /// Total records (postings) across all blocks
    pub record_count: u64,
    /// Total body bytes across all blocks
    pub body_bytes: u64,
}

impl ListHeader {
    /// Zero-valued header of a list that does not exist yet
    pub fn empty(list_id: ListId) -> Self {
        Self {
            list_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Id of the last block, if any
    pub fn last_block(&self) -> Option<BlockId> {
        self.block_count.checked_sub(1)
    }

    pub fn encode(&self) -> [u8; LIST_HEADER_LEN] {
        let mut buf = [0u8; LIST_HEADER_LEN];
        buf[0..2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // bytes 2..4: flags, none defined
        buf[4..8].copy_from_slice(&self.list_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.record_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.body_bytes.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != LIST_HEADER_LEN {
            return Err(FingerdbError::Corruption(format!(
                "list header is {} bytes, expected {}",
                buf.len(),
                LIST_HEADER_LEN
            )));
        }
        check_version(read_u16(buf, 0), "list header")?;
        Ok(Self {
            list_id: read_u32(buf, 4),
            block_count: read_u32(buf, 8),
            record_count: read_u64(buf, 12),
            body_bytes: read_u64(buf, 20),
        })
    }
}

/// Header stored in front of every block body
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub block_id: BlockId,
    pub record_count: u32,
    pub body_size: u32,
    pub flags: u16,
    pub body_crc: u32,
}

impl BlockHeader {
    /// Header describing `body` as block `block_id` holding `records` records
    pub fn for_body(block_id: BlockId, records: u32, body: &[u8]) -> Self {
        Self {
            block_id,
            record_count: records,
            body_size: body.len() as u32,
            flags: if block_id == 0 { BLOCK_FLAG_FIRST } else { 0 },
            body_crc: body_checksum(body),
        }
    }

    pub fn is_first(&self) -> bool {
        self.flags & BLOCK_FLAG_FIRST != 0
    }

    /// Account for `chunk` appended to the body
    pub fn extend(&mut self, chunk: &[u8], records: u32) {
        let mut hasher = Hasher::new_with_initial(self.body_crc);
        hasher.update(chunk);
        self.body_crc = hasher.finalize();
        self.body_size += chunk.len() as u32;
        self.record_count += records;
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut buf = [0u8; BLOCK_HEADER_LEN];
        buf[0..2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.record_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.body_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.body_crc.to_le_bytes());
        buf
    }

    /// Decode the header from the first bytes of a block record
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_LEN {
            return Err(FingerdbError::Corruption(format!(
                "block record is {} bytes, shorter than its header",
                buf.len()
            )));
        }
        check_version(read_u16(buf, 0), "block header")?;
        let header = Self {
            flags: read_u16(buf, 2),
            block_id: read_u32(buf, 4),
            record_count: read_u32(buf, 8),
            body_size: read_u32(buf, 12),
            body_crc: read_u32(buf, 16),
        };
        if header.is_first() != (header.block_id == 0) {
            return Err(FingerdbError::Corruption(format!(
                "block {} has first-block flag {}",
                header.block_id,
                header.is_first()
            )));
        }
        Ok(header)
    }
}

/// Serialize a block record
pub fn encode_block(header: &BlockHeader, body: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(BLOCK_HEADER_LEN + body.len());
    raw.extend_from_slice(&header.encode());
    raw.extend_from_slice(body);
    raw
}

/// A decoded block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    /// Present only on the first block of a list
    pub list_header: Option<ListHeader>,
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

impl Block {
    /// Sentinel for a block that does not exist yet
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.list_header.is_none() && self.header == BlockHeader::default() && self.body.is_empty()
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// Turn a raw block record into a block, validating size and checksum
    pub fn from_raw(raw: &[u8], list_header: Option<ListHeader>) -> Result<Self> {
        let header = BlockHeader::decode(raw)?;
        let body = &raw[BLOCK_HEADER_LEN..];
        if body.len() != header.body_size as usize {
            return Err(FingerdbError::Corruption(format!(
                "block {} declares {} body bytes, record holds {}",
                header.block_id,
                header.body_size,
                body.len()
            )));
        }
        if body_checksum(body) != header.body_crc {
            return Err(FingerdbError::Corruption(format!(
                "block {} body checksum mismatch",
                header.block_id
            )));
        }
        Ok(Self {
            list_header: if header.is_first() { list_header } else { None },
            header,
            body: body.to_vec(),
        })
    }
}
