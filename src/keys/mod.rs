// This module owns the byte layout of everything written to the store.
//
// Primary records:
//
//   PROFILE_PREFIX (1) | profile id (12) | created-at nanos (8, BE) | instance id (*)
//
// Index entries, value always empty:
//
//   index kind (1) | index value (*) | created-at nanos (8, BE) | profile id (12)
//
// Index values are raw concatenations (service, service+type byte,
// service+label key+label value) with no separators. Nothing ever addresses a
// partial index value: the timestamp and id are found by counting back from
// the end of the key, which works because both have a fixed width. The
// big-endian timestamp makes byte order within one index value equal to
// chronological order.
//
// Without separators, distinct inputs can build the same label index value:
// service "ap" with label key "ie" collides with service "api" and key "e".

use crate::{
    id::{ProfileId, SIZE_OF_ID},
    profile::{Label, ProfileType},
};

pub const PROFILE_PREFIX: u8 = 1 << 7;

pub const TIMESTAMP_LEN: usize = 8;

pub const INDEX_SUFFIX_LEN: usize = TIMESTAMP_LEN + SIZE_OF_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexKind {
    Service = PROFILE_PREFIX | 1,
    ServiceType = PROFILE_PREFIX | 2,
    ServiceLabel = PROFILE_PREFIX | 3,
}

impl IndexKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            b if b == IndexKind::Service as u8 => Some(IndexKind::Service),
            b if b == IndexKind::ServiceType as u8 => Some(IndexKind::ServiceType),
            b if b == IndexKind::ServiceLabel as u8 => Some(IndexKind::ServiceLabel),
            _ => None,
        }
    }
}

// Appends fixed-width fields into a buffer sized up front.
#[derive(Debug)]
struct KeyWriter {
    buf: Vec<u8>,
}

impl KeyWriter {
    fn with_capacity(n: usize) -> Self {
        KeyWriter {
            buf: Vec::with_capacity(n),
        }
    }

    fn byte(&mut self, b: u8) -> &mut Self {
        self.buf.push(b);
        self
    }

    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    fn timestamp(&mut self, nanos: u64) -> &mut Self {
        self.buf.extend_from_slice(&nanos.to_be_bytes());
        self
    }

    fn id(&mut self, id: &ProfileId) -> &mut Self {
        self.buf.extend_from_slice(id.as_bytes());
        self
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

// Reads fixed-width fields off either end of a key.
struct KeyReader<'a> {
    rest: &'a [u8],
}

impl<'a> KeyReader<'a> {
    fn new(key: &'a [u8]) -> Self {
        KeyReader { rest: key }
    }

    fn front(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.rest.len() < n {
            return None;
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Some(head)
    }

    fn back(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.rest.len() < n {
            return None;
        }
        let (head, tail) = self.rest.split_at(self.rest.len() - n);
        self.rest = head;
        Some(tail)
    }

    fn rest(self) -> &'a [u8] {
        self.rest
    }
}

fn be_u64(b: &[u8]) -> u64 {
    let mut ts = [0_u8; TIMESTAMP_LEN];
    ts.copy_from_slice(b);
    u64::from_be_bytes(ts)
}

pub fn encode_primary_key(id: &ProfileId, created_at: u64, instance_id: &str) -> Vec<u8> {
    KeyWriter::with_capacity(1 + SIZE_OF_ID + TIMESTAMP_LEN + instance_id.len())
        .byte(PROFILE_PREFIX)
        .id(id)
        .timestamp(created_at)
        .bytes(instance_id.as_bytes())
        .finish()
}

// The part of a primary key a reader knows up front. Creation time and
// instance id are unknown, so lookups are prefix scans.
pub fn primary_key_prefix(id: &ProfileId) -> Vec<u8> {
    KeyWriter::with_capacity(1 + SIZE_OF_ID)
        .byte(PROFILE_PREFIX)
        .id(id)
        .finish()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub id: ProfileId,
    pub created_at: u64,
    pub instance_id: String,
}

impl PrimaryKey {
    pub fn encode(&self) -> Vec<u8> {
        encode_primary_key(&self.id, self.created_at, &self.instance_id)
    }

    pub fn decode(key: &[u8]) -> Option<Self> {
        let mut r = KeyReader::new(key);
        if r.front(1)? != [PROFILE_PREFIX] {
            return None;
        }
        let id = ProfileId::from_slice(r.front(SIZE_OF_ID)?)?;
        let created_at = be_u64(r.front(TIMESTAMP_LEN)?);
        let instance_id = String::from_utf8(r.rest().to_vec()).ok()?;
        Some(PrimaryKey {
            id,
            created_at,
            instance_id,
        })
    }
}

pub fn encode_index_key(
    kind: IndexKind,
    index_value: &[u8],
    created_at: u64,
    id: &ProfileId,
) -> Vec<u8> {
    KeyWriter::with_capacity(1 + index_value.len() + INDEX_SUFFIX_LEN)
        .byte(kind as u8)
        .bytes(index_value)
        .timestamp(created_at)
        .id(id)
        .finish()
}

// Callers guarantee `key` is a full index key (at least INDEX_SUFFIX_LEN
// bytes).
pub fn decode_created_at(key: &[u8]) -> u64 {
    let start = key.len() - INDEX_SUFFIX_LEN;
    be_u64(&key[start..start + TIMESTAMP_LEN])
}

pub fn id_from_index_key(key: &[u8]) -> ProfileId {
    let mut id = [0_u8; SIZE_OF_ID];
    id.copy_from_slice(&key[key.len() - SIZE_OF_ID..]);
    ProfileId::from_bytes(id)
}

// The decoded suffix of an index key. Field order gives the derived ordering
// (created_at, id), which is the order keys under one prefix are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    pub created_at: u64,
    pub id: ProfileId,
}

// Splits an index key into `kind | value` and its decoded suffix. Keys too
// short to carry a suffix give None.
pub fn split_index_key(key: &[u8]) -> Option<(&[u8], IndexEntry)> {
    let mut r = KeyReader::new(key);
    let id = ProfileId::from_slice(r.back(SIZE_OF_ID)?)?;
    let created_at = be_u64(r.back(TIMESTAMP_LEN)?);
    Some((r.rest(), IndexEntry { created_at, id }))
}

// `kind | index value`: everything in an index key before the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexPrefix {
    kind: IndexKind,
    buf: Vec<u8>,
}

impl IndexPrefix {
    pub fn new(kind: IndexKind, index_value: &[u8]) -> Self {
        let buf = KeyWriter::with_capacity(1 + index_value.len())
            .byte(kind as u8)
            .bytes(index_value)
            .finish();
        IndexPrefix { kind, buf }
    }

    pub fn service(service: &str) -> Self {
        Self::new(IndexKind::Service, service.as_bytes())
    }

    pub fn service_type(service: &str, profile_type: ProfileType) -> Self {
        let value = KeyWriter::with_capacity(service.len() + 1)
            .bytes(service.as_bytes())
            .byte(profile_type as u8)
            .finish();
        Self::new(IndexKind::ServiceType, &value)
    }

    pub fn service_label(service: &str, label: &Label) -> Self {
        let value = KeyWriter::with_capacity(service.len() + label.key.len() + label.value.len())
            .bytes(service.as_bytes())
            .bytes(label.key.as_bytes())
            .bytes(label.value.as_bytes())
            .finish();
        Self::new(IndexKind::ServiceLabel, &value)
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn index_value(&self) -> &[u8] {
        &self.buf[1..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn entry_key(&self, created_at: u64, id: &ProfileId) -> Vec<u8> {
        encode_index_key(self.kind, self.index_value(), created_at, id)
    }

    // Where a scan for entries created at or after `created_at` starts.
    pub fn seek_key(&self, created_at: u64) -> Vec<u8> {
        KeyWriter::with_capacity(self.buf.len() + TIMESTAMP_LEN)
            .bytes(&self.buf)
            .timestamp(created_at)
            .finish()
    }
}
