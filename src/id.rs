use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;

use crate::error::Error;

// Layout follows xid: 4 bytes of unix seconds, 3 bytes of machine id, 2 bytes
// of pid and a 3 byte counter, all big-endian. Comparing two ids byte-wise
// orders them by the second they were generated in.
pub const SIZE_OF_ID: usize = 12;

const ENCODED_LEN: usize = 20;
const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProfileId([u8; SIZE_OF_ID]);

impl ProfileId {
    pub const fn from_bytes(bytes: [u8; SIZE_OF_ID]) -> Self {
        ProfileId(bytes)
    }

    // Callers hand in exactly SIZE_OF_ID bytes, normally the tail of a key.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; SIZE_OF_ID] = bytes.try_into().ok()?;
        Some(ProfileId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIZE_OF_ID] {
        &self.0
    }
}

impl AsRef<[u8]> for ProfileId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// base32hex without padding, lowercase.
impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0_u8; ENCODED_LEN];
        let mut acc: u32 = 0;
        let mut bits = 0;
        let mut n = 0;
        for b in self.0 {
            acc = (acc << 8) | b as u32;
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out[n] = ALPHABET[((acc >> bits) & 0x1f) as usize];
                n += 1;
            }
        }
        if bits > 0 {
            out[n] = ALPHABET[((acc << (5 - bits)) & 0x1f) as usize];
        }
        // The alphabet is ascii, so this never fails.
        f.write_str(std::str::from_utf8(&out).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileId({})", self)
    }
}

impl FromStr for ProfileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(Error::InvalidRequest(format!(
                "profile id {:?} must be {} characters",
                s, ENCODED_LEN
            )));
        }
        let mut out = [0_u8; SIZE_OF_ID];
        let mut acc: u32 = 0;
        let mut bits = 0;
        let mut n = 0;
        for ch in s.bytes() {
            let v = match ch {
                b'0'..=b'9' => ch - b'0',
                b'a'..=b'v' => ch - b'a' + 10,
                b'A'..=b'V' => ch - b'A' + 10,
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "invalid character {:?} in profile id {:?}",
                        ch as char, s
                    )))
                }
            };
            acc = (acc << 5) | v as u32;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                if n == SIZE_OF_ID {
                    break;
                }
                out[n] = (acc >> bits) as u8;
                n += 1;
            }
        }
        // 20 characters carry 100 bits; the 4 trailing pad bits must be zero
        // or two strings would decode to the same id.
        if acc & ((1 << bits) - 1) != 0 {
            return Err(Error::InvalidRequest(format!(
                "profile id {:?} has non-canonical padding",
                s
            )));
        }
        Ok(ProfileId(out))
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> ProfileId;
}

#[derive(Debug)]
pub struct XidGenerator {
    machine: [u8; 3],
    pid: u16,
    counter: AtomicU32,
}

impl XidGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        XidGenerator {
            machine: rng.gen(),
            pid: std::process::id() as u16,
            counter: AtomicU32::new(rng.gen()),
        }
    }

    fn generate_at(&self, unix_secs: u32) -> ProfileId {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut id = [0_u8; SIZE_OF_ID];
        id[0..4].copy_from_slice(&unix_secs.to_be_bytes());
        id[4..7].copy_from_slice(&self.machine);
        id[7..9].copy_from_slice(&self.pid.to_be_bytes());
        id[9..12].copy_from_slice(&count.to_be_bytes()[1..]);
        ProfileId(id)
    }
}

impl Default for XidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for XidGenerator {
    fn next_id(&self) -> ProfileId {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.generate_at(secs as u32)
    }
}

// Hands out 1, 2, 3, ... in the low 8 bytes. Useful wherever ids have to be
// predictable.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        SequentialIds {
            next: AtomicU64::new(first),
        }
    }

    pub fn id(n: u64) -> ProfileId {
        let mut id = [0_u8; SIZE_OF_ID];
        id[4..].copy_from_slice(&n.to_be_bytes());
        ProfileId(id)
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> ProfileId {
        Self::id(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
