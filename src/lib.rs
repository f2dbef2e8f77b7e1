// Profile storage on an ordered key-value store.
//
// Profiles are written once, as a primary record plus secondary index
// entries (by service, by service and type, by service and label) committed
// in one atomic batch. Queries scan the relevant indexes over a creation time
// range in a single snapshot, intersect the results, and then load the
// payloads by id.

pub mod config;
pub mod error;
pub mod id;
pub mod index;
pub mod keys;
pub mod kv;
pub mod profile;
pub mod storage;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use id::{IdGenerator, ProfileId, SequentialIds, XidGenerator};
pub use index::FindProfilesRequest;
pub use kv::{KvStore, MemStore};
pub use profile::{Label, Labels, Profile, ProfileMeta, ProfileType, SampleProfile};
pub use storage::Storage;
