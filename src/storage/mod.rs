// Profile storage on top of an ordered key-value store.
//
// A write lays down one primary record holding the serialized payload plus
// a handful of empty-valued index entries, all in a single batch. Reads go
// through the indexes to collect ids and then fetch the primary records by
// id prefix.

use crate::{
    config::StoreConfig,
    error::{Error, Result},
    id::{IdGenerator, ProfileId},
    index::{self, FindProfilesRequest},
    keys::{encode_primary_key, primary_key_prefix, IndexPrefix},
    kv::{IterOptions, KVIter, KvStore, Snapshot, WriteBatch},
    profile::{Profile, ProfileMeta, ProfileType},
};


pub struct Storage<S, G> {
    store: S,
    ids: G,
    config: StoreConfig,
}

impl<S, G> Storage<S, G>
where
    S: KvStore,
    G: IdGenerator,
{
    pub fn new(store: S, ids: G, config: StoreConfig) -> Self {
        Storage { store, ids, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn write_profile<P: Profile>(
        &self,
        profile_type: ProfileType,
        meta: &ProfileMeta,
        profile: &P,
    ) -> Result<ProfileId> {
        let data = profile
            .encode()
            .map_err(|e| Error::encoding(format!("{} profile for {}", profile_type, meta.service), e))?;
        let created_at = profile.time_nanos();
        let pid = self.ids.next_id();
        let ttl = self.config.entry_ttl();

        let mut batch = WriteBatch::with_capacity(3 + meta.labels.len());
        batch.set(
            encode_primary_key(&pid, created_at, &meta.instance_id),
            data,
            ttl,
        );
        batch.set(
            IndexPrefix::service(&meta.service).entry_key(created_at, &pid),
            Vec::new(),
            ttl,
        );
        batch.set(
            IndexPrefix::service_type(&meta.service, profile_type).entry_key(created_at, &pid),
            Vec::new(),
            ttl,
        );
        for label in &meta.labels {
            batch.set(
                IndexPrefix::service_label(&meta.service, label).entry_key(created_at, &pid),
                Vec::new(),
                ttl,
            );
        }

        for entry in batch.entries() {
            tracing::debug!(
                pid = %pid,
                key = ?entry.key,
                ttl = ?entry.ttl,
                "set entry"
            );
        }

        self.store
            .commit(batch)
            .map_err(|e| Error::store(format!("writing profile {}", pid), e))?;
        Ok(pid)
    }

    pub fn find_profile_ids(&self, req: &FindProfilesRequest) -> Result<Vec<ProfileId>> {
        let snapshot = self.snapshot("finding profiles")?;
        let found = index::find(&snapshot, req)?;
        Ok(found.into_iter().map(|e| e.id).collect())
    }

    // Every record stored under each id, in the order the ids are given. Ids
    // with no (or only expired) records are skipped; it's an error only if
    // none of them had any.
    pub fn get_profiles<P: Profile>(&self, ids: &[ProfileId]) -> Result<Vec<P>> {
        let snapshot = self.snapshot("reading profiles")?;
        let mut profiles = Vec::with_capacity(ids.len());
        for pid in ids {
            let prefix = primary_key_prefix(pid);
            tracing::debug!(pid = %pid, "looking up profile");

            let mut iter = snapshot
                .iter(IterOptions::default())
                .map_err(|e| Error::store(format!("reading profile {}", pid), e))?;
            iter.seek_ge(&prefix);
            while let Some((key, value)) = iter.next() {
                if !key.starts_with(&prefix) {
                    break;
                }
                let profile = P::decode(value)
                    .map_err(|e| Error::encoding(format!("profile {}", pid), e))?;
                profiles.push(profile);
            }
        }

        if profiles.is_empty() {
            let ids: Vec<String> = ids.iter().map(ProfileId::to_string).collect();
            return Err(Error::NotFound(format!(
                "no profiles stored under [{}]",
                ids.join(", ")
            )));
        }
        Ok(profiles)
    }

    pub fn get_profile<P: Profile>(&self, pid: &ProfileId) -> Result<P> {
        let mut profiles = self.get_profiles(std::slice::from_ref(pid))?;
        // Zero records is already NotFound from get_profiles.
        if profiles.len() > 1 {
            return Err(Error::Ambiguous {
                id: *pid,
                count: profiles.len(),
            });
        }
        Ok(profiles.remove(0))
    }

    pub fn find_profiles<P: Profile>(&self, req: &FindProfilesRequest) -> Result<Vec<P>> {
        let ids = self.find_profile_ids(req)?;
        self.get_profiles(&ids)
    }

    // All matching profiles combined into one.
    pub fn find_profile<P: Profile>(&self, req: &FindProfilesRequest) -> Result<P> {
        let profiles: Vec<P> = self.find_profiles(req)?;
        let count = profiles.len();
        P::merge(profiles).map_err(|source| Error::Merge { count, source })
    }

    fn snapshot(&self, context: &str) -> Result<S::Snapshot> {
        self.store
            .snapshot()
            .map_err(|e| Error::store(context, e))
    }
}
