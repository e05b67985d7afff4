//! data tags: the plain value records fed by DAQ updates
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::flow::DefaultCacheFlow;
use crate::cache::C2monCache;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::record::{Cacheable, Id, RawUpdate, TagQuality, TagValue, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTag {
    pub id: Id,
    pub name: String,
    pub value: Option<TagValue>,
    pub quality: TagQuality,
    pub source_timestamp: Option<Timestamp>,
    pub daq_timestamp: Option<Timestamp>,
    pub cache_timestamp: Option<Timestamp>,
    /// the entities whose supervision state qualifies this tag
    #[serde(default)]
    pub process_id: Option<Id>,
    #[serde(default)]
    pub equipment_id: Option<Id>,
    #[serde(default)]
    pub sub_equipment_id: Option<Id>,
}

impl DataTag {
    pub fn new(id: Id, name: &str) -> DataTag {
        DataTag {
            id,
            name: name.to_string(),
            value: None,
            quality: TagQuality::ok(),
            source_timestamp: None,
            daq_timestamp: None,
            cache_timestamp: None,
            process_id: None,
            equipment_id: None,
            sub_equipment_id: None,
        }
    }

    pub fn with_process(mut self, id: Id) -> Self {
        self.process_id = Some(id);
        self
    }

    pub fn with_equipment(mut self, id: Id) -> Self {
        self.equipment_id = Some(id);
        self
    }

    pub fn with_sub_equipment(mut self, id: Id) -> Self {
        self.sub_equipment_id = Some(id);
        self
    }

    fn apply(&mut self, raw: &RawUpdate) {
        self.value = Some(raw.value.clone());
        self.quality = raw.quality.clone();
        self.source_timestamp = raw.source_timestamp;
        self.daq_timestamp = raw.daq_timestamp;
    }
}

impl Cacheable for DataTag {
    fn id(&self) -> Id {
        self.id
    }

    fn cache_timestamp(&self) -> Option<Timestamp> {
        self.cache_timestamp
    }

    fn set_cache_timestamp(&mut self, timestamp: Timestamp) {
        self.cache_timestamp = Some(timestamp);
    }
}

/// Only a source timestamp that is not older than the stored one replaces a value.
pub fn source_timestamp_flow() -> DefaultCacheFlow<DataTag> {
    DefaultCacheFlow::with_ordering(|old: &DataTag, new: &DataTag| {
        match (old.source_timestamp, new.source_timestamp) {
            (Some(old_ts), Some(new_ts)) => new_ts >= old_ts,
            _ => true,
        }
    })
}

pub struct DataTagService {
    cache: Arc<C2monCache<DataTag>>,
}

impl DataTagService {
    pub fn new(cache: Arc<C2monCache<DataTag>>) -> DataTagService {
        DataTagService { cache }
    }

    /// a data tag cache using the source-timestamp ordering
    pub fn create_cache(config: &CacheConfig) -> C2monCache<DataTag> {
        C2monCache::new("dataTag", config).with_flow(source_timestamp_flow())
    }

    pub fn cache(&self) -> &Arc<C2monCache<DataTag>> {
        &self.cache
    }

    /// Apply a raw DAQ value to the configured tag `id`.
    ///
    /// Returns whether the update was accepted; an unknown tag is `NotFound`.
    pub fn apply_update(&self, id: Id, raw: &RawUpdate) -> Result<bool> {
        self.cache.execute_transaction(id, || {
            let mut tag = self.cache.get(id)?;
            tag.apply(raw);
            let accepted = self.cache.put(id, tag)?;
            if !accepted {
                debug!(
                    "discarded out of order value for tag {} (source time {:?})",
                    id, raw.source_timestamp
                );
            }
            Ok(accepted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> DataTagService {
        let cache = Arc::new(DataTagService::create_cache(&CacheConfig::default()));
        cache.put_quiet(1, DataTag::new(1, "temperature")).unwrap();
        DataTagService::new(cache)
    }

    #[test]
    fn applies_newer_values() {
        let service = service();

        let raw = RawUpdate::new(1, TagValue::Float(21.5), 1_000);
        assert!(service.apply_update(1, &raw).unwrap());

        let raw = RawUpdate::new(1, TagValue::Float(22.0), 2_000);
        assert!(service.apply_update(1, &raw).unwrap());

        let tag = service.cache().get(1).unwrap();
        assert_eq!(tag.value, Some(TagValue::Float(22.0)));
        assert_eq!(tag.source_timestamp, Some(2_000));
    }

    #[test]
    fn rejects_older_source_time() {
        let service = service();
        assert!(service
            .apply_update(1, &RawUpdate::new(1, TagValue::Int(5), 2_000))
            .unwrap());
        assert!(!service
            .apply_update(1, &RawUpdate::new(1, TagValue::Int(4), 1_000))
            .unwrap());

        assert_eq!(service.cache().get(1).unwrap().value, Some(TagValue::Int(5)));
    }

    #[test]
    fn unknown_tag() {
        let service = service();
        let raw = RawUpdate::new(9, TagValue::Bool(true), 1);
        assert!(service.apply_update(9, &raw).unwrap_err().is_not_found());
        assert!(!service.cache().contains_key(9));
    }
}
