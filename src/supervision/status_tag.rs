//! status tag updates: the end of every cascade
use log::*;
use std::sync::Arc;

use super::model::{StatusTag, SupervisionStatus};
use crate::cache::C2monCache;
use crate::record::{Id, Timestamp};

pub struct StatusTagService {
    cache: Arc<C2monCache<StatusTag>>,
}

impl StatusTagService {
    pub fn new(cache: Arc<C2monCache<StatusTag>>) -> StatusTagService {
        StatusTagService { cache }
    }

    pub fn cache(&self) -> &Arc<C2monCache<StatusTag>> {
        &self.cache
    }

    /// Set the status tag, if one is configured. Never fails: a missing tag
    /// is logged and skipped so the triggering write still commits.
    pub fn update(
        &self,
        id: Option<Id>,
        status: SupervisionStatus,
        timestamp: Timestamp,
        description: &str,
    ) -> bool {
        let id = match id {
            Some(id) => id,
            None => {
                warn!("no status tag configured, skipping update to {:?}", status);
                return false;
            }
        };

        let result = self.cache.compute(id, |tag| {
            tag.status = status;
            tag.status_time = Some(timestamp);
            tag.description = Some(description.to_string());
        });

        match result {
            Ok(_) => true,
            Err(e) if e.is_not_found() => {
                warn!("status tag {} not in cache, skipping update to {:?}", id, status);
                false
            }
            Err(e) => {
                error!("failed to update status tag {}: {}", id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::supervision::model::{SupervisedEntity, SupervisionEntity};

    #[test]
    fn update_and_skip() {
        let cache = Arc::new(C2monCache::new("statusTag", &CacheConfig::default()));
        let owner = SupervisedEntity::new(1, "P_TEST", SupervisionEntity::Process);
        cache.put(5, StatusTag::new(5, &owner)).unwrap();
        let service = StatusTagService::new(cache.clone());

        assert!(service.update(Some(5), SupervisionStatus::Running, 100, "up"));
        let tag = cache.get(5).unwrap();
        assert_eq!(tag.status, SupervisionStatus::Running);
        assert_eq!(tag.description.as_deref(), Some("up"));

        assert!(!service.update(None, SupervisionStatus::Down, 200, "down"));
        assert!(!service.update(Some(6), SupervisionStatus::Down, 200, "down"));
        assert_eq!(cache.get(5).unwrap().status, SupervisionStatus::Running);
    }
}
