//! comm fault tags and their cascade to the status tag
use anyhow::Result;
use log::*;
use std::sync::Arc;

use super::model::{CommFaultTag, SupervisionStatus};
use super::status_tag::StatusTagService;
use crate::cache::flow::{CacheEvent, Supervised};
use crate::cache::C2monCache;
use crate::listener::{CacheListener, ListenerId};
use crate::record::{Id, Timestamp};

pub struct CommFaultService {
    cache: Arc<C2monCache<CommFaultTag>>,
    status_tags: Arc<StatusTagService>,
}

impl CommFaultService {
    pub fn new(
        cache: Arc<C2monCache<CommFaultTag>>,
        status_tags: Arc<StatusTagService>,
    ) -> CommFaultService {
        CommFaultService { cache, status_tags }
    }

    pub fn cache(&self) -> &Arc<C2monCache<CommFaultTag>> {
        &self.cache
    }

    pub fn is_registered(&self, id: Id) -> bool {
        self.cache.contains_key(id)
    }

    /// Record the communication state. Returns false when the tag is not
    /// configured; never fails.
    pub fn update(&self, id: Option<Id>, running: bool, timestamp: Timestamp, description: &str) -> bool {
        let id = match id {
            Some(id) => id,
            None => {
                warn!("no comm fault tag configured, skipping update (running: {})", running);
                return false;
            }
        };

        let result = self.cache.compute(id, |tag| {
            tag.value = Some(if running { !tag.fault_value } else { tag.fault_value });
            tag.source_timestamp = Some(timestamp);
            tag.description = Some(description.to_string());
        });

        match result {
            Ok(_) => true,
            Err(e) if e.is_not_found() => {
                warn!("comm fault tag {} not in cache, skipping update", id);
                false
            }
            Err(e) => {
                error!("failed to update comm fault tag {}: {}", id, e);
                false
            }
        }
    }

    pub fn bring_up(&self, id: Option<Id>, timestamp: Timestamp, description: &str) -> bool {
        self.update(id, true, timestamp, description)
    }

    pub fn bring_down(&self, id: Option<Id>, timestamp: Timestamp, description: &str) -> bool {
        self.update(id, false, timestamp, description)
    }

    /// every accepted comm fault update refreshes the owner's status tag
    pub fn register_cascade(&self) -> ListenerId {
        let cascade = CommFaultCascade {
            status_tags: self.status_tags.clone(),
        };
        self.cache
            .register_listener(Arc::new(cascade), &[CacheEvent::UpdateAccepted])
    }
}

struct CommFaultCascade {
    status_tags: Arc<StatusTagService>,
}

impl CacheListener<CommFaultTag> for CommFaultCascade {
    fn on_event(&self, _event: CacheEvent, tag: CommFaultTag) -> Result<()> {
        let status = if tag.is_running() {
            SupervisionStatus::Running
        } else {
            SupervisionStatus::Down
        };
        let timestamp = tag.source_timestamp.or(tag.cache_timestamp).unwrap_or_default();
        let description = tag.description.clone().unwrap_or_default();

        self.status_tags
            .update(tag.status_tag_id, status, timestamp, &description);
        Ok(())
    }
}
