//! Alive timers.
//!
//! Every accepted alive tag update cascades one step: a process goes straight
//! to its status tag (processes have no comm fault tag), equipment and
//! subequipment go through their comm fault tag, which in turn updates the
//! status tag. Cascades only ever flow away from the alive tag.
use anyhow::Result;
use log::*;
use std::sync::Arc;

use super::commfault::CommFaultService;
use super::model::{AliveTag, SupervisionEntity, SupervisionStatus};
use super::status_tag::StatusTagService;
use crate::cache::flow::CacheEvent;
use crate::cache::C2monCache;
use crate::clock::Clock;
use crate::error::Result as CacheResult;
use crate::listener::{CacheListener, ListenerId};
use crate::record::{Id, Timestamp};

pub struct AliveTagService {
    cache: Arc<C2monCache<AliveTag>>,
    comm_faults: Arc<CommFaultService>,
    status_tags: Arc<StatusTagService>,
    clock: Arc<dyn Clock>,
}

impl AliveTagService {
    pub fn new(
        cache: Arc<C2monCache<AliveTag>>,
        comm_faults: Arc<CommFaultService>,
        status_tags: Arc<StatusTagService>,
        clock: Arc<dyn Clock>,
    ) -> AliveTagService {
        AliveTagService {
            cache,
            comm_faults,
            status_tags,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<C2monCache<AliveTag>> {
        &self.cache
    }

    pub fn is_registered(&self, id: Id) -> bool {
        self.cache.contains_key(id)
    }

    /// start (or restart) the timer from `timestamp`
    pub fn start(&self, id: Id, timestamp: Timestamp) -> CacheResult<AliveTag> {
        debug!("starting alive timer {}", id);
        self.cache.compute(id, |alive| {
            alive.value = true;
            alive.last_update = Some(timestamp);
        })
    }

    pub fn stop(&self, id: Id, timestamp: Timestamp) -> CacheResult<AliveTag> {
        debug!("stopping alive timer {}", id);
        self.cache.compute(id, |alive| {
            alive.value = false;
            alive.last_update = Some(timestamp);
        })
    }

    /// An alive was received: start the timer, or push its last update forward.
    /// A timestamp older than the last update never moves the timer back.
    pub fn start_or_update_timestamp(&self, id: Id, timestamp: Timestamp) -> CacheResult<AliveTag> {
        self.cache.compute(id, |alive| {
            alive.value = true;
            alive.last_update = Some(match alive.last_update {
                Some(last) if last > timestamp => last,
                _ => timestamp,
            });
        })
    }

    /// true once `now - lastUpdate > aliveInterval * 4/3`
    pub fn has_expired(&self, id: Id) -> CacheResult<bool> {
        let alive = self.cache.get(id)?;
        Ok(alive.has_expired(self.clock.now()))
    }

    /// running timers that have expired
    pub fn expired_timers(&self) -> Vec<AliveTag> {
        let now = self.clock.now();
        self.cache.query(|alive| alive.value && alive.has_expired(now))
    }

    pub fn active_timers(&self) -> Vec<AliveTag> {
        self.cache.query(|alive| alive.value)
    }

    /// stop every timer, e.g. on server shutdown
    pub fn stop_all(&self) -> usize {
        let now = self.clock.now();
        self.active_timers()
            .iter()
            .filter(|alive| self.stop(alive.id, now).is_ok())
            .count()
    }

    pub fn register_cascade(&self) -> ListenerId {
        let cascade = AliveTagCascade {
            comm_faults: self.comm_faults.clone(),
            status_tags: self.status_tags.clone(),
        };
        self.cache
            .register_listener(Arc::new(cascade), &[CacheEvent::UpdateAccepted])
    }
}

struct AliveTagCascade {
    comm_faults: Arc<CommFaultService>,
    status_tags: Arc<StatusTagService>,
}

impl CacheListener<AliveTag> for AliveTagCascade {
    fn on_event(&self, _event: CacheEvent, alive: AliveTag) -> Result<()> {
        let timestamp = alive.last_update.or(alive.cache_timestamp).unwrap_or_default();
        let description = if alive.value {
            format!("{} alive tag received", alive.supervised_entity)
        } else {
            format!("{} alive timer stopped", alive.supervised_entity)
        };

        match alive.supervised_entity {
            SupervisionEntity::Process => {
                let status = if alive.value {
                    SupervisionStatus::Running
                } else {
                    SupervisionStatus::Down
                };
                self.status_tags
                    .update(alive.status_tag_id, status, timestamp, &description);
            }
            SupervisionEntity::Equipment | SupervisionEntity::SubEquipment => {
                self.comm_faults
                    .update(alive.comm_fault_tag_id, alive.value, timestamp, &description);
            }
        }

        Ok(())
    }
}
