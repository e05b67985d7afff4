//! Supervision state machine for one kind of entity.
//!
//! ```text
//! DOWN --start--> STARTUP --first alive--> RUNNING --expiry/fault--> DOWN --resume--> RUNNING
//! ```
use anyhow::Result;
use log::*;
use std::sync::Arc;

use super::alive::AliveTagService;
use super::commfault::CommFaultService;
use super::model::{SupervisedEntity, SupervisionEntity, SupervisionStatus};
use super::status_tag::StatusTagService;
use crate::cache::flow::CacheEvent;
use crate::cache::C2monCache;
use crate::error::Result as CacheResult;
use crate::listener::{CacheListener, ListenerId};
use crate::record::{Id, Timestamp};

pub struct SupervisedService {
    kind: SupervisionEntity,
    cache: Arc<C2monCache<SupervisedEntity>>,
    alive: Arc<AliveTagService>,
    comm_faults: Arc<CommFaultService>,
    status_tags: Arc<StatusTagService>,
}

impl SupervisedService {
    pub fn new(
        kind: SupervisionEntity,
        cache: Arc<C2monCache<SupervisedEntity>>,
        alive: Arc<AliveTagService>,
        comm_faults: Arc<CommFaultService>,
        status_tags: Arc<StatusTagService>,
    ) -> SupervisedService {
        SupervisedService {
            kind,
            cache,
            alive,
            comm_faults,
            status_tags,
        }
    }

    pub fn kind(&self) -> SupervisionEntity {
        self.kind
    }

    pub fn cache(&self) -> &Arc<C2monCache<SupervisedEntity>> {
        &self.cache
    }

    pub fn get_status(&self, id: Id) -> CacheResult<SupervisionStatus> {
        Ok(self.cache.get(id)?.supervision_status)
    }

    pub fn is_running(&self, id: Id) -> CacheResult<bool> {
        Ok(self.get_status(id)? == SupervisionStatus::Running)
    }

    pub fn is_uncertain(&self, id: Id) -> CacheResult<bool> {
        Ok(self.get_status(id)? == SupervisionStatus::Uncertain)
    }

    /// (Re)start the alive timer, then move to STARTUP unless already running.
    ///
    /// The timer goes first so the entity's own status is the last word on
    /// its status tag.
    pub fn start(&self, id: Id, timestamp: Timestamp) -> CacheResult<SupervisedEntity> {
        let alive_id = self.cache.get(id)?.alive_tag_id;
        if let Some(alive_id) = alive_id {
            self.start_alive(alive_id, timestamp);
        }

        let message = format!("{} started", self.kind);
        self.transition(id, |s| s != SupervisionStatus::Running, |entity| {
            entity.set_status(SupervisionStatus::Startup, timestamp, &message)
        })
    }

    /// stop the alive timer and go DOWN
    pub fn stop(&self, id: Id, timestamp: Timestamp) -> CacheResult<SupervisedEntity> {
        let alive_id = self.cache.get(id)?.alive_tag_id;
        if let Some(alive_id) = alive_id {
            if let Err(e) = self.alive.stop(alive_id, timestamp) {
                warn!("{} {}: could not stop alive timer {}: {}", self.kind, id, alive_id, e);
            }
        }

        let message = format!("{} stopped", self.kind);
        self.transition(id, |_| true, |entity| {
            entity.set_status(SupervisionStatus::Down, timestamp, &message)
        })
    }

    /// RUNNING, unless already RUNNING
    pub fn resume(&self, id: Id, timestamp: Timestamp, message: &str) -> CacheResult<SupervisedEntity> {
        self.transition(id, |s| s != SupervisionStatus::Running, |entity| {
            entity.set_status(SupervisionStatus::Running, timestamp, message)
        })
    }

    /// DOWN, only from RUNNING or UNCERTAIN
    pub fn suspend(&self, id: Id, timestamp: Timestamp, message: &str) -> CacheResult<SupervisedEntity> {
        self.transition(
            id,
            |s| s == SupervisionStatus::Running || s == SupervisionStatus::Uncertain,
            |entity| entity.set_status(SupervisionStatus::Down, timestamp, message),
        )
    }

    // apply `change` under the entity's transaction when `guard` allows it
    fn transition<G, C>(&self, id: Id, guard: G, change: C) -> CacheResult<SupervisedEntity>
    where
        G: FnOnce(SupervisionStatus) -> bool,
        C: FnOnce(&mut SupervisedEntity),
    {
        self.cache.execute_transaction(id, || {
            let mut entity = self.cache.get(id)?;
            if !guard(entity.supervision_status) {
                trace!("{} {}: no transition from {:?}", self.kind, id, entity.supervision_status);
                return Ok(entity);
            }

            let from = entity.supervision_status;
            change(&mut entity);
            debug!(
                "{} {}: {:?} -> {:?}",
                self.kind, id, from, entity.supervision_status
            );
            self.cache.put(id, entity)?;
            self.cache.get(id)
        })
    }

    fn start_alive(&self, alive_id: Id, timestamp: Timestamp) {
        if let Err(e) = self.alive.start(alive_id, timestamp) {
            warn!("{}: could not start alive timer {}: {}", self.kind, alive_id, e);
        }
    }

    /// Remove the entity together with its alive, comm fault and status tags.
    pub fn remove(&self, id: Id) -> CacheResult<bool> {
        let entity = match self.cache.get(id) {
            Ok(entity) => entity,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Some(alive_id) = entity.alive_tag_id {
            self.alive.cache().remove(alive_id)?;
        }
        if let Some(fault_id) = entity.comm_fault_tag_id {
            self.comm_faults.cache().remove(fault_id)?;
        }
        if let Some(status_id) = entity.status_tag_id {
            self.status_tags.cache().remove(status_id)?;
        }

        info!("{} {} removed", self.kind, id);
        self.cache.remove(id)
    }

    /// every supervision update refreshes the entity's status tag
    pub fn register_cascade(&self) -> ListenerId {
        let cascade = EntityCascade {
            status_tags: self.status_tags.clone(),
        };
        self.cache
            .register_listener(Arc::new(cascade), &[CacheEvent::SupervisionUpdate])
    }
}

struct EntityCascade {
    status_tags: Arc<StatusTagService>,
}

impl CacheListener<SupervisedEntity> for EntityCascade {
    fn on_event(&self, _event: CacheEvent, entity: SupervisedEntity) -> Result<()> {
        let timestamp = entity
            .status_time
            .or(entity.cache_timestamp)
            .unwrap_or_default();
        let description = entity.status_description.clone().unwrap_or_default();

        self.status_tags.update(
            entity.status_tag_id,
            entity.supervision_status,
            timestamp,
            &description,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::supervision::{Supervision, SupervisedEntity, SupervisionEntity, SupervisionStatus};
    use std::sync::Arc;

    fn supervision() -> Supervision {
        let supervision = Supervision::new(CacheConfig::default(), Arc::new(ManualClock::new(1_000)));
        let sub = SupervisedEntity::new(1, "S_SERVICE", SupervisionEntity::SubEquipment)
            .with_status_tag(2);
        supervision.configure(sub, 1_000).unwrap();
        supervision
    }

    #[test]
    fn uncertain_can_be_suspended() {
        let supervision = supervision();
        let service = &supervision.sub_equipments;
        assert!(service.is_uncertain(1).unwrap());

        let entity = service.suspend(1, 1_000, "lost").unwrap();
        assert_eq!(entity.supervision_status, SupervisionStatus::Down);
        assert_eq!(entity.status_description.as_deref(), Some("lost"));

        let status = supervision.status_tags.cache().get(2).unwrap();
        assert_eq!(status.status, SupervisionStatus::Down);
        assert_eq!(status.description.as_deref(), Some("lost"));
    }

    #[test]
    fn start_without_alive_tag() {
        let supervision = supervision();
        let service = &supervision.sub_equipments;

        let entity = service.start(1, 1_000).unwrap();
        assert_eq!(entity.supervision_status, SupervisionStatus::Startup);
        assert_eq!(entity.status_description.as_deref(), Some("SubEquipment started"));
    }

    #[test]
    fn unknown_entity() {
        let supervision = supervision();
        let service = &supervision.sub_equipments;
        assert!(service.get_status(9).unwrap_err().is_not_found());
        assert!(service.resume(9, 1_000, "x").unwrap_err().is_not_found());
        assert!(!service.remove(9).unwrap());
    }
}
