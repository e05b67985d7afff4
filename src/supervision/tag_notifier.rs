//! Supervision quality on data tags.
//!
//! The last step of every cascade: when a process, equipment or subequipment
//! is written as RUNNING, DOWN or STOPPED, each data tag attached to it is
//! copied, given a quality reflecting the current state of all its
//! supervising entities, and sent to the data tag listeners as a
//! `SupervisionChange`. The stored data tags are left untouched.
use anyhow::Result;
use log::*;
use std::sync::Arc;

use super::model::{SupervisedEntity, SupervisionEntity, SupervisionStatus};
use crate::cache::flow::CacheEvent;
use crate::cache::C2monCache;
use crate::listener::{CacheListener, ListenerId};
use crate::record::{Id, QualityStatus, TagQuality};
use crate::tag::DataTag;

pub struct SupervisionTagNotifier {
    data_tags: Arc<C2monCache<DataTag>>,
    processes: Arc<C2monCache<SupervisedEntity>>,
    equipments: Arc<C2monCache<SupervisedEntity>>,
    sub_equipments: Arc<C2monCache<SupervisedEntity>>,
}

impl SupervisionTagNotifier {
    pub fn new(
        data_tags: Arc<C2monCache<DataTag>>,
        processes: Arc<C2monCache<SupervisedEntity>>,
        equipments: Arc<C2monCache<SupervisedEntity>>,
        sub_equipments: Arc<C2monCache<SupervisedEntity>>,
    ) -> SupervisionTagNotifier {
        SupervisionTagNotifier {
            data_tags,
            processes,
            equipments,
            sub_equipments,
        }
    }

    /// Notify the data tag listeners for every tag attached to `entity`.
    /// Returns how many tags were notified.
    pub fn notify_entity(&self, entity: &SupervisedEntity) -> usize {
        match entity.supervision_status {
            SupervisionStatus::Running | SupervisionStatus::Down | SupervisionStatus::Stopped => (),
            _ => return 0,
        }

        let id = entity.id;
        let attached = match entity.entity {
            SupervisionEntity::Process => self.data_tags.query(|tag| tag.process_id == Some(id)),
            SupervisionEntity::Equipment => self.data_tags.query(|tag| tag.equipment_id == Some(id)),
            SupervisionEntity::SubEquipment => {
                self.data_tags.query(|tag| tag.sub_equipment_id == Some(id))
            }
        };

        for mut tag in attached.iter().cloned() {
            tag.quality = self.supervision_quality(&tag);
            self.data_tags
                .listeners()
                .notify(CacheEvent::SupervisionChange, &tag);
        }

        debug!(
            "{} {} is {:?}, notified {} data tag(s)",
            entity.entity,
            id,
            entity.supervision_status,
            attached.len()
        );
        attached.len()
    }

    /// The tag's quality given the current state of its process, equipment
    /// and subequipment. The first one not running wins.
    pub fn supervision_quality(&self, tag: &DataTag) -> TagQuality {
        let owners = [
            (&self.processes, tag.process_id, QualityStatus::ProcessDown),
            (&self.equipments, tag.equipment_id, QualityStatus::EquipmentDown),
            (&self.sub_equipments, tag.sub_equipment_id, QualityStatus::SubEquipmentDown),
        ];

        for (cache, id, down) in owners {
            if let Some(quality) = id.and_then(|id| down_quality(cache, id, down)) {
                return quality;
            }
        }

        if is_supervision_quality(tag.quality.status) {
            TagQuality::ok()
        } else {
            tag.quality.clone()
        }
    }

    /// react to every entity write on the three entity caches
    pub fn register(notifier: &Arc<SupervisionTagNotifier>) -> Vec<ListenerId> {
        [&notifier.processes, &notifier.equipments, &notifier.sub_equipments]
            .iter()
            .map(|cache| {
                let listener = EntityListener {
                    notifier: notifier.clone(),
                };
                cache.register_listener(Arc::new(listener), &[CacheEvent::SupervisionUpdate])
            })
            .collect()
    }
}

fn down_quality(
    cache: &C2monCache<SupervisedEntity>,
    id: Id,
    down: QualityStatus,
) -> Option<TagQuality> {
    let entity = match cache.get(id) {
        Ok(entity) => entity,
        Err(e) => {
            warn!("data tag supervision lookup failed: {}", e);
            return None;
        }
    };

    let state = match entity.supervision_status {
        SupervisionStatus::Down => "down",
        SupervisionStatus::Stopped => "stopped",
        _ => return None,
    };
    let reason = entity.status_description.unwrap_or_default();
    Some(TagQuality::invalid(
        down,
        &format!("{} {} is {}: {}", entity.entity, entity.name, state, reason),
    ))
}

fn is_supervision_quality(status: QualityStatus) -> bool {
    matches!(
        status,
        QualityStatus::ProcessDown | QualityStatus::EquipmentDown | QualityStatus::SubEquipmentDown
    )
}

struct EntityListener {
    notifier: Arc<SupervisionTagNotifier>,
}

impl CacheListener<SupervisedEntity> for EntityListener {
    fn on_event(&self, _event: CacheEvent, entity: SupervisedEntity) -> Result<()> {
        self.notifier.notify_entity(&entity);
        Ok(())
    }
}
