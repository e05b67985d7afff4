//! supervised entities and their control tags
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::flow::Supervised;
use crate::record::{Cacheable, Id, Timestamp};

/// the kind of a supervised entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupervisionEntity {
    Process,
    Equipment,
    SubEquipment,
}

impl fmt::Display for SupervisionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisionEntity::Process => "Process",
            SupervisionEntity::Equipment => "Equipment",
            SupervisionEntity::SubEquipment => "SubEquipment",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisionStatus {
    Down,
    Startup,
    Running,
    Stopped,
    #[default]
    Uncertain,
}

/// A Process, Equipment or SubEquipment. Only mutated through its service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisedEntity {
    pub id: Id,
    pub name: String,
    pub entity: SupervisionEntity,
    pub alive_tag_id: Option<Id>,
    /// processes never have one
    pub comm_fault_tag_id: Option<Id>,
    pub status_tag_id: Option<Id>,
    pub supervision_status: SupervisionStatus,
    pub status_time: Option<Timestamp>,
    pub status_description: Option<String>,
    pub cache_timestamp: Option<Timestamp>,
}

impl SupervisedEntity {
    pub fn new(id: Id, name: &str, entity: SupervisionEntity) -> SupervisedEntity {
        SupervisedEntity {
            id,
            name: name.to_string(),
            entity,
            alive_tag_id: None,
            comm_fault_tag_id: None,
            status_tag_id: None,
            supervision_status: SupervisionStatus::Uncertain,
            status_time: None,
            status_description: None,
            cache_timestamp: None,
        }
    }

    pub fn with_alive_tag(mut self, id: Id) -> Self {
        self.alive_tag_id = Some(id);
        self
    }

    pub fn with_comm_fault_tag(mut self, id: Id) -> Self {
        self.comm_fault_tag_id = Some(id);
        self
    }

    pub fn with_status_tag(mut self, id: Id) -> Self {
        self.status_tag_id = Some(id);
        self
    }

    pub(crate) fn set_status(&mut self, status: SupervisionStatus, timestamp: Timestamp, message: &str) {
        self.supervision_status = status;
        self.status_time = Some(timestamp);
        self.status_description = Some(message.to_string());
    }
}

impl Cacheable for SupervisedEntity {
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

impl Supervised for SupervisedEntity {
    fn is_running(&self) -> bool {
        self.supervision_status == SupervisionStatus::Running
    }
}

/// Heartbeat timer for a supervised entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliveTag {
    pub id: Id,
    pub supervised_id: Id,
    pub supervised_entity: SupervisionEntity,
    pub supervised_name: String,
    /// expected heartbeat period in millis
    pub alive_interval: i64,
    /// true while the timer is running
    pub value: bool,
    pub last_update: Option<Timestamp>,
    pub comm_fault_tag_id: Option<Id>,
    pub status_tag_id: Option<Id>,
    pub cache_timestamp: Option<Timestamp>,
}

impl AliveTag {
    pub fn new(id: Id, owner: &SupervisedEntity, alive_interval: i64) -> AliveTag {
        AliveTag {
            id,
            supervised_id: owner.id,
            supervised_entity: owner.entity,
            supervised_name: owner.name.clone(),
            alive_interval,
            value: false,
            last_update: None,
            comm_fault_tag_id: owner.comm_fault_tag_id,
            status_tag_id: owner.status_tag_id,
            cache_timestamp: None,
        }
    }

    /// Expired once more than 4/3 of the interval has passed since the last
    /// update. The extra third absorbs clock skew between DAQ and server.
    pub fn has_expired(&self, now: Timestamp) -> bool {
        match self.last_update {
            Some(last) => {
                let limit = self.alive_interval.saturating_add(self.alive_interval / 3);
                now.saturating_sub(last) > limit
            }
            None => false,
        }
    }
}

impl Cacheable for AliveTag {
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

impl Supervised for AliveTag {
    fn is_running(&self) -> bool {
        self.value
    }
}

/// Communication health of an Equipment or SubEquipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommFaultTag {
    pub id: Id,
    pub supervised_id: Id,
    pub supervised_entity: SupervisionEntity,
    /// the value that signals a fault
    pub fault_value: bool,
    pub value: Option<bool>,
    pub description: Option<String>,
    pub source_timestamp: Option<Timestamp>,
    pub status_tag_id: Option<Id>,
    pub cache_timestamp: Option<Timestamp>,
}

impl CommFaultTag {
    pub fn new(id: Id, owner: &SupervisedEntity) -> CommFaultTag {
        CommFaultTag {
            id,
            supervised_id: owner.id,
            supervised_entity: owner.entity,
            fault_value: false,
            value: None,
            description: None,
            source_timestamp: None,
            status_tag_id: owner.status_tag_id,
            cache_timestamp: None,
        }
    }

    pub fn is_fault(&self, value: bool) -> bool {
        value == self.fault_value
    }
}

impl Cacheable for CommFaultTag {
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

impl Supervised for CommFaultTag {
    fn is_running(&self) -> bool {
        match self.value {
            Some(value) => !self.is_fault(value),
            None => false,
        }
    }
}

/// The supervision status published to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTag {
    pub id: Id,
    pub supervised_id: Id,
    pub supervised_entity: SupervisionEntity,
    pub status: SupervisionStatus,
    pub status_time: Option<Timestamp>,
    pub description: Option<String>,
    pub cache_timestamp: Option<Timestamp>,
}

impl StatusTag {
    pub fn new(id: Id, owner: &SupervisedEntity) -> StatusTag {
        StatusTag {
            id,
            supervised_id: owner.id,
            supervised_entity: owner.entity,
            status: SupervisionStatus::Uncertain,
            status_time: None,
            description: None,
            cache_timestamp: None,
        }
    }
}

impl Cacheable for StatusTag {
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

impl Supervised for StatusTag {
    fn is_running(&self) -> bool {
        self.status == SupervisionStatus::Running
    }
}
