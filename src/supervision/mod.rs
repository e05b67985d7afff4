//! Supervision of processes, equipment and subequipment.
//!
//! The caches here are wired into a strict cascade:
//!
//! ```text
//! AliveTag --(process)--------------------> StatusTag
//! AliveTag --(equipment)--> CommFaultTag --> StatusTag
//! SupervisedEntity -----------------------> StatusTag
//! SupervisedEntity -----------------------> DataTag listeners (quality)
//! ```
//!
//! Each edge is a direct listener registered on the source cache, so one
//! accepted write runs its whole cascade before the writer returns.
pub mod alive;
pub mod checker;
pub mod commfault;
pub mod manager;
pub mod model;
pub mod service;
pub mod status_tag;
pub mod tag_notifier;

use log::*;
use std::sync::Arc;

use crate::cache::flow::SupervisionCacheFlow;
use crate::cache::C2monCache;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::tag::DataTagService;

pub use alive::AliveTagService;
pub use checker::AliveTimerChecker;
pub use commfault::CommFaultService;
pub use manager::SupervisionManager;
pub use model::{
    AliveTag, CommFaultTag, StatusTag, SupervisedEntity, SupervisionEntity, SupervisionStatus,
};
pub use service::SupervisedService;
pub use status_tag::StatusTagService;
pub use tag_notifier::SupervisionTagNotifier;

/// All supervision caches and services, with their cascades registered.
pub struct Supervision {
    pub config: CacheConfig,
    pub processes: Arc<SupervisedService>,
    pub equipments: Arc<SupervisedService>,
    pub sub_equipments: Arc<SupervisedService>,
    pub alive: Arc<AliveTagService>,
    pub comm_faults: Arc<CommFaultService>,
    pub status_tags: Arc<StatusTagService>,
    pub data_tags: Arc<DataTagService>,
    pub tag_notifier: Arc<SupervisionTagNotifier>,
    pub manager: Arc<SupervisionManager>,
}

impl Supervision {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Supervision {
        let status_cache = Arc::new(
            C2monCache::<StatusTag>::new("statusTag", &config)
                .with_flow(SupervisionCacheFlow::new())
                .with_clock(clock.clone()),
        );
        let fault_cache = Arc::new(
            C2monCache::<CommFaultTag>::new("commFaultTag", &config)
                .with_flow(SupervisionCacheFlow::new())
                .with_clock(clock.clone()),
        );
        let alive_cache = Arc::new(
            C2monCache::<AliveTag>::new("aliveTag", &config)
                .with_flow(SupervisionCacheFlow::new())
                .with_clock(clock.clone()),
        );

        let status_tags = Arc::new(StatusTagService::new(status_cache));
        let comm_faults = Arc::new(CommFaultService::new(fault_cache, status_tags.clone()));
        let alive = Arc::new(AliveTagService::new(
            alive_cache,
            comm_faults.clone(),
            status_tags.clone(),
            clock.clone(),
        ));

        let entity_service = |kind: SupervisionEntity, name: &str| {
            let cache = Arc::new(
                C2monCache::<SupervisedEntity>::new(name, &config)
                    .with_flow(SupervisionCacheFlow::new())
                    .with_clock(clock.clone()),
            );
            Arc::new(SupervisedService::new(
                kind,
                cache,
                alive.clone(),
                comm_faults.clone(),
                status_tags.clone(),
            ))
        };
        let processes = entity_service(SupervisionEntity::Process, "process");
        let equipments = entity_service(SupervisionEntity::Equipment, "equipment");
        let sub_equipments = entity_service(SupervisionEntity::SubEquipment, "subEquipment");

        let data_tags = Arc::new(DataTagService::new(Arc::new(
            DataTagService::create_cache(&config).with_clock(clock.clone()),
        )));
        let tag_notifier = Arc::new(SupervisionTagNotifier::new(
            data_tags.cache().clone(),
            processes.cache().clone(),
            equipments.cache().clone(),
            sub_equipments.cache().clone(),
        ));

        alive.register_cascade();
        comm_faults.register_cascade();
        processes.register_cascade();
        equipments.register_cascade();
        sub_equipments.register_cascade();
        SupervisionTagNotifier::register(&tag_notifier);

        let manager = Arc::new(SupervisionManager::new(
            processes.clone(),
            equipments.clone(),
            sub_equipments.clone(),
            alive.clone(),
            comm_faults.clone(),
            clock,
            config.supervision.alive_delay_factor,
        ));

        info!("supervision caches created and cascades registered");

        Supervision {
            config,
            processes,
            equipments,
            sub_equipments,
            alive,
            comm_faults,
            status_tags,
            data_tags,
            tag_notifier,
            manager,
        }
    }

    /// Add an entity with its control tags. The tags are created from the
    /// entity's configured ids; an entity without an alive tag id gets none.
    pub fn configure(&self, entity: SupervisedEntity, alive_interval: i64) -> crate::Result<()> {
        if let Some(status_id) = entity.status_tag_id {
            self.status_tags
                .cache()
                .put_quiet(status_id, StatusTag::new(status_id, &entity))?;
        }
        if let Some(fault_id) = entity.comm_fault_tag_id {
            self.comm_faults
                .cache()
                .put_quiet(fault_id, CommFaultTag::new(fault_id, &entity))?;
        }
        if let Some(alive_id) = entity.alive_tag_id {
            self.alive
                .cache()
                .put_quiet(alive_id, AliveTag::new(alive_id, &entity, alive_interval))?;
        }

        debug!("configured {} {} ({})", entity.entity, entity.id, entity.name);
        let service = self.manager.service_for(entity.entity);
        service.cache().put_quiet(entity.id, entity)?;
        Ok(())
    }

    /// start the periodic alive check
    pub fn start_checker(&self) -> AliveTimerChecker {
        AliveTimerChecker::start(
            self.manager.clone(),
            self.config.supervision.alive_check_interval(),
        )
    }

    /// shut down listener dispatch on every supervision cache
    pub fn close(&self) {
        self.alive.cache().close();
        self.comm_faults.cache().close();
        self.status_tags.cache().close();
        self.data_tags.cache().close();
        self.processes.cache().close();
        self.equipments.cache().close();
        self.sub_equipments.cache().close();
    }
}
