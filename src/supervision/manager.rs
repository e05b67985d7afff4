//! Entry point for control tag values and alive timer expiry.
use log::*;
use std::sync::Arc;

use super::alive::AliveTagService;
use super::commfault::CommFaultService;
use super::model::SupervisionEntity;
use super::service::SupervisedService;
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::record::{Id, RawUpdate, Timestamp};

pub struct SupervisionManager {
    processes: Arc<SupervisedService>,
    equipments: Arc<SupervisedService>,
    sub_equipments: Arc<SupervisedService>,
    alive: Arc<AliveTagService>,
    comm_faults: Arc<CommFaultService>,
    clock: Arc<dyn Clock>,
    alive_delay_factor: i64,
}

impl SupervisionManager {
    pub fn new(
        processes: Arc<SupervisedService>,
        equipments: Arc<SupervisedService>,
        sub_equipments: Arc<SupervisedService>,
        alive: Arc<AliveTagService>,
        comm_faults: Arc<CommFaultService>,
        clock: Arc<dyn Clock>,
        alive_delay_factor: i64,
    ) -> SupervisionManager {
        SupervisionManager {
            processes,
            equipments,
            sub_equipments,
            alive,
            comm_faults,
            clock,
            alive_delay_factor,
        }
    }

    pub fn service_for(&self, kind: SupervisionEntity) -> &Arc<SupervisedService> {
        match kind {
            SupervisionEntity::Process => &self.processes,
            SupervisionEntity::Equipment => &self.equipments,
            SupervisionEntity::SubEquipment => &self.sub_equipments,
        }
    }

    /// Route a control tag value to alive or comm fault handling.
    ///
    /// Returns whether the value was acted on; a delayed alive returns false.
    pub fn process_control_tag(&self, raw: &RawUpdate) -> Result<bool> {
        debug!("incoming update for control tag {} (value {})", raw.id, raw.value);

        if self.alive.is_registered(raw.id) {
            self.handle_alive(raw)
        } else if self.comm_faults.is_registered(raw.id) {
            self.handle_comm_fault(raw)
        } else {
            error!("control tag {} is neither an alive nor a comm fault tag", raw.id);
            Err(CacheError::not_found("controlTag", raw.id))
        }
    }

    fn effective_timestamp(&self, raw: &RawUpdate) -> Timestamp {
        raw.effective_timestamp().unwrap_or_else(|| self.clock.now())
    }

    fn handle_alive(&self, raw: &RawUpdate) -> Result<bool> {
        let alive = self.alive.cache().get(raw.id)?;
        let timestamp = self.effective_timestamp(raw);

        let delay = self.clock.now().saturating_sub(timestamp);
        if delay > self.alive_delay_factor.saturating_mul(alive.alive_interval) {
            debug!(
                "rejecting alive {} of {} as delayed arrival at server",
                raw.id, alive.supervised_name
            );
            return Ok(false);
        }

        self.alive.start_or_update_timestamp(raw.id, timestamp)?;

        let message = format!("{} alive tag received", alive.supervised_entity);
        self.service_for(alive.supervised_entity)
            .resume(alive.supervised_id, timestamp, &message)?;
        Ok(true)
    }

    fn handle_comm_fault(&self, raw: &RawUpdate) -> Result<bool> {
        let fault = self.comm_faults.cache().get(raw.id)?;
        let timestamp = self.effective_timestamp(raw);
        let service = self.service_for(fault.supervised_entity);

        let faulty = match raw.value.as_bool() {
            Some(value) => fault.is_fault(value),
            None => {
                warn!("comm fault tag {} received non boolean value {}", raw.id, raw.value);
                true
            }
        };

        if faulty {
            let message = format!("{} comm fault tag indicates a fault (value {})", fault.supervised_entity, raw.value);
            self.comm_faults.bring_down(Some(raw.id), timestamp, &message);
            service.suspend(fault.supervised_id, timestamp, &message)?;
        } else {
            let message = format!("{} comm fault tag indicates no fault (value {})", fault.supervised_entity, raw.value);
            self.comm_faults.bring_up(Some(raw.id), timestamp, &message);
            service.resume(fault.supervised_id, timestamp, &message)?;
        }
        Ok(true)
    }

    /// Stop the expired timer and suspend its owner.
    pub fn on_alive_expiration(&self, alive_id: Id) -> Result<()> {
        let now = self.clock.now();
        let alive = self.alive.stop(alive_id, now)?;

        info!(
            "alive timer {} of {} {} expired",
            alive_id, alive.supervised_entity, alive.supervised_name
        );
        self.service_for(alive.supervised_entity)
            .suspend(alive.supervised_id, now, "Alive timer expired")?;
        Ok(())
    }

    /// Expire every running timer past its deadline; returns how many expired.
    pub fn check_alive_timers(&self) -> usize {
        let expired = self.alive.expired_timers();
        let mut count = 0;
        for alive in expired {
            match self.on_alive_expiration(alive.id) {
                Ok(()) => count += 1,
                Err(e) => error!("failed to expire alive timer {}: {}", alive.id, e),
            }
        }
        count
    }
}
