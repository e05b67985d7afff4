//! Background alive timer checks.
//!
//! The checker owns one async-std task that expires alive timers on every
//! tick and answers `Check`, `Status` and `Shutdown` commands. Checks take
//! cache locks, so they run on the blocking pool.
use async_channel::{bounded, Receiver, Sender};
use async_std::future;
use async_std::task;
use domain_keys::keys::RouteKey;
use log::*;
use serde::{Deserialize, Serialize};
use service_uptime::Uptime;
use std::sync::Arc;
use std::time::Duration;

use super::manager::SupervisionManager;
use crate::status::{to_json, JsonString, OK};

#[derive(Debug, Clone)]
pub enum Command {
    Check(Sender<usize>), // run a check now, reply with the number expired
    Status(Sender<JsonString>), // request the checker's status
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerStatus {
    pub checker_id: String,
    pub status: String,
    pub uptime: String,
    pub checks: u64,
    pub expired: u64,
    pub error_count: u16,
}

async fn run_check(manager: &Arc<SupervisionManager>) -> usize {
    let manager = manager.clone();
    task::spawn_blocking(move || manager.check_alive_timers()).await
}

// the handler loop: checks on every tick and on request
pub async fn handler(
    id: String,
    manager: Arc<SupervisionManager>,
    interval: Duration,
    rx: Receiver<Command>,
) -> anyhow::Result<()> {
    let uptime = Uptime::new();
    let mut checks = 0u64;
    let mut expired = 0u64;
    let mut error_count = 0u16;

    loop {
        let cmd = match future::timeout(interval, rx.recv()).await {
            Err(_) => {
                checks += 1;
                expired += run_check(&manager).await as u64;
                continue;
            }
            Ok(Err(_)) => break,
            Ok(Ok(cmd)) => cmd,
        };

        debug!("recv cmd: {:?}", cmd);
        match cmd {
            Command::Check(tx) => {
                checks += 1;
                let count = run_check(&manager).await;
                expired += count as u64;
                if tx.send(count).await.is_err() {
                    error_count += 1;
                    error!("error returning check count to channel: {:?}", tx);
                }
            }
            Command::Status(tx) => {
                let status = CheckerStatus {
                    checker_id: id.to_string(),
                    status: OK.to_string(),
                    uptime: uptime.to_string(),
                    checks,
                    expired,
                    error_count,
                };

                let msg = to_json(&status);
                info!("status response: {}", msg);
                if tx.send(msg).await.is_err() {
                    error_count += 1;
                    error!("error returning status to channel: {:?}", tx);
                }
            }
            Command::Shutdown => {
                info!("alive checker id: {} shutting down after {} checks", id, checks);
                break;
            }
        }
    }

    rx.close();

    Ok(())
}

/// Periodically expires alive timers on a background task.
#[derive(Debug, Clone)]
pub struct AliveTimerChecker {
    id: String,
    uptime: Uptime,
    request_tx: Sender<Command>,
}

impl AliveTimerChecker {
    /// create and start a new checker.
    pub fn start(manager: Arc<SupervisionManager>, interval: Duration) -> AliveTimerChecker {
        let uptime = Uptime::new();
        let id = RouteKey::create();
        let cid = id.clone();

        info!("starting alive timer checker, id: {}, interval: {:?}", id, interval);

        let (request_tx, request_receiver) = bounded(250);

        // run the handler loop as a background task
        task::spawn(async move {
            match handler(id.clone(), manager, interval, request_receiver).await {
                Ok(()) => info!("alive checker exit for id: {}", id),
                Err(e) => error!("alive checker exit with error: {:?}", e),
            }
        });

        AliveTimerChecker {
            id: cid,
            uptime,
            request_tx,
        }
    }

    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn get_uptime(&self) -> String {
        self.uptime.to_string()
    }

    /// send commands to the checker through this channel
    pub fn request_channel(&self) -> Sender<Command> {
        self.request_tx.clone()
    }

    /// run a check now and wait for the number of expired timers
    pub async fn check_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = bounded(1);
        self.request_tx.send(Command::Check(tx)).await?;
        Ok(rx.recv().await?)
    }

    pub async fn status(&self) -> anyhow::Result<JsonString> {
        let (tx, rx) = bounded(1);
        self.request_tx.send(Command::Status(tx)).await?;
        Ok(rx.recv().await?)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.request_tx.send(Command::Shutdown).await?;
        Ok(())
    }
}
