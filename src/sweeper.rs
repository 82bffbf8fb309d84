use std::sync::{Arc, Mutex};

use chrono::Utc;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, sync::Notify, task::JoinHandle},
    Orbit, Rocket,
};

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::service::VotingService;

/// A fairing that periodically reclaims expired sessions, voting locks and
/// rate-limit windows, from liftoff until shutdown.
#[derive(Default)]
pub struct SweeperFairing {
    stop: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SweeperFairing {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Expiry sweeper",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (Some(config), Some(service), Some(limiter)) = (
            rocket.state::<Config>(),
            rocket.state::<VotingService>(),
            rocket.state::<RateLimiter>(),
        ) else {
            error!("Expiry sweeper not started: application state missing");
            return;
        };

        let period = match config.sweep_interval().to_std() {
            Ok(period) if !period.is_zero() => period,
            _ => {
                error!("Expiry sweeper not started: `sweep_interval` must be positive");
                return;
            }
        };
        let service = service.clone();
        let limiter = limiter.clone();
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => run_once(&service, &limiter).await,
                    _ = stop.notified() => break,
                }
            }
            debug!("Expiry sweeper stopped");
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Expiry sweeper running every {}s", period.as_secs());
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        self.stop.notify_one();
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Expiry sweeper failed: {e}");
            }
        }
    }
}

/// One sweep over all ephemeral state.
pub async fn run_once(service: &VotingService, limiter: &RateLimiter) {
    let now = Utc::now();
    let windows = limiter.sweep(now);
    match service.sweep(now).await {
        Ok(report) => {
            if report.sessions > 0 || report.locks > 0 || windows > 0 {
                info!(
                    "Swept {} sessions, {} locks and {windows} rate-limit windows",
                    report.sessions, report.locks
                );
            }
        }
        Err(e) => error!("Expiry sweep failed: {e}"),
    }
}
