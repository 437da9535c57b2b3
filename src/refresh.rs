use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    config::Config,
    schedule::{next_refresh_delay, Clock, RefreshAnchor},
    service::RelationIndexService,
};

#[derive(Debug, Clone, Copy)]
pub struct RefreshSchedule {
    pub anchor: RefreshAnchor,
    pub retry_delay: Duration,
    pub refresh_on_start: bool,
}

impl RefreshSchedule {
    pub fn from_config(config: &Config) -> Self {
        Self {
            anchor: config.refresh_anchor,
            retry_delay: config.retry_delay,
            refresh_on_start: config.refresh_on_start,
        }
    }
}

/// Spawns the background refresh loop. It runs until `shutdown` flips to
/// `true` (or its sender is dropped); an in-flight refresh is abandoned and
/// never published.
pub fn spawn_refresh_worker(
    service: RelationIndexService,
    clock: Arc<dyn Clock>,
    schedule: RefreshSchedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = run_refresh_loop(&service, clock.as_ref(), &schedule) => {}
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Refresh worker stopped");
            }
        }
    })
}

async fn run_refresh_loop(
    service: &RelationIndexService,
    clock: &dyn Clock,
    schedule: &RefreshSchedule,
) {
    if schedule.refresh_on_start {
        refresh_until_success(service, schedule.retry_delay).await;
    }

    loop {
        let delay = next_refresh_delay(clock.now(), &schedule.anchor);
        info!(
            delay_secs = delay.as_secs(),
            "Next subject relation refresh scheduled"
        );
        time::sleep(delay).await;
        refresh_until_success(service, schedule.retry_delay).await;
    }
}

/// Retries `refresh_once` with a fixed delay until it succeeds; returns the
/// number of attempts made.
pub async fn refresh_until_success(service: &RelationIndexService, retry_delay: Duration) -> u32 {
    let mut attempt = 1u32;
    loop {
        let refresh_id = Uuid::new_v4();
        let span = info_span!("refresh", refresh_id = %refresh_id, attempt);
        info!(parent: &span, "Updating subject relations");

        match service.refresh_once().instrument(span.clone()).await {
            Ok(report) => {
                info!(
                    parent: &span,
                    entries = report.entries,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Subject relations updated"
                );
                return attempt;
            }
            Err(err) => {
                error!(
                    parent: &span,
                    stage = err.stage(),
                    retry_in_secs = retry_delay.as_secs(),
                    "Failed to update subject relations: {err:#}"
                );
            }
        }

        time::sleep(retry_delay).await;
        attempt += 1;
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
