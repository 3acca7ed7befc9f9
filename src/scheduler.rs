use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use crate::pipeline::RunStats;

/// Run `job` now and then once per `interval` until `shutdown` flips to
/// true. A cycle starts only after the previous one returned, so runs
/// never overlap. A failed cycle is logged and the loop waits the full
/// interval before trying again. Returns the number of cycles started.
pub async fn run_periodic<F, Fut>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunStats>>,
{
    let mut cycles = 0usize;

    loop {
        let stop = *shutdown.borrow();
        if stop {
            break;
        }
        cycles += 1;
        tokio::select! {
            result = job() => match result {
                Ok(stats) => info!(cycle = cycles, records = stats.records, "Update finished"),
                Err(e) => error!(cycle = cycles, "Update failed: {:#}", e),
            },
            _ = stopped(&mut shutdown) => {
                info!(cycle = cycles, "Shutdown requested, abandoning update");
                break;
            }
        }

        info!(next_in_s = interval.as_secs(), "Waiting for next update");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stopped(&mut shutdown) => break,
        }
    }

    info!(cycles, "Scheduler stopped");
    cycles
}

/// Resolves once shutdown is requested. A dropped sender can never request
/// it, so that case pends forever.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
