//! Fixed-interval task runner with cooperative shutdown

use crate::error::FetchError;
use anyhow::Result;
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Sleep for `duration` unless shutdown is signalled first.
/// Returns true when the caller should stop.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    tokio::select! {
        _ = sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => match changed {
            Ok(()) => *shutdown.borrow(),
            // Sender gone: nobody can stop us any more, just wait out the interval
            Err(_) => {
                sleep(duration).await;
                false
            }
        },
    }
}

/// Run `tick` now and then once per `interval` until shutdown.
///
/// Errors from a tick are logged and never end the loop.
pub async fn run_every<F, Fut>(name: &str, interval: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!("[{}] Started (interval: {:?})", name, interval);

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = tick().await {
            let transient = e.downcast_ref::<FetchError>().map_or(false, FetchError::is_transient);
            if transient {
                warn!("[{}] Transient failure, retrying next cycle: {:#}", name, e);
            } else {
                error!("[{}] Cycle failed: {:#}", name, e);
            }
        }

        if sleep_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!("[{}] Stopped", name);
}
