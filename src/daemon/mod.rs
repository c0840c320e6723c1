use anyhow::Result;
use log::{error, info};
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crate::orchestrator::Orchestrator;

pub struct WatchConfig {
    pub interval_secs: u64,
}

/// Receive then send, every `interval_secs`, until Ctrl-C.
pub fn run_watch(orchestrator: &Orchestrator<'_>, cfg: WatchConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    watch_while(orchestrator, &cfg, &running);
    info!("stopped");
    Ok(())
}

pub fn watch_while(orchestrator: &Orchestrator<'_>, cfg: &WatchConfig, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        run_cycle(orchestrator);

        // sleep in short steps so Ctrl-C is noticed promptly
        for _ in 0..cfg.interval_secs {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }
}

/// One receive and one send. Failures are logged and the cycle moves on;
/// returns whether both halves succeeded.
pub fn run_cycle(orchestrator: &Orchestrator<'_>) -> bool {
    let mut ok = true;
    match orchestrator.refresh() {
        Ok(r) => info!(
            "receive: {} new, {} removed, {} skipped",
            r.created.len(),
            r.deleted.len(),
            r.skipped.len()
        ),
        Err(e) => {
            error!("receive failed: {e:#}");
            ok = false;
        }
    }
    match orchestrator.send_outbox() {
        Ok(r) => info!(
            "send: {} sent, {} failed, {} without text, {} left in the outbox after sending",
            r.sent.len(),
            r.failed.len(),
            r.skipped_empty.len(),
            r.undeleted.len()
        ),
        Err(e) => {
            error!("send failed: {e:#}");
            ok = false;
        }
    }
    ok
}
