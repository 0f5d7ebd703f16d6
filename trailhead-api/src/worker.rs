use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

use crate::state::AppState;

/// Periodic completion sweep, hold reaper and refund retry.
pub async fn start_sweep_worker(state: AppState, every: Duration) {
    info!("Sweep worker started, running every {:?}", every);

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_pass(&state).await;
    }
}

async fn run_pass(state: &AppState) {
    let report = state.sweeper.run_once(Utc::now()).await;

    state.metrics.record_sweep("completed", report.completed);
    state.metrics.record_sweep("holds_expired", report.holds_expired);
    state.metrics.record_sweep("refunded", report.refunds_issued);

    if report == Default::default() {
        debug!("sweep pass found nothing to do");
    } else {
        info!(
            completed = report.completed,
            holds_expired = report.holds_expired,
            refunds_issued = report.refunds_issued,
            "sweep pass finished"
        );
    }
}
