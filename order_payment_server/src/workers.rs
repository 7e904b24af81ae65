//! Background workers that run alongside the HTTP server.
//!
//! * The reconciliation sweeper repairs drift between orders, payments and the notification queue.
//! * The notification dispatcher sends due notifications and parks long-failed ones as dead letters.
//!
//! Do not await the returned `JoinHandle`s, as they run indefinitely.
use std::time::Duration;

use log::*;
use order_payment_engine::{
    traits::PlainTextRenderer,
    NotificationDispatcher,
    NotificationQueue,
    ReconciliationApi,
    SqliteDatabase,
};
use tokio::task::JoinHandle;

use crate::transport::LogTransport;

// tokio panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub type Dispatcher = NotificationDispatcher<SqliteDatabase, LogTransport, PlainTextRenderer>;

pub fn start_sweeper_worker(api: ReconciliationApi<SqliteDatabase>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval.max(MIN_INTERVAL));
        info!("🧹️ Reconciliation sweeper started. Running every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            trace!("🧹️ Running reconciliation sweep");
            // The sweep logs its own corrections and repair failures.
            if let Err(e) = api.run_sweep().await {
                error!("🧹️ Error running reconciliation sweep: {e}");
            }
        }
    })
}

pub fn start_dispatch_worker(
    dispatcher: Dispatcher,
    queue: NotificationQueue<SqliteDatabase>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval.max(MIN_INTERVAL));
        let dead_letter_after = dispatcher.config().dead_letter_after;
        info!("📬️ Notification dispatcher started. Polling every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            match dispatcher.dispatch_once().await {
                Ok(report) if report.claimed > 0 => info!("📬️ Dispatch run: {report:?}"),
                Ok(_) => trace!("📬️ No notifications are due"),
                Err(e) => error!("📬️ Error running notification dispatch: {e}"),
            }
            if let Err(e) = queue.dead_letter_failed(dead_letter_after).await {
                error!("📬️ Error parking failed notifications: {e}");
            }
        }
    })
}
