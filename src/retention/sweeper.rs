use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configuration::types::RetentionSettings;
use crate::storage::storage_trait::BinStorage;
use crate::storage::types::SweepReport;

/// Periodically deletes bins nobody touched within the retention threshold.
///
/// Runs independently of request traffic. A bin being swept while a capture
/// for it arrives may either lose that capture or come back to life; neither
/// outcome is prevented.
pub struct RetentionSweeper {
    storage: Arc<dyn BinStorage>,
    settings: RetentionSettings,
}

impl RetentionSweeper {
    pub fn new(storage: Arc<dyn BinStorage>, settings: RetentionSettings) -> Self {
        Self { storage, settings }
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_std(self.settings.threshold).unwrap_or(Duration::MAX)
    }

    /// One pass over every stored bin, as seen at `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let storage = Arc::clone(&self.storage);
        let threshold = self.threshold();
        match tokio::task::spawn_blocking(move || storage.delete_all_expired(threshold, now)).await {
            Ok(report) => report,
            Err(e) => {
                error!("Sweep task failed: {}", e);
                SweepReport {
                    failures: 1,
                    ..SweepReport::default()
                }
            }
        }
    }

    /// Sweeps now, then once every period, forever.
    pub async fn run(self) {
        info!(
            "Sweeping bins every {:?}, removing those idle for more than {:?}",
            self.settings.period, self.settings.threshold
        );
        let mut ticker = tokio::time::interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sweep_once(Utc::now()).await;
            info!(
                "Sweep removed {} bin(s), {} failure(s)",
                report.removed(),
                report.failures
            );
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
