//! Background job closing engagements nobody answered

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::engagement::{Engagement, EngagementStatus};
use crate::error::EngineResult;
use crate::store::EngagementStore;
use crate::websocket::{DomainEvent, EntityKind, EventBus};

/// Outcome of a single sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub expired_count: usize,
}

/// Expires `pending` engagements older than the configured threshold.
pub struct ExpirySweeper {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    settings: EngineSettings,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            settings,
        }
    }

    /// Run one pass. Rows that left `pending` since they were read are
    /// skipped; a failing row is logged and the pass continues.
    pub async fn run_once(&self) -> EngineResult<SweepReport> {
        let now = self.clock.now();
        let cutoff = now - self.settings.pending_expiry;
        let candidates = self.store.stale_pending(cutoff).await?;

        let mut report = SweepReport::default();
        for engagement in candidates {
            let engagement_id = engagement.id;
            match self.expire_one(engagement, now).await {
                Ok(Some(expired)) => {
                    tracing::info!(
                        engagement_id = %expired.id,
                        code = %expired.display_code,
                        status = %expired.status,
                        "Engagement auto-expired"
                    );
                    self.events.publish(
                        DomainEvent::new(EntityKind::Engagement, expired.id, expired.status)
                            .for_engagement(expired.id),
                    );
                    report.expired_count += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(engagement_id = %engagement_id, error = %e, "Failed to expire engagement");
                }
            }
        }

        Ok(report)
    }

    /// Expire `snapshot` unless it moved on. A row written while still
    /// `pending` is re-read once so the expiry keeps that write.
    async fn expire_one(
        &self,
        snapshot: Engagement,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Engagement>> {
        let mut current = snapshot;
        for attempt in 0..2 {
            if current.status != EngagementStatus::Pending {
                tracing::debug!(engagement_id = %current.id, "Engagement moved on before expiry");
                return Ok(None);
            }

            let transition = current.expire(now)?;
            if self.store.expire_if_pending(&transition).await? {
                return Ok(Some(transition.engagement));
            }
            if attempt == 1 {
                break;
            }

            match self.store.get_engagement(current.id).await? {
                Some(fresh) => current = fresh,
                None => return Ok(None),
            }
        }

        tracing::debug!(engagement_id = %current.id, "Engagement kept changing, retrying next tick");
        Ok(None)
    }
}

/// Run the sweeper every `sweep_interval` until `shutdown` flips to `true`.
pub async fn run_expiry_sweeper(sweeper: Arc<ExpirySweeper>, mut shutdown: watch::Receiver<bool>) {
    let period = sweeper.settings.sweep_interval;
    tracing::info!("Starting expiry sweeper (interval: {:?})", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sweeper.run_once().await {
                    Ok(report) if report.expired_count > 0 => {
                        tracing::info!(expired_count = report.expired_count, "Expiry sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Error running expiry sweep: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Expiry sweeper stopped");
                    break;
                }
            }
        }
    }
}
