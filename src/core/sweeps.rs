//! Periodic reconciliation sweeps: the safety net under the webhook path.
//!
//! Webhooks get lost; sweeps make the store converge anyway. Each sweep walks
//! its working set tenant by tenant with a small randomized delay so a large
//! install does not hammer the provider in bursts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::idempotency::IdempotencyLedger;
use crate::core::lifecycle;
use crate::core::provider::{RecorderProvider, ScheduleRequest, TimeWindow};
use crate::core::reconciler;
use crate::core::store::MeetingStore;
use crate::core::types::{
    ChangeSource, MeetingPatch, MeetingRecord, MeetingStatus, ProcessingStatus,
};

/// Schedules and pacing knobs, all overridable from config. The cron
/// expressions use staggered second offsets so the sweeps never fire in the
/// same instant.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub status_poll_cron: String,
    pub calendar_sync_cron: String,
    pub auto_schedule_cron: String,
    pub cleanup_cron: String,
    /// Pause between tenants within one sweep, plus up to 250ms of jitter.
    pub tenant_delay_ms: u64,
    pub lookback_days: i64,
    pub lookahead_days: i64,
    pub retention_days: i64,
    pub auto_schedule: bool,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            status_poll_cron: "10 0/2 * * * *".to_string(),
            calendar_sync_cron: "25 0/15 * * * *".to_string(),
            auto_schedule_cron: "40 0/30 * * * *".to_string(),
            cleanup_cron: "0 45 3 * * *".to_string(),
            tenant_delay_ms: 200,
            lookback_days: 7,
            lookahead_days: 30,
            retention_days: 30,
            auto_schedule: true,
        }
    }
}

/// Everything a sweep needs, shared with the webhook path.
pub struct SweepContext {
    pub store: Arc<dyn MeetingStore>,
    pub provider: Arc<dyn RecorderProvider>,
    pub ledger: Arc<IdempotencyLedger>,
    pub settings: SweepSettings,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub changed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub tasks_active: usize,
}

async fn pace(settings: &SweepSettings) {
    if settings.tenant_delay_ms == 0 {
        return;
    }
    let jitter = rand::thread_rng().gen_range(0..250u64);
    tokio::time::sleep(Duration::from_millis(settings.tenant_delay_ms + jitter)).await;
}

fn window(settings: &SweepSettings) -> TimeWindow {
    let now = Utc::now();
    TimeWindow::new(
        now - chrono::Duration::days(settings.lookback_days),
        now + chrono::Duration::days(settings.lookahead_days),
    )
}

/// Poll the provider for every meeting that still has a live bot and fold the
/// latest status through the same lifecycle mapping the webhooks use.
pub async fn run_status_poll(ctx: &SweepContext) -> Result<SweepReport> {
    let meetings = ctx.store.list_active_bot_meetings().await?;
    let mut report = SweepReport::default();

    for meeting in meetings {
        report.processed += 1;
        let Some(bot_id) = meeting.external_bot_id.as_deref() else {
            continue;
        };

        // Malformed or placeholder bot ids can never resolve at the
        // provider; fail the record and drop the linkage so it leaves the
        // active set.
        if Uuid::parse_str(bot_id).is_err() {
            warn!("Meeting {} carries invalid bot id '{bot_id}', failing it", meeting.id);
            let patch = MeetingPatch {
                status: Some(MeetingStatus::Failed),
                processing_status: Some(ProcessingStatus::Failed),
                failure_reason: Some(format!("invalid external bot id '{bot_id}'")),
                clear_external_bot_id: true,
                ..Default::default()
            };
            ctx.store.update_meeting(&meeting.id, &patch).await?;
            report.changed += 1;
            continue;
        }

        match ctx.provider.get_bot_status(bot_id).await {
            Ok(status) => {
                let transition = lifecycle::transition(meeting.status, &status.code);
                if meeting.status != Some(transition.next) {
                    let mut patch = MeetingPatch {
                        status: Some(transition.next),
                        ..Default::default()
                    };
                    if !transition.was_terminal && transition.next == MeetingStatus::Failed {
                        patch.processing_status = Some(ProcessingStatus::Failed);
                        patch.failure_reason = transition.failure_reason.map(str::to_string);
                    }
                    ctx.store.update_meeting(&meeting.id, &patch).await?;
                    report.changed += 1;
                }
            }
            Err(e) => {
                warn!("Status poll failed for bot {bot_id}: {e:#}");
                report.failed += 1;
            }
        }

        // Unconditional: the unchanged-status case is the common one and
        // still hit the provider.
        pace(&ctx.settings).await;
    }

    Ok(report)
}

/// Pull the provider's calendar truth for every active integration and
/// reconcile it against the local records.
pub async fn run_calendar_sync(ctx: &SweepContext, user_id: Option<&str>) -> Result<SweepReport> {
    let integrations = ctx.store.list_active_calendar_integrations(user_id).await?;
    let mut report = SweepReport::default();
    let window = window(&ctx.settings);

    for integration in integrations {
        report.processed += 1;
        match ctx
            .provider
            .list_events(&integration.external_calendar_id, &window)
            .await
        {
            Ok(events) => {
                report.changed += reconciler::reconcile_all(
                    ctx.store.as_ref(),
                    &events,
                    &integration.user_id,
                    ChangeSource::Sweep,
                )
                .await;
                ctx.store
                    .touch_integration_synced(&integration.id, Utc::now())
                    .await?;
            }
            Err(e) => {
                warn!(
                    "Calendar sync failed for integration {} (user {}): {e:#}",
                    integration.id, integration.user_id
                );
                report.failed += 1;
            }
        }

        pace(&ctx.settings).await;
    }

    Ok(report)
}

/// Schedule a recording bot for every upcoming calendar event that has a
/// meeting link but no local record yet.
pub async fn run_auto_schedule(ctx: &SweepContext, user_id: Option<&str>) -> Result<SweepReport> {
    let integrations = ctx.store.list_active_calendar_integrations(user_id).await?;
    let mut report = SweepReport::default();
    let now = Utc::now();
    let window = TimeWindow::new(now, now + chrono::Duration::days(ctx.settings.lookahead_days));

    for integration in integrations {
        let events = match ctx
            .provider
            .list_events(&integration.external_calendar_id, &window)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    "Event listing failed for integration {}: {e:#}",
                    integration.id
                );
                report.failed += 1;
                continue;
            }
        };

        for event in events {
            report.processed += 1;
            let Some(meeting_url) = event.meeting_url.clone() else {
                continue;
            };
            if ctx
                .store
                .find_by_calendar_event_and_owner(&event.id, &integration.user_id)
                .await?
                .is_some()
            {
                continue;
            }

            let duration = reconciler::normalize_duration(event.duration);
            let request = ScheduleRequest {
                meeting_url: meeting_url.clone(),
                title: event.title.clone(),
                scheduled_start: event.start_time,
                duration_minutes: duration,
            };
            match ctx.provider.schedule_recording(&request).await {
                Ok(bot_id) => {
                    let mut meeting =
                        MeetingRecord::new(&integration.user_id, &event.title, event.start_time);
                    meeting.external_bot_id = Some(bot_id);
                    meeting.calendar_event_id = Some(event.id.clone());
                    meeting.meeting_url = Some(meeting_url);
                    meeting.duration_minutes = duration;
                    ctx.store.insert_meeting(&meeting).await?;
                    info!(
                        "Auto-scheduled recording for '{}' at {}",
                        meeting.title, meeting.scheduled_start
                    );
                    report.changed += 1;
                }
                Err(e) => {
                    warn!("Scheduling failed for event {}: {e:#}", event.id);
                    report.failed += 1;
                }
            }
        }

        pace(&ctx.settings).await;
    }

    Ok(report)
}

/// Retention housekeeping: old audit rows, stale integration sync markers,
/// expired idempotency entries.
pub async fn run_cleanup(ctx: &SweepContext) -> Result<SweepReport> {
    let cutoff = Utc::now() - chrono::Duration::days(ctx.settings.retention_days);
    let mut report = SweepReport::default();

    report.changed += ctx.store.prune_audit_older_than(cutoff).await?;
    report.changed += ctx.store.clear_stale_integration_sync(cutoff).await?;
    report.changed += ctx.ledger.purge_expired();
    report.processed = report.changed;

    info!("Cleanup sweep removed {} stale entries", report.changed);
    Ok(report)
}

/// Owns the cron scheduler and keeps the job handles alive.
pub struct SweepScheduler {
    ctx: Arc<SweepContext>,
    scheduler: Mutex<Option<JobScheduler>>,
    running: AtomicBool,
    tasks_active: AtomicUsize,
}

impl SweepScheduler {
    pub fn new(ctx: Arc<SweepContext>) -> Self {
        Self {
            ctx,
            scheduler: Mutex::new(None),
            running: AtomicBool::new(false),
            tasks_active: AtomicUsize::new(0),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            tasks_active: self.tasks_active.load(Ordering::SeqCst),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .context("failed to create sweep scheduler")?;
        let settings = &self.ctx.settings;

        let ctx = self.ctx.clone();
        let status_job = Job::new_async(settings.status_poll_cron.as_str(), move |_uuid, mut _l| {
            let ctx = ctx.clone();
            Box::pin(async move {
                match run_status_poll(&ctx).await {
                    Ok(report) => info!(
                        "Status poll sweep: {} polled, {} changed, {} failed",
                        report.processed, report.changed, report.failed
                    ),
                    Err(e) => warn!("Status poll sweep failed: {e:#}"),
                }
            })
        })
        .context("invalid status poll cron expression")?;
        scheduler.add(status_job).await?;

        let ctx = self.ctx.clone();
        let sync_job = Job::new_async(settings.calendar_sync_cron.as_str(), move |_uuid, mut _l| {
            let ctx = ctx.clone();
            Box::pin(async move {
                match run_calendar_sync(&ctx, None).await {
                    Ok(report) => info!(
                        "Calendar sync sweep: {} integrations, {} drifted, {} failed",
                        report.processed, report.changed, report.failed
                    ),
                    Err(e) => warn!("Calendar sync sweep failed: {e:#}"),
                }
            })
        })
        .context("invalid calendar sync cron expression")?;
        scheduler.add(sync_job).await?;

        let mut tasks = 3usize;
        if settings.auto_schedule {
            let ctx = self.ctx.clone();
            let schedule_job =
                Job::new_async(settings.auto_schedule_cron.as_str(), move |_uuid, mut _l| {
                    let ctx = ctx.clone();
                    Box::pin(async move {
                        match run_auto_schedule(&ctx, None).await {
                            Ok(report) => info!(
                                "Auto-schedule sweep: {} events seen, {} scheduled, {} failed",
                                report.processed, report.changed, report.failed
                            ),
                            Err(e) => warn!("Auto-schedule sweep failed: {e:#}"),
                        }
                    })
                })
                .context("invalid auto-schedule cron expression")?;
            scheduler.add(schedule_job).await?;
            tasks += 1;
        }

        let ctx = self.ctx.clone();
        let cleanup_job = Job::new_async(settings.cleanup_cron.as_str(), move |_uuid, mut _l| {
            let ctx = ctx.clone();
            Box::pin(async move {
                if let Err(e) = run_cleanup(&ctx).await {
                    warn!("Cleanup sweep failed: {e:#}");
                }
            })
        })
        .context("invalid cleanup cron expression")?;
        scheduler.add(cleanup_job).await?;

        scheduler.start().await.context("failed to start sweep scheduler")?;
        info!("Sweep scheduler started with {tasks} jobs");

        *guard = Some(scheduler);
        self.running.store(true, Ordering::SeqCst);
        self.tasks_active.store(tasks, Ordering::SeqCst);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.scheduler.lock().await;
        if let Some(mut scheduler) = guard.take() {
            scheduler.shutdown().await?;
        }
        self.running.store(false, Ordering::SeqCst);
        self.tasks_active.store(0, Ordering::SeqCst);
        Ok(())
    }
}
