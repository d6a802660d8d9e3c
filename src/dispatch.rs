//! Per-item, per-platform publish state machine.
//!
//! Every queued item gets one [`PlatformSlot`] per configured platform. A run
//! attempts each slot that is not `success` and still under the attempt cap,
//! records the outcome on the slot and persists the state only when a slot or
//! entry actually changed. `success` is absorbing and capped slots are skipped
//! until the cap is raised. Missing configuration defers a slot without
//! spending an attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::backends::PlatformAdapter;
use crate::config_persistence::{load_json_or_default, write_json_atomic};
use crate::manifest::{excerpt_lines, read_manifest};
use crate::protocol::{
    DispatchEntry, DispatchPayload, DispatchState, PlatformSlot, QueueItem, SendOutcome,
    SendStatus, SlotStatus,
};
use crate::protocol_utils::{truncate_chars, utc_timestamp};
use crate::publish_queue::load_queue;

pub const BODY_MAX_LINES: usize = 24;
const NEW_SLOT_MESSAGE: &str = "queued, waiting for first dispatch";

/// Supplies the plain-text body sent with an item.
pub trait PayloadBodies: Send + Sync {
    fn body_for(&self, item: &QueueItem) -> String;
}

fn source_line(url: &str) -> String {
    format!("原文链接：{url}")
}

/// Title followed by the source link, used when no manifest is available.
pub fn fallback_body(title: &str, url: &str) -> String {
    format!("{}\n\n{}", title.trim(), source_line(url))
}

/// Builds bodies from the manifest named by the queue item's `file`.
pub struct ManifestBodies {
    manifest_dir: PathBuf,
}

impl ManifestBodies {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
        }
    }
}

impl PayloadBodies for ManifestBodies {
    fn body_for(&self, item: &QueueItem) -> String {
        let file = item.file.trim();
        let manifest = if file.is_empty() {
            None
        } else {
            read_manifest(&self.manifest_dir.join(file))
        };
        let lines = manifest
            .map(|manifest| excerpt_lines(&manifest, BODY_MAX_LINES))
            .unwrap_or_default();
        if lines.is_empty() {
            return fallback_body(&item.title, &item.url);
        }
        format!("{}\n\n{}", lines.join("\n"), source_line(&item.url))
    }
}

/// Run-end counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub queue_items: usize,
    pub tracked: usize,
    pub new_entries: usize,
    pub new_slots: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped_success: usize,
    pub skipped_capped: usize,
    pub changed: bool,
    pub written: bool,
}

/// One (item, platform) pair still waiting for a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub platform: String,
    pub title: String,
    pub url: String,
    pub status: SlotStatus,
    pub attempts: u32,
    pub message: String,
}

/// Every pair whose slot is absent or not `success`, in queue then platform order.
pub fn pending_tasks(
    queue: &[QueueItem],
    state: &DispatchState,
    platforms: &[String],
) -> Vec<PendingTask> {
    let mut tasks = Vec::new();
    for item in queue {
        let url = item.url.trim();
        if url.is_empty() {
            continue;
        }
        let entry = state.items.get(url);
        for platform in platforms {
            let slot = entry
                .and_then(|entry| entry.platforms.get(platform))
                .cloned()
                .unwrap_or_default();
            match slot.status {
                SlotStatus::Success => continue,
                SlotStatus::Queued | SlotStatus::Failed => tasks.push(PendingTask {
                    platform: platform.clone(),
                    title: item.title.trim().to_string(),
                    url: url.to_string(),
                    status: slot.status,
                    attempts: slot.attempts,
                    message: slot.message,
                }),
            }
        }
    }
    tasks
}

pub struct Dispatcher {
    platforms: Vec<String>,
    attempt_cap: u32,
    message_max_chars: usize,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    default_adapter: Option<Arc<dyn PlatformAdapter>>,
    bodies: Box<dyn PayloadBodies>,
}

impl Dispatcher {
    pub fn new(
        platforms: Vec<String>,
        attempt_cap: u32,
        message_max_chars: usize,
        bodies: Box<dyn PayloadBodies>,
    ) -> Self {
        Self {
            platforms,
            attempt_cap,
            message_max_chars,
            adapters: HashMap::new(),
            default_adapter: None,
            bodies,
        }
    }

    /// Adapter used for platforms without a dedicated one.
    pub fn with_default_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.default_adapter = Some(adapter);
        self
    }

    pub fn with_adapter(mut self, platform: &str, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(platform.to_string(), adapter);
        self
    }

    fn send(&self, payload: &DispatchPayload) -> SendOutcome {
        match self
            .adapters
            .get(&payload.platform)
            .or(self.default_adapter.as_ref())
        {
            Some(adapter) => adapter.send(payload),
            None => SendOutcome::not_configured(format!(
                "no adapter registered for {}",
                payload.platform
            )),
        }
    }

    /// Applies one run to `state` in place. Never fails: adapter problems are
    /// recorded on their slot.
    pub fn dispatch(
        &self,
        queue: &[QueueItem],
        state: &mut DispatchState,
        now: &str,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            queue_items: queue.len(),
            ..DispatchReport::default()
        };

        for item in queue {
            let url = item.url.trim();
            if url.is_empty() {
                continue;
            }
            if !state.items.contains_key(url) {
                state
                    .items
                    .insert(url.to_string(), DispatchEntry::from_queue_item(item, now));
                report.new_entries += 1;
                report.changed = true;
            }
            let Some(entry) = state.items.get_mut(url) else {
                continue;
            };

            for platform in &self.platforms {
                if !entry.platforms.contains_key(platform) {
                    entry.platforms.insert(
                        platform.clone(),
                        PlatformSlot {
                            message: NEW_SLOT_MESSAGE.to_string(),
                            ..PlatformSlot::default()
                        },
                    );
                    report.new_slots += 1;
                    report.changed = true;
                }
            }

            let mut body: Option<String> = None;
            for platform in &self.platforms {
                let Some(slot) = entry.platforms.get_mut(platform) else {
                    continue;
                };
                match slot.status {
                    SlotStatus::Success => {
                        report.skipped_success += 1;
                        continue;
                    }
                    SlotStatus::Queued | SlotStatus::Failed => {}
                }
                if slot.attempts >= self.attempt_cap {
                    debug!("{url} on {platform}: attempt cap reached, skipping");
                    report.skipped_capped += 1;
                    continue;
                }

                let payload = DispatchPayload {
                    platform: platform.clone(),
                    title: item.title.trim().to_string(),
                    url: url.to_string(),
                    source: item.source.trim().to_string(),
                    date: item.date.trim().to_string(),
                    file: item.file.trim().to_string(),
                    body: body
                        .get_or_insert_with(|| self.bodies.body_for(item))
                        .clone(),
                };
                let outcome = self.send(&payload);
                let message = truncate_chars(outcome.message.trim(), self.message_max_chars);
                match outcome.status {
                    SendStatus::Success => {
                        report.attempted += 1;
                        report.succeeded += 1;
                        slot.status = SlotStatus::Success;
                        slot.message = message;
                        slot.http_code = outcome.http_code;
                        slot.last_attempt_at = now.to_string();
                        report.changed = true;
                        info!("Published {url} to {platform}");
                    }
                    SendStatus::Failed => {
                        report.attempted += 1;
                        report.failed += 1;
                        slot.status = SlotStatus::Failed;
                        slot.attempts += 1;
                        slot.message = message;
                        slot.http_code = outcome.http_code;
                        slot.last_attempt_at = now.to_string();
                        report.changed = true;
                        warn!(
                            "Publishing {url} to {platform} failed (attempt {}/{}): {}",
                            slot.attempts, self.attempt_cap, slot.message
                        );
                    }
                    SendStatus::NotConfigured => {
                        report.deferred += 1;
                        if slot.status == SlotStatus::Queued && slot.message != message {
                            slot.message = message;
                            report.changed = true;
                        }
                    }
                }
            }
        }

        report.tracked = state.items.len();
        report
    }

    /// Loads queue and state, applies one run and persists the state if it changed.
    pub fn run(&self, queue_path: &Path, state_path: &Path) -> Result<DispatchReport, String> {
        let queue = load_queue(queue_path);
        let mut state: DispatchState = load_json_or_default(state_path, DispatchState::default());
        let now = utc_timestamp();

        let mut report = self.dispatch(&queue, &mut state, &now);
        if report.changed {
            state.updated_at = now;
            write_json_atomic(state_path, &state)?;
            report.written = true;
        }

        info!(
            "Publish dispatcher: queue={} tracked={} new_slots={} attempted={} succeeded={} failed={} deferred={} capped={}{}",
            report.queue_items,
            report.tracked,
            report.new_slots,
            report.attempted,
            report.succeeded,
            report.failed,
            report.deferred,
            report.skipped_capped,
            if report.written { "" } else { " (no changes)" }
        );
        Ok(report)
    }
}
