//! Persisted publish queue keyed by item URL.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};

use crate::config_persistence::{load_json_or_default, write_json_atomic};
use crate::protocol::{QueueItem, QueueState};
use crate::protocol_utils::utc_timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub total: usize,
    /// Whether the queue file was rewritten.
    pub written: bool,
}

/// Canonical order: `(date, url)` descending.
pub fn sort_queue(items: &mut [QueueItem]) {
    items.sort_by(|left, right| {
        right
            .date
            .cmp(&left.date)
            .then_with(|| right.url.cmp(&left.url))
    });
}

fn normalized(item: &QueueItem) -> QueueItem {
    QueueItem {
        title: item.title.trim().to_string(),
        url: item.url.trim().to_string(),
        source: item.source.trim().to_string(),
        date: item.date.trim().to_string(),
        file: item.file.trim().to_string(),
        ..item.clone()
    }
}

/// Merges `new_items` into `existing` by URL.
///
/// New or changed items replace the stored entry and are stamped with `now`;
/// an incoming item identical in content to the stored one leaves it as is.
/// Items without a URL are dropped.
pub fn merge_queue(
    existing: &[QueueItem],
    new_items: &[QueueItem],
    now: &str,
) -> (Vec<QueueItem>, MergeReport) {
    let mut by_url: HashMap<String, QueueItem> = HashMap::new();
    for item in existing {
        let url = item.url.trim();
        if !url.is_empty() {
            by_url.insert(url.to_string(), item.clone());
        }
    }

    let mut report = MergeReport::default();
    for item in new_items {
        let mut fresh = normalized(item);
        if fresh.url.is_empty() {
            debug!("Skipping queue item without url: {}", fresh.title);
            continue;
        }
        match by_url.get(&fresh.url) {
            Some(stored) if stored.same_content(&fresh) => {
                report.unchanged += 1;
                continue;
            }
            Some(_) => report.updated += 1,
            None => report.added += 1,
        }
        fresh.state = QueueState::Pending;
        fresh.queued_at = now.to_string();
        by_url.insert(fresh.url.clone(), fresh);
    }

    let mut merged: Vec<QueueItem> = by_url.into_values().collect();
    sort_queue(&mut merged);
    report.total = merged.len();
    (merged, report)
}

/// Missing or corrupt queue files read as empty.
pub fn load_queue(path: &Path) -> Vec<QueueItem> {
    load_json_or_default(path, Vec::new())
}

/// Merges `new_items` into the queue file, rewriting it only if the result differs.
pub fn enqueue(path: &Path, new_items: &[QueueItem]) -> Result<MergeReport, String> {
    let existing = load_queue(path);
    let (merged, mut report) = merge_queue(&existing, new_items, &utc_timestamp());
    if merged != existing {
        write_json_atomic(path, &merged)?;
        report.written = true;
    }
    info!(
        "Queue merge: added={} updated={} unchanged={} total={} written={}",
        report.added, report.updated, report.unchanged, report.total, report.written
    );
    Ok(report)
}
