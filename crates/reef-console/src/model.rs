//! Desired/actual view of every device, maintained from the relayed stream.
//!
//! The model is a pure reducer: callers pass the current time in and get back
//! the list of changes to present. Pairs are only ever replaced whole.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reef_proto::{Blueprint, DevicePair, MalformedMessage, RelayedMessage, SyncStatus};
use tracing::debug;

use crate::activity::{ActivityEntry, ActivityLog, Severity};

/// Something the presenter should react to, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChange {
    /// A pair was replaced. Doubles as the "state changed" pulse.
    Updated {
        device: String,
        pair: DevicePair,
        sync: SyncStatus,
    },
    /// The device is gone from the latest `init` table.
    Removed { device: String },
    /// A new activity entry was inserted at the head of the log.
    Activity(ActivityEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkNotice {
    Connected,
    Disconnected { retry_in: Duration },
}

#[derive(Debug, Default)]
pub struct ReconciliationModel {
    devices: BTreeMap<String, DevicePair>,
    activity: ActivityLog,
    stream_seen: bool,
    snapshot_applied: bool,
}

impl ReconciliationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table from the REST listing. Ignored once any stream message
    /// has been applied, and applied at most once.
    pub fn apply_snapshot(
        &mut self,
        blueprints: &[Blueprint],
        kind: &str,
        now: DateTime<Utc>,
    ) -> Vec<ModelChange> {
        if self.stream_seen || self.snapshot_applied {
            debug!(
                stream_seen = self.stream_seen,
                "discarding REST snapshot, table already seeded"
            );
            return Vec::new();
        }
        self.snapshot_applied = true;

        let mut changes = Vec::new();
        for blueprint in blueprints.iter().filter(|b| b.is_kind(kind)) {
            self.replace(
                blueprint.device_id().to_owned(),
                blueprint.pair(),
                now,
                &mut changes,
            );
        }
        changes
    }

    pub fn apply_frame(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ModelChange>, MalformedMessage> {
        let message = RelayedMessage::parse(text)?;
        Ok(self.apply_message(message, now))
    }

    pub fn apply_message(
        &mut self,
        message: RelayedMessage,
        now: DateTime<Utc>,
    ) -> Vec<ModelChange> {
        self.stream_seen = true;
        let mut changes = Vec::new();
        match message {
            RelayedMessage::Init { devices } => {
                let gone: Vec<String> = self
                    .devices
                    .keys()
                    .filter(|id| !devices.contains_key(*id))
                    .cloned()
                    .collect();
                for device in gone {
                    self.devices.remove(&device);
                    changes.push(ModelChange::Removed { device });
                }
                for (device, pair) in devices {
                    self.replace(device, pair, now, &mut changes);
                }
            }
            RelayedMessage::Update {
                device,
                spec,
                status,
            } => {
                self.replace(device, DevicePair::new(spec, status), now, &mut changes);
            }
        }
        changes
    }

    pub fn note_link(&mut self, notice: LinkNotice, now: DateTime<Utc>) -> ModelChange {
        let (message, severity) = match notice {
            LinkNotice::Connected => ("Connected to reconciler".to_string(), Severity::Info),
            LinkNotice::Disconnected { retry_in } => (
                format!(
                    "Disconnected from reconciler, retrying in {:.1}s",
                    retry_in.as_secs_f64()
                ),
                Severity::Warning,
            ),
        };
        self.record(now, message, severity)
    }

    pub fn pair(&self, device: &str) -> Option<&DevicePair> {
        self.devices.get(device)
    }

    pub fn sync_status(&self, device: &str) -> SyncStatus {
        self.devices
            .get(device)
            .map_or(SyncStatus::Unknown, DevicePair::sync_status)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&str, &DevicePair)> {
        self.devices.iter().map(|(id, pair)| (id.as_str(), pair))
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    fn replace(
        &mut self,
        device: String,
        pair: DevicePair,
        now: DateTime<Utc>,
        changes: &mut Vec<ModelChange>,
    ) {
        let previous = self.devices.get(&device);
        let had_previous = previous.is_some();
        let prev_desired = previous.and_then(|p| p.desired_version()).map(str::to_owned);
        let prev_actual = previous.and_then(|p| p.actual_version()).map(str::to_owned);
        let prev_sync = previous.map(DevicePair::sync_status);

        let desired = pair.desired_version();
        let actual = pair.actual_version();
        let sync = pair.sync_status();

        if let Some(prev) = prev_desired.as_deref() {
            if Some(prev) != desired {
                let entry = self.record(
                    now,
                    format!(
                        "{device}: desired version {prev} -> {}",
                        desired.unwrap_or("none")
                    ),
                    Severity::Info,
                );
                changes.push(entry);
            }
        }

        let version_changed = had_previous
            && (prev_desired.as_deref() != desired || prev_actual.as_deref() != actual);

        if sync == SyncStatus::Synced {
            if prev_sync != Some(SyncStatus::Synced) && version_changed {
                let entry = self.record(
                    now,
                    format!("{device}: deployed version {}", desired.unwrap_or("none")),
                    Severity::Success,
                );
                changes.push(entry);
            }
        } else if let Some(actual) = actual {
            if Some(actual) != desired {
                let entry = self.record(
                    now,
                    format!(
                        "{device}: reconciling {actual} -> {}",
                        desired.unwrap_or("none")
                    ),
                    Severity::InProgress,
                );
                changes.push(entry);
            }
        }

        self.devices.insert(device.clone(), pair.clone());
        changes.push(ModelChange::Updated { device, pair, sync });
    }

    fn record(&mut self, now: DateTime<Utc>, message: String, severity: Severity) -> ModelChange {
        let entry = ActivityEntry {
            timestamp: now,
            message,
            severity,
        };
        self.activity.push(entry.clone());
        ModelChange::Activity(entry)
    }
}
