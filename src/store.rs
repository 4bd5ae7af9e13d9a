//! The persistent active-alert set.
//!
//! One JSON array in `alerts.json`, owned by a single writer. Every
//! mutation is a full replacement of the affected records followed by a
//! persist and a change broadcast; readers take point-in-time snapshots.

use crate::alert::Alert;
use crate::bus::{Bus, EventKind};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct Store {
    path: PathBuf,
    alerts: Mutex<Vec<Alert>>,
    bus: Bus,
}

impl Store {
    /// Open the store, reading whatever `path` holds. A missing or empty
    /// file starts empty; malformed content is logged and discarded rather
    /// than aborting startup.
    pub fn open(path: &Path, bus: Bus) -> Self {
        let alerts = match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => match serde_json::from_str::<Vec<Alert>>(&raw) {
                Ok(alerts) => alerts,
                Err(e) => {
                    warn!("{} is malformed ({}); starting empty", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        info!("loaded {} active alerts from {}", alerts.len(), path.display());

        Self {
            path: path.to_path_buf(),
            alerts: Mutex::new(alerts),
            bus,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub async fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.alerts.lock().await.len()
    }

    /// Replace-or-append each record by id, persist once, and publish one
    /// event per record: `NEW` for ids not previously present, `UPDATE`
    /// otherwise.
    ///
    /// With `inherit_geometry`, an incoming record without geometry keeps
    /// the geometry of the record it replaces.
    pub async fn upsert(&self, records: Vec<Alert>, inherit_geometry: bool) -> crate::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut alerts = self.alerts.lock().await;
        let mut events = Vec::with_capacity(records.len());

        for mut record in records {
            let existing = alerts.iter().position(|a| a.id == record.id);

            if let Some(index) = existing {
                let previous = alerts.remove(index);
                if inherit_geometry && record.geometry.is_empty() {
                    record.geometry = previous.geometry;
                }
            }

            let kind = if existing.is_some() {
                EventKind::Update
            } else {
                EventKind::New
            };
            events.push((kind, serde_json::to_value(&record).unwrap_or_default()));
            alerts.push(record);
        }

        self.persist(&alerts).await?;
        drop(alerts);

        for (kind, data) in events {
            self.bus.publish(kind, data);
        }
        Ok(())
    }

    /// Remove one record by id. Returns whether anything was removed.
    pub async fn delete_by_id(&self, id: &str) -> crate::Result<bool> {
        let mut alerts = self.alerts.lock().await;
        let Some(index) = alerts.iter().position(|a| a.id == id) else {
            return Ok(false);
        };

        let removed = alerts.remove(index);
        self.persist(&alerts).await?;
        drop(alerts);

        self.bus.publish(
            EventKind::Update,
            serde_json::to_value(&removed).unwrap_or_default(),
        );
        Ok(true)
    }

    /// Remove the first record matching a VTEC identity
    /// `office.phenomena.significance.etn`. Returns the removed id.
    pub async fn delete_by_vtec_key(&self, key: &str) -> crate::Result<Option<String>> {
        let mut alerts = self.alerts.lock().await;
        let Some(index) = alerts.iter().position(|a| a.matches_vtec_key(key)) else {
            debug!("no active alert for VTEC key {}", key);
            return Ok(None);
        };

        let removed = alerts.remove(index);
        self.persist(&alerts).await?;
        drop(alerts);

        let id = removed.id.clone();
        self.bus.publish(
            EventKind::Update,
            serde_json::to_value(&removed).unwrap_or_default(),
        );
        Ok(Some(id))
    }

    /// Drop every record whose expiry has passed. One bulk `UPDATE` carries
    /// the removed ids.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> crate::Result<Vec<String>> {
        let mut alerts = self.alerts.lock().await;
        let removed: Vec<String> = alerts
            .iter()
            .filter(|a| a.is_expired(now))
            .map(|a| a.id.clone())
            .collect();

        if removed.is_empty() {
            return Ok(removed);
        }

        alerts.retain(|a| !a.is_expired(now));
        self.persist(&alerts).await?;
        drop(alerts);

        info!("swept {} expired alerts", removed.len());
        self.bus.publish(
            EventKind::Update,
            serde_json::json!({ "removed": removed }),
        );
        Ok(removed)
    }

    /// Startup hygiene: when several records share an id, keep only the
    /// latest-issued one. Records without an id are kept as-is.
    pub async fn apply_startup_filter(&self) -> crate::Result<()> {
        let mut alerts = self.alerts.lock().await;

        let mut kept: Vec<Alert> = Vec::with_capacity(alerts.len());
        for alert in alerts.drain(..) {
            if alert.id.is_empty() {
                kept.push(alert);
                continue;
            }
            match kept
                .iter()
                .position(|k| !k.id.is_empty() && k.id == alert.id)
            {
                Some(index) if kept[index].issued < alert.issued => kept[index] = alert,
                Some(_) => {}
                None => kept.push(alert),
            }
        }

        *alerts = kept;
        self.persist(&alerts).await?;
        Ok(())
    }

    async fn persist(&self, alerts: &[Alert]) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(alerts)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, json).await
    }
}
