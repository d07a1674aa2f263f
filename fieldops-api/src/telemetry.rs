use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityCounters {
    pub tickets_created: usize,
    pub tickets_taken: usize,
    pub tickets_closed: usize,
    pub tickets_cancelled: usize,
    pub transfers_sent: usize,
    pub transfers_confirmed: usize,
    pub transfers_rejected: usize,
    pub leads_ingested: usize,
    pub leads_converted: usize,
    pub permission_denials: usize,
    pub invalid_transitions: usize,
}

#[derive(Debug)]
struct TelemetryStore {
    path: PathBuf,
}

impl TelemetryStore {
    fn from_env() -> Option<Self> {
        let home = env::var_os("FIELDOPS_HOME")?;
        let mut path = PathBuf::from(home);
        path.push("telemetry.json");
        Some(Self { path })
    }

    fn read(&self) -> anyhow::Result<Option<ObservabilityCounters>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let counters = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(counters))
    }

    fn persist(&self, counters: &ObservabilityCounters) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data =
            serde_json::to_vec_pretty(counters).context("failed to encode telemetry counters")?;
        fs::write(&self.path, data)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TelemetryInner {
    counters: ObservabilityCounters,
    store: Option<TelemetryStore>,
}

impl TelemetryInner {
    fn with_store(store: Option<TelemetryStore>) -> Self {
        match store {
            Some(store) => {
                let counters = match store.read() {
                    Ok(Some(existing)) => existing,
                    Ok(None) => ObservabilityCounters::default(),
                    Err(err) => {
                        warn!(
                            path = %store.path.display(),
                            error = %err,
                            "failed to load persisted telemetry; continuing with defaults"
                        );
                        ObservabilityCounters::default()
                    }
                };
                Self {
                    counters,
                    store: Some(store),
                }
            }
            None => Self::default(),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(err) = store.persist(&self.counters)
        {
            warn!(
                path = %store.path.display(),
                error = %err,
                "failed to persist telemetry counters"
            );
        }
    }
}

/// Process-wide counters for the lifecycle events a dashboard or oncall
/// would want without scraping the audit log. No metrics/exporter wiring —
/// just a snapshot, optionally persisted to disk across restarts.
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Arc<Mutex<TelemetryInner>>,
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::from_store(None)
    }

    #[must_use]
    pub fn persistent_from_env() -> Self {
        Self::from_store(TelemetryStore::from_env())
    }

    #[must_use]
    pub fn with_store_path(path: PathBuf) -> Self {
        Self::from_store(Some(TelemetryStore { path }))
    }

    fn from_store(store: Option<TelemetryStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TelemetryInner::with_store(store))),
        }
    }

    fn update<F>(&self, mut updater: F)
    where
        F: FnMut(&mut ObservabilityCounters),
    {
        if let Ok(mut inner) = self.inner.lock() {
            updater(&mut inner.counters);
            inner.persist();
        }
    }

    pub fn record_ticket_created(&self) {
        self.update(|counters| counters.tickets_created += 1);
    }

    pub fn record_ticket_taken(&self) {
        self.update(|counters| counters.tickets_taken += 1);
    }

    pub fn record_ticket_closed(&self) {
        self.update(|counters| counters.tickets_closed += 1);
    }

    pub fn record_ticket_cancelled(&self) {
        self.update(|counters| counters.tickets_cancelled += 1);
    }

    pub fn record_transfer_sent(&self) {
        self.update(|counters| counters.transfers_sent += 1);
    }

    pub fn record_transfer_confirmation(&self, approved: bool) {
        self.update(|counters| {
            if approved {
                counters.transfers_confirmed += 1;
            } else {
                counters.transfers_rejected += 1;
            }
        });
    }

    pub fn record_lead_ingested(&self) {
        self.update(|counters| counters.leads_ingested += 1);
    }

    pub fn record_lead_converted(&self) {
        self.update(|counters| counters.leads_converted += 1);
    }

    pub fn record_permission_denied(&self) {
        self.update(|counters| counters.permission_denials += 1);
    }

    pub fn record_invalid_transition(&self) {
        self.update(|counters| counters.invalid_transitions += 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> ObservabilityCounters {
        self.inner
            .lock()
            .map(|inner| inner.counters.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.store.as_ref().map(|store| store.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn counters_accumulate() {
        let telemetry = Telemetry::new();
        telemetry.record_ticket_created();
        telemetry.record_ticket_created();
        telemetry.record_ticket_taken();
        telemetry.record_transfer_confirmation(true);
        telemetry.record_transfer_confirmation(false);
        let counters = telemetry.snapshot();
        assert_eq!(counters.tickets_created, 2);
        assert_eq!(counters.tickets_taken, 1);
        assert_eq!(counters.transfers_confirmed, 1);
        assert_eq!(counters.transfers_rejected, 1);
    }

    #[test]
    fn persistence_survives_restart() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        {
            let telemetry = Telemetry::with_store_path(path.clone());
            telemetry.record_ticket_closed();
            telemetry.record_lead_converted();
        }
        let telemetry = Telemetry::with_store_path(path);
        let counters = telemetry.snapshot();
        assert_eq!(counters.tickets_closed, 1);
        assert_eq!(counters.leads_converted, 1);
    }

    #[test]
    fn persistence_recovers_from_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        fs::write(&path, b"not json").expect("write corrupt telemetry");

        let telemetry = Telemetry::with_store_path(path.clone());
        let counters = telemetry.snapshot();
        assert_eq!(counters.tickets_created, 0);

        telemetry.record_ticket_created();
        let reloaded = Telemetry::with_store_path(path);
        assert_eq!(reloaded.snapshot().tickets_created, 1);
    }
}
