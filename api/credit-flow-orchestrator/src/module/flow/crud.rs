use super::model::{MarginRecord, ProgressRecord};
use super::schema::{CacheStatsView, FlowStatus};
use crate::errors::FlowError;
use crate::service::subject_service::SubjectId;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Process-local progress store keyed by subject id. Nothing here survives a
/// restart.
#[derive(Debug, Default)]
pub struct StatusCache {
    inner: Mutex<StatusCacheInner>,
}

#[derive(Debug, Default)]
struct StatusCacheInner {
    records: HashMap<SubjectId, ProgressRecord>,
    margin_by_subject: HashMap<SubjectId, MarginRecord>,
    in_flight: HashSet<SubjectId>,
}

impl StatusCache {
    /// Creates the record on first entry and always sets the in-flight marker.
    /// Re-entry keeps whatever the existing record holds.
    pub fn start_processing(
        &self,
        subject_id: &str,
        initial_fields: Map<String, Value>,
    ) -> Result<(), FlowError> {
        let id = SubjectId::parse(subject_id)?;
        let mut inner = self.lock();
        if !inner.records.contains_key(&id) {
            let mut fields = initial_fields;
            strip_reserved(&mut fields);
            inner.records.insert(
                id.clone(),
                ProgressRecord {
                    subject_id: id.clone(),
                    status: FlowStatus::Processing,
                    stage: "started".to_string(),
                    started_at: now_iso(),
                    last_updated_at: None,
                    finished_at: None,
                    fields,
                },
            );
        }
        inner.in_flight.insert(id.clone());
        info!(subject_id = %id, "processing started");
        Ok(())
    }

    pub fn is_processing(&self, subject_id: &str) -> Result<bool, FlowError> {
        let id = SubjectId::parse(subject_id)?;
        Ok(self.lock().in_flight.contains(&id))
    }

    /// Overlays `fields` onto the record and moves it to `status`/`stage`.
    /// A terminal status clears the in-flight marker and stamps `finished_at`.
    pub fn update_status(
        &self,
        subject_id: &str,
        status: FlowStatus,
        stage: &str,
        fields: Map<String, Value>,
    ) -> Result<ProgressRecord, FlowError> {
        let id = SubjectId::parse(subject_id)?;
        let now = now_iso();
        let mut inner = self.lock();
        let record = inner
            .records
            .entry(id.clone())
            .or_insert_with(|| ProgressRecord {
                subject_id: id.clone(),
                status,
                stage: stage.to_string(),
                started_at: now.clone(),
                last_updated_at: None,
                finished_at: None,
                fields: Map::new(),
            });

        let mut fields = fields;
        strip_reserved(&mut fields);
        let keys = fields.keys().cloned().collect::<Vec<_>>();
        record.fields.extend(fields);
        record.status = status;
        if !stage.is_empty() {
            record.stage = stage.to_string();
        }
        record.last_updated_at = Some(now.clone());
        if status.is_terminal() {
            record.finished_at = Some(now);
        }
        let snapshot = record.clone();
        if status.is_terminal() {
            inner.in_flight.remove(&id);
        }
        drop(inner);

        info!(
            subject_id = %id,
            status = status.as_str(),
            stage = %snapshot.stage,
            fields = ?keys,
            "status updated"
        );
        Ok(snapshot)
    }

    pub fn get_status(&self, subject_id: &str) -> Result<Option<ProgressRecord>, FlowError> {
        let id = SubjectId::parse(subject_id)?;
        Ok(self.lock().records.get(&id).cloned())
    }

    /// Stores the margin unit in its own index and overlays it onto the main
    /// record, keeping a `margin_data` snapshot there as well.
    pub fn save_margin_data(&self, subject_id: &str, data: MarginRecord) -> Result<(), FlowError> {
        let id = SubjectId::parse(subject_id)?;
        let now = now_iso();
        let data = MarginRecord {
            updated_at: Some(now.clone()),
            ..data
        };
        let overlay = margin_overlay(&data);

        let mut inner = self.lock();
        inner.margin_by_subject.insert(id.clone(), data);
        let record = inner
            .records
            .entry(id.clone())
            .or_insert_with(|| ProgressRecord {
                subject_id: id.clone(),
                status: FlowStatus::Processing,
                stage: "margin_saved".to_string(),
                started_at: now.clone(),
                last_updated_at: None,
                finished_at: None,
                fields: Map::new(),
            });
        record.fields.extend(overlay);
        record.last_updated_at = Some(now);
        drop(inner);

        info!(subject_id = %id, "margin data saved");
        Ok(())
    }

    /// Margin index first; otherwise whatever the main record can provide.
    pub fn get_margin_data(&self, subject_id: &str) -> Result<Option<MarginRecord>, FlowError> {
        let id = SubjectId::parse(subject_id)?;
        let inner = self.lock();
        if let Some(data) = inner.margin_by_subject.get(&id) {
            return Ok(Some(data.clone()));
        }
        let Some(record) = inner.records.get(&id) else {
            return Ok(None);
        };
        if let Some(snapshot) = record.fields.get("margin_data") {
            if let Ok(data) = serde_json::from_value::<MarginRecord>(snapshot.clone()) {
                return Ok(Some(data));
            }
        }
        let has_margin_fields = ["registration", "employer_id", "margin"]
            .iter()
            .any(|k| record.fields.get(*k).is_some_and(|v| !v.is_null()));
        if !has_margin_fields {
            return Ok(None);
        }
        Ok(Some(MarginRecord {
            document_id: record.field_str("document_id").unwrap_or_default().to_string(),
            registration: record.field_str("registration").unwrap_or_default().to_string(),
            employer_id: record.field_str("employer_id").unwrap_or_default().to_string(),
            document_signed: record
                .fields
                .get("document_signed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            margin: record
                .fields
                .get("margin")
                .and_then(|m| serde_json::from_value(m.clone()).ok()),
            updated_at: record.last_updated_at.clone(),
        }))
    }

    pub fn finish(&self, subject_id: &str, result: Value) -> Result<ProgressRecord, FlowError> {
        let mut fields = Map::new();
        fields.insert("result".to_string(), result);
        self.update_status(subject_id, FlowStatus::Done, "finished", fields)
    }

    pub fn mark_error(
        &self,
        subject_id: &str,
        error: &str,
        stage: &str,
    ) -> Result<ProgressRecord, FlowError> {
        let mut fields = Map::new();
        fields.insert("error".to_string(), json!(error));
        fields.insert("error_at".to_string(), json!(now_iso()));
        let stage = if stage.is_empty() { "unknown" } else { stage };
        self.update_status(subject_id, FlowStatus::Error, stage, fields)
    }

    /// Drops record, margin entry and in-flight marker. Returns whether anything
    /// was held for the subject.
    pub fn clear(&self, subject_id: &str) -> Result<bool, FlowError> {
        let id = SubjectId::parse(subject_id)?;
        let mut inner = self.lock();
        let had_record = inner.records.remove(&id).is_some();
        let had_margin = inner.margin_by_subject.remove(&id).is_some();
        let had_marker = inner.in_flight.remove(&id);
        drop(inner);
        info!(subject_id = %id, "cache cleared");
        Ok(had_record || had_margin || had_marker)
    }

    pub fn list_subjects(&self) -> Vec<String> {
        let mut subjects = self
            .lock()
            .records
            .keys()
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        subjects.sort();
        subjects
    }

    pub fn stats(&self) -> CacheStatsView {
        let inner = self.lock();
        CacheStatsView {
            total_subjects: inner.records.len(),
            processing: inner.in_flight.len(),
            margin_entries: inner.margin_by_subject.len(),
            timestamp: now_iso(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusCacheInner> {
        // every critical section leaves the maps consistent, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn margin_overlay(data: &MarginRecord) -> Map<String, Value> {
    let mut overlay = Map::new();
    overlay.insert("document_id".to_string(), json!(data.document_id));
    overlay.insert("registration".to_string(), json!(data.registration));
    overlay.insert("employer_id".to_string(), json!(data.employer_id));
    overlay.insert("document_signed".to_string(), json!(data.document_signed));
    if let Some(margin) = &data.margin {
        overlay.insert("margin".to_string(), json!(margin));
    }
    overlay.insert("margin_data".to_string(), json!(data));
    overlay
}

// These names are struct fields of the record; letting them into the flattened
// map would shadow the typed values on serialization.
fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in [
        "subject_id",
        "status",
        "stage",
        "started_at",
        "last_updated_at",
        "finished_at",
    ] {
        fields.remove(key);
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
