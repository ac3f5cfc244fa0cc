use crate::module::flow::model::SubjectProfile;
use crate::service::subject_service::SubjectId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedSimulation {
    pub subject_id: SubjectId,
    pub profile: SubjectProfile,
    pub saved_at: String,
}

/// Profiles of subjects whose flow completed, reused when the lead source no
/// longer returns them.
#[derive(Debug, Default)]
pub struct ApprovedSimulationStore {
    entries: Mutex<HashMap<SubjectId, ApprovedSimulation>>,
}

impl ApprovedSimulationStore {
    pub fn find_approved_simulation(&self, subject_id: &SubjectId) -> Option<ApprovedSimulation> {
        self.lock().get(subject_id).cloned()
    }

    pub fn save(&self, subject_id: &SubjectId, profile: SubjectProfile) {
        self.lock().insert(
            subject_id.clone(),
            ApprovedSimulation {
                subject_id: subject_id.clone(),
                profile,
                saved_at: Utc::now().to_rfc3339(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubjectId, ApprovedSimulation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
