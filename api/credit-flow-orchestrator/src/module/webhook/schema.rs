use crate::service::response_shape_service::first_string;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Callback body as sent by the partner. Only the event name and the operation
/// id are interpreted; everything else is kept as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartnerCallback {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartnerCallback {
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref().or(self.kind.as_deref())
    }

    pub fn operation_id(&self) -> Option<String> {
        first_string(&Value::Object(self.extra.clone()), &["operacaoId", "id", "operationId"])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    OperationApproved,
    OperationRejected,
    StatusChanged,
    Unknown,
}

impl WebhookEvent {
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("operacao_aprovada") => Self::OperationApproved,
            Some("operacao_rejeitada") => Self::OperationRejected,
            Some("status_alterado") => Self::StatusChanged,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub event: Option<WebhookEvent>,
    pub operation_id: Option<String>,
    pub error_code: Option<String>,
    pub reason: String,
}
