pub mod approved_simulation_service;
pub mod error_classifier_service;
pub mod flow_service;
pub mod lead_service;
pub mod link_service;
pub mod metrics_service;
pub mod partner_service;
pub mod phone_service;
pub mod response_shape_service;
pub mod retry_service;
pub mod signature_queue_service;
pub mod subject_service;
pub mod token_service;
pub mod webhook_service;
