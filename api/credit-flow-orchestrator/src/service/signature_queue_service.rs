use crate::config::partner::SignatureConfig;
use crate::errors::FlowError;
use crate::service::metrics_service;
use crate::service::partner_service::PartnerApi;
use crate::service::subject_service::SubjectId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureOptions {
    pub timeout: Duration,
}

impl SignatureOptions {
    pub fn from_config(config: &SignatureConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureJob {
    pub subject_id: SubjectId,
    pub sign_url: String,
    pub document_id: Option<String>,
    pub options: SignatureOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOutcome {
    pub success: bool,
    pub message: String,
}

/// Accepts a signing job and resolves once the job has an outcome. An `Err`
/// means the job never reached a worker.
#[async_trait]
pub trait SignatureDispatcher: Send + Sync {
    async fn enqueue_signature(&self, job: SignatureJob) -> Result<SignatureOutcome, FlowError>;
}

/// Performs the actual signing of one job.
#[async_trait]
pub trait SignatureDriver: Send + Sync {
    async fn sign(&self, job: &SignatureJob) -> Result<(), FlowError>;
}

/// Signs through the partner's PUT endpoint using the job's document id.
pub struct PartnerSignatureDriver {
    partner: Arc<dyn PartnerApi>,
}

impl PartnerSignatureDriver {
    pub fn new(partner: Arc<dyn PartnerApi>) -> Self {
        Self { partner }
    }
}

#[async_trait]
impl SignatureDriver for PartnerSignatureDriver {
    async fn sign(&self, job: &SignatureJob) -> Result<(), FlowError> {
        let document_id = job
            .document_id
            .as_deref()
            .ok_or_else(|| FlowError::InvalidInput("signature job has no document id".to_string()))?;
        self.partner.sign_consent_document(document_id).await?;
        Ok(())
    }
}

struct QueuedJob {
    job: SignatureJob,
    reply: oneshot::Sender<SignatureOutcome>,
}

/// Bounded queue in front of the signature driver. At most `concurrency` jobs
/// run at once; each is cut off after its own timeout.
#[derive(Clone)]
pub struct SignatureQueue {
    tx: mpsc::Sender<QueuedJob>,
}

impl SignatureQueue {
    /// Spawns the dispatch loop on the current runtime.
    pub fn start(driver: Arc<dyn SignatureDriver>, config: &SignatureConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        tokio::spawn(run_dispatch_loop(rx, driver, permits));
        Self { tx }
    }
}

#[async_trait]
impl SignatureDispatcher for SignatureQueue {
    async fn enqueue_signature(&self, job: SignatureJob) -> Result<SignatureOutcome, FlowError> {
        let subject_id = job.subject_id.clone();
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(QueuedJob { job, reply })
            .await
            .map_err(|_| FlowError::SignatureDispatch("signature queue is closed".to_string()))?;
        metrics_service::inc_signature_jobs();
        info!(subject_id = %subject_id, "signature job queued");
        outcome.await.map_err(|_| {
            FlowError::SignatureDispatch("signature worker dropped the job".to_string())
        })
    }
}

async fn run_dispatch_loop(
    mut rx: mpsc::Receiver<QueuedJob>,
    driver: Arc<dyn SignatureDriver>,
    permits: Arc<Semaphore>,
) {
    while let Some(queued) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let driver = driver.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = run_job(driver.as_ref(), &queued.job).await;
            if queued.reply.send(outcome).is_err() {
                warn!(subject_id = %queued.job.subject_id, "signature caller went away");
            }
        });
    }
}

async fn run_job(driver: &dyn SignatureDriver, job: &SignatureJob) -> SignatureOutcome {
    match timeout(job.options.timeout, driver.sign(job)).await {
        Ok(Ok(())) => {
            info!(subject_id = %job.subject_id, "signature completed");
            SignatureOutcome {
                success: true,
                message: "signed".to_string(),
            }
        }
        Ok(Err(e)) => {
            warn!(subject_id = %job.subject_id, error = %e, "signature failed");
            SignatureOutcome {
                success: false,
                message: e.to_string(),
            }
        }
        Err(_) => {
            warn!(
                subject_id = %job.subject_id,
                timeout_ms = job.options.timeout.as_millis() as u64,
                "signature timed out"
            );
            SignatureOutcome {
                success: false,
                message: format!(
                    "signature timed out after {} ms",
                    job.options.timeout.as_millis()
                ),
            }
        }
    }
}
