use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static FLOWS_STARTED: AtomicU64 = AtomicU64::new(0);
static FLOWS_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static FLOWS_FAILED: AtomicU64 = AtomicU64::new(0);
static RATE_LIMIT_RETRIES: AtomicU64 = AtomicU64::new(0);
static LINK_POLL_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static SIGNATURE_JOBS: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub flows_started: u64,
    pub flows_succeeded: u64,
    pub flows_failed: u64,
    pub rate_limit_retries: u64,
    pub link_poll_attempts: u64,
    pub signature_jobs: u64,
    pub last_error_ts: i64,
}

pub fn inc_flows_started() {
    FLOWS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_flows_succeeded() {
    FLOWS_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_flows_failed() {
    FLOWS_FAILED.fetch_add(1, Ordering::Relaxed);
    set_last_error_ts(chrono::Utc::now().timestamp());
}

pub fn inc_rate_limit_retries() {
    RATE_LIMIT_RETRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_link_poll_attempts() {
    LINK_POLL_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_signature_jobs() {
    SIGNATURE_JOBS.fetch_add(1, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        flows_started: FLOWS_STARTED.load(Ordering::Relaxed),
        flows_succeeded: FLOWS_SUCCEEDED.load(Ordering::Relaxed),
        flows_failed: FLOWS_FAILED.load(Ordering::Relaxed),
        rate_limit_retries: RATE_LIMIT_RETRIES.load(Ordering::Relaxed),
        link_poll_attempts: LINK_POLL_ATTEMPTS.load(Ordering::Relaxed),
        signature_jobs: SIGNATURE_JOBS.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
