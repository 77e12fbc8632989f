//! Metrics to track
//!
//! - Counters:
//!   - Worker pool tasks submitted, completed, rejected (by reason), panicked
//!   - Log queries received, and failed (by error kind)
//!   - Filters installed (by kind), uninstalled, expired
//!   - Block cache hits and misses
//! - Gauges:
//!   - Worker pool busy workers
//!   - Worker pool queue depth
//! - Histograms:
//!   - Wait time for a backing store read permit
//!   - Block range width per log query
//!   - Log query latency

use metrics::{
    Counter, Gauge, Histogram, counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram,
};
use std::{sync::LazyLock, time::Duration};

const POOL_SUBMITTED: &str = "evmrpc.worker_pool.tasks.submitted";
const POOL_SUBMITTED_HELP: &str = "Number of tasks accepted by the worker pool";

const POOL_COMPLETED: &str = "evmrpc.worker_pool.tasks.completed";
const POOL_COMPLETED_HELP: &str = "Number of worker pool tasks that ran to completion";

const POOL_REJECTED: &str = "evmrpc.worker_pool.tasks.rejected";
const POOL_REJECTED_HELP: &str = "Number of tasks rejected by the worker pool, labeled by reason";

const POOL_PANICKED: &str = "evmrpc.worker_pool.tasks.panicked";
const POOL_PANICKED_HELP: &str = "Number of worker pool tasks that panicked";

const POOL_ACTIVE: &str = "evmrpc.worker_pool.active_workers";
const POOL_ACTIVE_HELP: &str = "Number of workers currently running a task";

const POOL_QUEUE_DEPTH: &str = "evmrpc.worker_pool.queue_depth";
const POOL_QUEUE_DEPTH_HELP: &str = "Number of tasks waiting in the worker pool queue";

const DB_PERMIT_WAIT: &str = "evmrpc.logs.db_permit_wait";
const DB_PERMIT_WAIT_HELP: &str = "Time spent waiting for a backing store read permit, in seconds";

const LOGS_REQUESTS: &str = "evmrpc.logs.requests";
const LOGS_REQUESTS_HELP: &str = "Number of log queries received";

const LOGS_ERRORS: &str = "evmrpc.logs.errors";
const LOGS_ERRORS_HELP: &str = "Number of failed log queries, labeled by error kind";

const LOGS_RANGE: &str = "evmrpc.logs.block_range";
const LOGS_RANGE_HELP: &str = "Width of the scanned block range per log query";

const LOGS_LATENCY: &str = "evmrpc.logs.latency";
const LOGS_LATENCY_HELP: &str = "Time taken to answer a log query, in seconds";

const FILTERS_INSTALLED: &str = "evmrpc.filters.installed";
const FILTERS_INSTALLED_HELP: &str = "Number of filters installed, labeled by kind";

const FILTERS_UNINSTALLED: &str = "evmrpc.filters.uninstalled";
const FILTERS_UNINSTALLED_HELP: &str = "Number of filters explicitly uninstalled";

const FILTERS_EXPIRED: &str = "evmrpc.filters.expired";
const FILTERS_EXPIRED_HELP: &str = "Number of filters removed after idling past the timeout";

const CACHE_HITS: &str = "evmrpc.block_cache.hits";
const CACHE_HITS_HELP: &str = "Number of block cache hits";

const CACHE_MISSES: &str = "evmrpc.block_cache.misses";
const CACHE_MISSES_HELP: &str = "Number of block cache misses, including expired entries";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    describe_counter!(POOL_SUBMITTED, POOL_SUBMITTED_HELP);
    describe_counter!(POOL_COMPLETED, POOL_COMPLETED_HELP);
    describe_counter!(POOL_REJECTED, POOL_REJECTED_HELP);
    describe_counter!(POOL_PANICKED, POOL_PANICKED_HELP);
    describe_counter!(LOGS_REQUESTS, LOGS_REQUESTS_HELP);
    describe_counter!(LOGS_ERRORS, LOGS_ERRORS_HELP);
    describe_counter!(FILTERS_INSTALLED, FILTERS_INSTALLED_HELP);
    describe_counter!(FILTERS_UNINSTALLED, FILTERS_UNINSTALLED_HELP);
    describe_counter!(FILTERS_EXPIRED, FILTERS_EXPIRED_HELP);
    describe_counter!(CACHE_HITS, CACHE_HITS_HELP);
    describe_counter!(CACHE_MISSES, CACHE_MISSES_HELP);

    describe_gauge!(POOL_ACTIVE, POOL_ACTIVE_HELP);
    describe_gauge!(POOL_QUEUE_DEPTH, POOL_QUEUE_DEPTH_HELP);

    describe_histogram!(DB_PERMIT_WAIT, DB_PERMIT_WAIT_HELP);
    describe_histogram!(LOGS_RANGE, LOGS_RANGE_HELP);
    describe_histogram!(LOGS_LATENCY, LOGS_LATENCY_HELP);
});

fn pool_submitted() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(POOL_SUBMITTED)
}

pub(crate) fn inc_pool_submitted() {
    pool_submitted().increment(1);
}

fn pool_completed() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(POOL_COMPLETED)
}

pub(crate) fn inc_pool_completed() {
    pool_completed().increment(1);
}

fn pool_rejected(reason: &'static str) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(POOL_REJECTED, "reason" => reason)
}

pub(crate) fn inc_pool_rejected(reason: &'static str) {
    pool_rejected(reason).increment(1);
}

fn pool_panicked() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(POOL_PANICKED)
}

pub(crate) fn inc_pool_panicked() {
    pool_panicked().increment(1);
}

fn pool_active() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(POOL_ACTIVE)
}

pub(crate) fn set_pool_active(active: usize) {
    pool_active().set(active as f64);
}

fn pool_queue_depth() -> Gauge {
    LazyLock::force(&DESCRIBE);
    gauge!(POOL_QUEUE_DEPTH)
}

pub(crate) fn set_pool_queue_depth(depth: usize) {
    pool_queue_depth().set(depth as f64);
}

fn db_permit_wait() -> Histogram {
    LazyLock::force(&DESCRIBE);
    histogram!(DB_PERMIT_WAIT)
}

pub(crate) fn record_db_permit_wait(wait: Duration) {
    db_permit_wait().record(wait.as_secs_f64());
}

fn logs_requests() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(LOGS_REQUESTS)
}

pub(crate) fn inc_logs_requests() {
    logs_requests().increment(1);
}

fn logs_errors(kind: &'static str) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(LOGS_ERRORS, "kind" => kind)
}

pub(crate) fn inc_logs_errors(kind: &'static str) {
    logs_errors(kind).increment(1);
}

fn logs_range() -> Histogram {
    LazyLock::force(&DESCRIBE);
    histogram!(LOGS_RANGE)
}

pub(crate) fn record_logs_range(blocks: u64) {
    logs_range().record(blocks as f64);
}

fn logs_latency() -> Histogram {
    LazyLock::force(&DESCRIBE);
    histogram!(LOGS_LATENCY)
}

pub(crate) fn record_logs_latency(elapsed: Duration) {
    logs_latency().record(elapsed.as_secs_f64());
}

fn filters_installed(kind: &'static str) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(FILTERS_INSTALLED, "kind" => kind)
}

pub(crate) fn inc_filters_installed(kind: &'static str) {
    filters_installed(kind).increment(1);
}

fn filters_uninstalled() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(FILTERS_UNINSTALLED)
}

pub(crate) fn inc_filters_uninstalled() {
    filters_uninstalled().increment(1);
}

fn filters_expired() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(FILTERS_EXPIRED)
}

pub(crate) fn inc_filters_expired(count: u64) {
    filters_expired().increment(count);
}

fn cache_hits() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(CACHE_HITS)
}

pub(crate) fn inc_cache_hits() {
    cache_hits().increment(1);
}

fn cache_misses() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(CACHE_MISSES)
}

pub(crate) fn inc_cache_misses() {
    cache_misses().increment(1);
}
