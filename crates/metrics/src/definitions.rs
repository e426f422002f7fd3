//! Metric name and label definitions.
//!
//! All metric names used throughout vision are defined here so the set of
//! exported series is documented in one place.

/// Capture and comparison pipeline metrics
pub mod capture {
    /// Total snapshots captured
    pub const SNAPSHOTS_TOTAL: &str = "vision_capture_snapshots_total";
    /// Capture failures
    pub const FAILURES_TOTAL: &str = "vision_capture_failures_total";
    /// Capture duration in seconds
    pub const DURATION_SECONDS: &str = "vision_capture_duration_seconds";
    /// Total comparisons computed
    pub const COMPARISONS_TOTAL: &str = "vision_comparisons_total";
    /// Comparisons that exceeded their threshold
    pub const COMPARISONS_FAILED_TOTAL: &str = "vision_comparisons_failed_total";
    /// Test runs reaching a terminal state
    pub const RUNS_COMPLETED_TOTAL: &str = "vision_test_runs_completed_total";
}

/// Worker pool metrics
pub mod pool {
    /// Successful worker checkouts
    pub const CHECKOUTS_TOTAL: &str = "vision_pool_checkouts_total";
    /// Checkouts that timed out
    pub const CHECKOUT_TIMEOUTS_TOTAL: &str = "vision_pool_checkout_timeouts_total";
    /// Workers reinitialized because they were stale or unhealthy
    pub const REFRESHES_TOTAL: &str = "vision_pool_refreshes_total";
    /// Currently checked-out workers
    pub const WORKERS_BUSY: &str = "vision_pool_workers_busy";
}

/// LLM metrics
pub mod llm {
    /// Total LLM completions requested
    pub const COMPLETIONS_TOTAL: &str = "vision_llm_completions_total";
    /// Completion errors
    pub const COMPLETION_ERRORS_TOTAL: &str = "vision_llm_completion_errors_total";
    /// Total input tokens processed
    pub const INPUT_TOKENS_TOTAL: &str = "vision_llm_input_tokens_total";
    /// Total output tokens generated
    pub const OUTPUT_TOKENS_TOTAL: &str = "vision_llm_output_tokens_total";
    /// Completion duration in seconds
    pub const COMPLETION_DURATION_SECONDS: &str = "vision_llm_completion_duration_seconds";
}

/// AI task executor metrics
pub mod executor {
    /// Steps executed across all tasks
    pub const STEPS_TOTAL: &str = "vision_executor_steps_total";
    /// Tasks reaching a terminal state, labeled by status
    pub const TASKS_COMPLETED_TOTAL: &str = "vision_executor_tasks_completed_total";
    /// Action cache hits during execution
    pub const CACHE_HITS_TOTAL: &str = "vision_executor_cache_hits_total";
}

/// Vault / credential metrics
pub mod vault {
    /// Secret fetches
    pub const FETCHES_TOTAL: &str = "vision_vault_fetches_total";
    /// Fetch failures
    pub const FETCH_ERRORS_TOTAL: &str = "vision_vault_fetch_errors_total";
}

/// HTTP gateway metrics
pub mod http {
    /// Total HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "vision_http_requests_total";
    /// Request duration in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "vision_http_request_duration_seconds";
}
