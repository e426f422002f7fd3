//! Entity types persisted by the stores.
//!
//! Identifiers are opaque UUID strings; timestamps are unix milliseconds.
//! Status enums round-trip through lowercase strings in SQL.

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Result<Self, Error> {
                match raw {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::invalid(stringify!($name), other.to_string())),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum!(
    /// Snapshot lifecycle: created pending, captured once bytes are stored,
    /// then comparing/compared (or error).
    SnapshotStatus {
        Pending => "pending",
        Captured => "captured",
        Comparing => "comparing",
        Compared => "compared",
        Error => "error",
    }
);

status_enum!(
    TestRunStatus {
        Pending => "pending",
        Running => "running",
        Passed => "passed",
        Failed => "failed",
        Error => "error",
    }
);

impl TestRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Error)
    }
}

status_enum!(
    ComparisonStatus {
        Pending => "pending",
        Passed => "passed",
        Failed => "failed",
        Error => "error",
    }
);

status_enum!(
    ReviewStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

status_enum!(
    TaskStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Stopped => "stopped",
        Timeout => "timeout",
        Error => "error",
    }
);

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

status_enum!(
    SessionStatus {
        Initializing => "initializing",
        Active => "active",
        Idle => "idle",
        Error => "error",
        Closed => "closed",
    }
);

status_enum!(
    BrowserFamily {
        Chromium => "chromium",
        Firefox => "firefox",
        Webkit => "webkit",
    }
);

status_enum!(
    CredentialType {
        Login => "login",
        ApiKey => "api_key",
        Oauth => "oauth",
        Cookie => "cookie",
        Bearer => "bearer",
    }
);

/// Project-level defaults, stored as a JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Origin that page paths are resolved against.
    pub base_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Diff threshold as a fraction (0.0–1.0).
    pub threshold: f64,
    /// Wait after load before capture, milliseconds.
    pub wait_ms: u64,
    pub hide_selectors: Vec<String>,
    pub mask_selectors: Vec<String>,
    pub default_model: String,
    pub default_browser_provider: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            viewport_width: 1920,
            viewport_height: 1080,
            threshold: 0.01,
            wait_ms: 0,
            hide_selectors: Vec::new(),
            mask_selectors: Vec::new(),
            default_model: "claude-sonnet-4".into(),
            default_browser_provider: "local".into(),
        }
    }
}

/// One scripted interaction executed before capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCaptureAction {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Scroll target in pixels, for `scroll`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
}

/// Per-page overrides, stored as a JSON column. `None` falls back to the
/// project value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    pub wait_for_selector: Option<String>,
    pub wait_ms: Option<u64>,
    pub pre_capture_actions: Vec<PreCaptureAction>,
    pub hide_selectors: Vec<String>,
    pub mask_selectors: Vec<String>,
}

/// Capture settings after resolving page overrides against project
/// defaults. Selector lists are unioned, everything else is
/// page-first-then-project.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub wait_for_selector: Option<String>,
    pub wait_ms: u64,
    pub pre_capture_actions: Vec<PreCaptureAction>,
    pub hide_selectors: Vec<String>,
    pub mask_selectors: Vec<String>,
    pub threshold: f64,
}

impl EffectiveSettings {
    pub fn resolve(project: &ProjectSettings, page: &PageSettings) -> Self {
        let mut hide = page.hide_selectors.clone();
        hide.extend(project.hide_selectors.iter().cloned());
        hide.dedup();
        let mut mask = page.mask_selectors.clone();
        mask.extend(project.mask_selectors.iter().cloned());
        mask.dedup();

        Self {
            viewport_width: page.viewport_width.unwrap_or(project.viewport_width),
            viewport_height: page.viewport_height.unwrap_or(project.viewport_height),
            wait_for_selector: page.wait_for_selector.clone(),
            wait_ms: page.wait_ms.unwrap_or(project.wait_ms),
            pre_capture_actions: page.pre_capture_actions.clone(),
            hide_selectors: hide,
            mask_selectors: mask,
            threshold: project.threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub settings: ProjectSettings,
    #[serde(skip_serializing)]
    pub vault_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: String,
    pub project_id: String,
    pub slug: String,
    pub url_path: String,
    pub enabled: bool,
    pub settings: PageSettings,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserProfile {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub family: BrowserFamily,
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub has_touch: bool,
    pub user_agent: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Baseline {
    pub id: String,
    pub page_id: String,
    pub browser_profile_id: String,
    pub branch: String,
    pub active: bool,
    pub approved_at: Option<i64>,
    pub approved_by: Option<String>,
    pub commit_sha: Option<String>,
    pub width: u32,
    pub height: u32,
    pub image_key: String,
    pub thumbnail_key: Option<String>,
    pub created_at: i64,
}

/// Branch/commit/run context attached to a snapshot at creation.
#[derive(Debug, Clone)]
pub struct NewSnapshotContext {
    pub test_run_id: Option<String>,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub environment: Option<String>,
}

impl Default for NewSnapshotContext {
    fn default() -> Self {
        Self {
            test_run_id: None,
            branch: "main".into(),
            commit_sha: None,
            environment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub page_id: String,
    pub browser_profile_id: String,
    pub test_run_id: Option<String>,
    pub status: SnapshotStatus,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub environment: Option<String>,
    pub width: u32,
    pub height: u32,
    pub image_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub captured_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub id: String,
    pub project_id: String,
    pub status: TestRunStatus,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub environment: Option<String>,
    pub total_pages: i64,
    pub passed_count: i64,
    pub failed_count: i64,
    pub pending_count: i64,
    pub error_count: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub id: String,
    pub snapshot_id: String,
    pub baseline_id: Option<String>,
    pub test_run_id: Option<String>,
    pub status: ComparisonStatus,
    pub diff_percentage: f64,
    pub diff_pixels: i64,
    pub threshold_used: f64,
    pub within_threshold: bool,
    pub diff_image_key: Option<String>,
    pub review_status: Option<ReviewStatus>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<i64>,
    pub notes: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiTask {
    pub id: String,
    pub project_id: String,
    pub instruction: String,
    pub start_url: Option<String>,
    pub model: String,
    pub browser_provider: String,
    pub max_steps: i64,
    pub timeout_seconds: i64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub capture_screenshots: bool,
    pub status: TaskStatus,
    pub steps_executed: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub stop_requested: bool,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStep {
    pub id: String,
    pub task_id: String,
    pub position: i64,
    pub action: String,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub action_data: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub url_before: Option<String>,
    pub url_after: Option<String>,
    pub reasoning: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub screenshot_key: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserSessionRecord {
    pub id: String,
    pub project_id: String,
    pub provider: String,
    pub provider_session_id: Option<String>,
    pub status: SessionStatus,
    pub current_url: Option<String>,
    pub current_title: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionCacheEntry {
    pub id: String,
    pub project_id: String,
    pub url_pattern: String,
    pub action_type: String,
    /// Empty string when the entry is not instruction-scoped.
    pub instruction_hash: String,
    pub action_data: serde_json::Value,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_duration_ms: f64,
    pub last_used_at: i64,
    pub expires_at: i64,
    pub created_at: i64,
}

impl ActionCacheEntry {
    /// An entry is reliable when successes clearly dominate failures and it
    /// has not expired.
    pub fn is_reliable(&self, now_ms: i64) -> bool {
        self.success_count > 2 * self.failure_count && self.expires_at > now_ms
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub vault_path: String,
    pub service_url: String,
    pub credential_type: CredentialType,
    pub expires_at: Option<i64>,
    pub use_count: i64,
    pub last_used_at: Option<i64>,
    pub active: bool,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        assert_eq!(SnapshotStatus::parse("comparing").ok(), Some(SnapshotStatus::Comparing));
        assert_eq!(TestRunStatus::Passed.as_str(), "passed");
        assert!(TestRunStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TestRunStatus::Error.is_terminal());
        assert!(!TestRunStatus::Running.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn effective_settings_prefer_page_overrides() {
        let project = ProjectSettings {
            viewport_width: 1920,
            viewport_height: 1080,
            wait_ms: 100,
            hide_selectors: vec![".ads".into()],
            ..Default::default()
        };
        let page = PageSettings {
            viewport_width: Some(390),
            wait_ms: None,
            hide_selectors: vec![".banner".into()],
            ..Default::default()
        };

        let effective = EffectiveSettings::resolve(&project, &page);
        assert_eq!(effective.viewport_width, 390);
        assert_eq!(effective.viewport_height, 1080);
        assert_eq!(effective.wait_ms, 100);
        assert_eq!(effective.hide_selectors, vec![".banner".to_string(), ".ads".to_string()]);
    }

    #[test]
    fn cache_reliability_rule() {
        let mut entry = ActionCacheEntry {
            id: "e".into(),
            project_id: "p".into(),
            url_pattern: "example.com/login".into(),
            action_type: "click".into(),
            instruction_hash: String::new(),
            action_data: serde_json::json!({}),
            success_count: 5,
            failure_count: 1,
            avg_duration_ms: 0.0,
            last_used_at: 0,
            expires_at: 10_000,
            created_at: 0,
        };
        assert!(entry.is_reliable(5_000));
        // Expired entries are never reliable.
        assert!(!entry.is_reliable(10_000));
        // 5 successes vs 3 failures: 5 > 6 is false.
        entry.failure_count = 3;
        assert!(!entry.is_reliable(5_000));
    }
}
