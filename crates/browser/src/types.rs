//! Browser action types and session specifications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Everything needed to open a browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSpec {
    pub viewport: Viewport,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub has_touch: bool,
    pub user_agent: Option<String>,
}

impl Default for SessionSpec {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_scale_factor: 1.0,
            mobile: false,
            has_touch: false,
            user_agent: None,
        }
    }
}

/// Named scroll targets accepted alongside explicit pixel deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    PageUp,
    PageDown,
    Top,
    Bottom,
}

/// Browser action to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    /// Click at explicit coordinates or on a selector's center.
    Click {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },

    /// Click at explicit coordinates.
    ClickAt { x: f64, y: f64 },

    /// Type text via keystrokes into the focused element, or into a
    /// selector after clicking it.
    Type {
        #[serde(default)]
        selector: Option<String>,
        text: String,
    },

    /// Set a field's value directly.
    Fill { selector: String, value: String },

    Hover {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },

    /// Scroll by a named direction or an explicit pixel delta.
    Scroll {
        #[serde(default)]
        direction: Option<ScrollDirection>,
        #[serde(default)]
        dx: Option<i64>,
        #[serde(default)]
        dy: Option<i64>,
    },

    ScrollIntoView { selector: String },

    /// Choose an option in a `<select>`.
    Select { selector: String, value: String },

    /// Sleep for the given number of milliseconds.
    Wait { ms: u64 },

    /// Press a key (e.g. "Enter", "Tab", "Escape").
    Press { key: String },

    Focus { selector: String },

    /// Empty an input's value.
    Clear { selector: String },

    Check { selector: String },

    Uncheck { selector: String },

    Navigate { url: String },
}

impl fmt::Display for BrowserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click { selector, x, y } => match (selector, x, y) {
                (Some(s), ..) => write!(f, "click({s})"),
                (None, Some(x), Some(y)) => write!(f, "click({x}, {y})"),
                _ => write!(f, "click"),
            },
            Self::ClickAt { x, y } => write!(f, "click_at({x}, {y})"),
            Self::Type { selector, text } => match selector {
                Some(s) => write!(f, "type({s}, {} chars)", text.len()),
                None => write!(f, "type({} chars)", text.len()),
            },
            Self::Fill { selector, .. } => write!(f, "fill({selector})"),
            Self::Hover { selector, .. } => match selector {
                Some(s) => write!(f, "hover({s})"),
                None => write!(f, "hover"),
            },
            Self::Scroll { direction, dx, dy } => match direction {
                Some(d) => write!(f, "scroll({d:?})"),
                None => write!(f, "scroll({}, {})", dx.unwrap_or(0), dy.unwrap_or(0)),
            },
            Self::ScrollIntoView { selector } => write!(f, "scroll_into_view({selector})"),
            Self::Select { selector, .. } => write!(f, "select({selector})"),
            Self::Wait { ms } => write!(f, "wait({ms}ms)"),
            Self::Press { key } => write!(f, "press({key})"),
            Self::Focus { selector } => write!(f, "focus({selector})"),
            Self::Clear { selector } => write!(f, "clear({selector})"),
            Self::Check { selector } => write!(f, "check({selector})"),
            Self::Uncheck { selector } => write!(f, "uncheck({selector})"),
            Self::Navigate { url } => write!(f, "navigate({url})"),
        }
    }
}

impl BrowserAction {
    /// Short machine name used for step records and the action cache.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::ClickAt { .. } => "click_at",
            Self::Type { .. } => "type",
            Self::Fill { .. } => "fill",
            Self::Hover { .. } => "hover",
            Self::Scroll { .. } => "scroll",
            Self::ScrollIntoView { .. } => "scroll_into_view",
            Self::Select { .. } => "select",
            Self::Wait { .. } => "wait",
            Self::Press { .. } => "press",
            Self::Focus { .. } => "focus",
            Self::Clear { .. } => "clear",
            Self::Check { .. } => "check",
            Self::Uncheck { .. } => "uncheck",
            Self::Navigate { .. } => "navigate",
        }
    }
}

/// Classification of an extracted interactive element, which also decides
/// its reference-token prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Input,
    Link,
    Checkbox,
    Select,
    Other,
}

impl ElementKind {
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Self::Button => "BTN",
            Self::Input => "IN",
            Self::Link => "LNK",
            Self::Checkbox => "CHK",
            Self::Select => "SEL",
            Self::Other => "EL",
        }
    }
}

/// One visible interactive element with its assigned reference token.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedElement {
    /// Short typed token, e.g. `BTN3` or `CHK1`.
    pub ref_token: String,
    pub kind: ElementKind,
    pub tag: String,
    pub text: Option<String>,
    /// Bounding-box center, viewport coordinates.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Extraction result: elements in document order plus the viewport they
/// were measured against.
#[derive(Debug, Clone, Serialize)]
pub struct ElementExtraction {
    pub elements: Vec<ExtractedElement>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl ElementExtraction {
    /// Resolve a reference token back to its element.
    pub fn resolve(&self, ref_token: &str) -> Option<&ExtractedElement> {
        self.elements.iter().find(|e| e.ref_token == ref_token)
    }
}
