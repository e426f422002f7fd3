//! Browser driving for vision: an abstract capability implemented by a
//! local headless Chromium and by remote cloud providers, plus the bounded
//! worker pools that multiplex sessions across capture and AI-task work.
//!
//! # Surfaces
//!
//! - [`BrowserCapability`]: create/close sessions, navigate, act,
//!   screenshot, evaluate, extract interactive elements
//! - [`LocalBrowser`] / [`CloudBrowser`]: the two variant families,
//!   identical to callers
//! - [`WorkerPool`]: pre-warmed checkout/checkin with health and
//!   staleness handling
//! - [`KeyedPools`]: one capture pool per (browser family, viewport)

pub mod capability;
pub mod cloud;
pub mod error;
pub mod extract;
pub mod keyed;
pub mod local;
pub mod pool;
pub mod registry;
mod session;
pub mod types;

pub use {
    capability::BrowserCapability,
    cloud::{CloudBrowser, CloudProviderKind},
    error::{Error as BrowserError, Result},
    keyed::{KeyedPools, PoolKey},
    local::{LocalBrowser, LocalBrowserConfig},
    pool::{PoolConfig, WorkerHandle, WorkerPool},
    registry::BrowserRegistry,
    types::{
        BrowserAction, ElementExtraction, ElementKind, ExtractedElement, ScrollDirection,
        SessionSpec, Viewport,
    },
};
