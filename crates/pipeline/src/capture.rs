//! Screenshot capture for test runs.
//!
//! A capture resolves effective page settings, checks a worker out of the
//! profile-keyed pool, stages the page (waits, scripted actions, hide and
//! mask selectors), takes a full-page screenshot plus thumbnail, and marks
//! the snapshot captured. Failures surface as error comparisons so the
//! owning run keeps moving.

use std::{sync::Arc, time::Duration};

use {
    image::imageops::FilterType,
    tracing::{debug, info, warn},
    vision_browser::{BrowserAction, KeyedPools, PoolKey, SessionSpec, Viewport, WorkerHandle},
    vision_store::{
        BlobStore, Store,
        models::{EffectiveSettings, PreCaptureAction, Snapshot},
    },
};

use crate::error::{Error, Result};

/// Thumbnails are scaled to roughly this width, preserving aspect.
const THUMBNAIL_WIDTH: u32 = 400;

pub struct CaptureService {
    store: Store,
    blobs: Arc<dyn BlobStore>,
    pools: Arc<KeyedPools>,
}

impl CaptureService {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>, pools: Arc<KeyedPools>) -> Self {
        Self {
            store,
            blobs,
            pools,
        }
    }

    /// Capture a pending snapshot. On success the snapshot is `captured`
    /// with stored bytes and dimensions; the caller decides when to
    /// compare.
    pub async fn capture_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        let snapshot = self.store.snapshots().get(snapshot_id).await?;
        let page = self.store.pages().get(&snapshot.page_id).await?;
        let profile = self.store.profiles().get(&snapshot.browser_profile_id).await?;
        let project = self.store.projects().get(&page.project_id).await?;

        let settings = EffectiveSettings::resolve(&project.settings, &page.settings);
        let url = join_url(&project.settings.base_url, &page.url_path);

        let spec = SessionSpec {
            viewport: Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
            },
            device_scale_factor: profile.device_scale_factor,
            mobile: profile.mobile,
            has_touch: profile.has_touch,
            user_agent: profile.user_agent.clone(),
        };
        let key = PoolKey::new(
            profile.family.as_str(),
            settings.viewport_width,
            settings.viewport_height,
        );

        let pool = self.pools.pool_for(key, &spec);
        let settings_for_worker = settings.clone();
        let url_for_worker = url.clone();

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let png = pool
            .with_worker(move |worker| async move {
                stage_and_shoot(&worker, &url_for_worker, &settings_for_worker).await
            })
            .await?;

        let (width, height) = png_dimensions(&png);
        let image_key = format!("snapshots/{}.png", snapshot.id);
        let thumbnail_key = format!("snapshots/{}_thumb.png", snapshot.id);

        let thumbnail = make_thumbnail(&png)?;
        self.blobs.put(&image_key, png, "image/png").await?;
        self.blobs.put(&thumbnail_key, thumbnail, "image/png").await?;

        self.store
            .snapshots()
            .mark_captured(&snapshot.id, &image_key, Some(&thumbnail_key), width, height)
            .await?;

        #[cfg(feature = "metrics")]
        {
            vision_metrics::counter!(vision_metrics::capture::SNAPSHOTS_TOTAL).increment(1);
            vision_metrics::histogram!(vision_metrics::capture::DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        info!(snapshot_id, url, width, height, "snapshot captured");
        self.store.snapshots().get(&snapshot.id).await.map_err(Error::from)
    }
}

/// Everything that happens while holding the worker: navigate, settle,
/// scripted actions, hide/mask, screenshot.
async fn stage_and_shoot(
    worker: &WorkerHandle,
    url: &str,
    settings: &EffectiveSettings,
) -> vision_browser::Result<Vec<u8>> {
    let capability = &worker.capability;
    let session_id = &worker.session_id;

    capability.navigate(session_id, url).await?;

    if let Some(selector) = settings.wait_for_selector.as_deref() {
        capability.wait_for_selector(session_id, selector, 10_000).await?;
    }
    if settings.wait_ms > 0 {
        tokio::time::sleep(Duration::from_millis(settings.wait_ms)).await;
    }

    for action in &settings.pre_capture_actions {
        if let Err(e) = run_pre_capture_action(worker, action).await {
            // Staging actions are best-effort by contract.
            warn!(action = action.action, error = %e, "pre-capture action failed, continuing");
        }
    }

    if !settings.hide_selectors.is_empty() {
        let js = hide_selectors_js(&settings.hide_selectors);
        let _ = capability.evaluate(session_id, &js).await;
    }
    if !settings.mask_selectors.is_empty() {
        let js = mask_selectors_js(&settings.mask_selectors);
        let _ = capability.evaluate(session_id, &js).await;
    }

    capability.screenshot(session_id, true).await
}

async fn run_pre_capture_action(
    worker: &WorkerHandle,
    action: &PreCaptureAction,
) -> vision_browser::Result<()> {
    let capability = &worker.capability;
    let session_id = &worker.session_id;

    match action.action.as_str() {
        "click" => {
            let selector = action.selector.clone();
            capability
                .perform_action(
                    session_id,
                    &BrowserAction::Click {
                        selector,
                        x: None,
                        y: None,
                    },
                )
                .await
        },
        "scroll" => {
            let y = action.y.unwrap_or(0);
            capability
                .evaluate(session_id, &format!("window.scrollTo(0, {y}); true"))
                .await
                .map(|_| ())
        },
        "wait" => {
            let ms = action
                .value
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        },
        "type" => {
            capability
                .perform_action(
                    session_id,
                    &BrowserAction::Type {
                        selector: action.selector.clone(),
                        text: action.value.clone().unwrap_or_default(),
                    },
                )
                .await
        },
        "hover" => {
            capability
                .perform_action(
                    session_id,
                    &BrowserAction::Hover {
                        selector: action.selector.clone(),
                        x: None,
                        y: None,
                    },
                )
                .await
        },
        "select" => match (&action.selector, &action.value) {
            (Some(selector), Some(value)) => {
                capability
                    .perform_action(
                        session_id,
                        &BrowserAction::Select {
                            selector: selector.clone(),
                            value: value.clone(),
                        },
                    )
                    .await
            },
            _ => Err(vision_browser::BrowserError::InvalidAction(
                "select needs selector and value".into(),
            )),
        },
        other => {
            debug!(action = other, "unknown pre-capture action skipped");
            Ok(())
        },
    }
}

/// `visibility: hidden` keeps layout while blanking dynamic regions.
fn hide_selectors_js(selectors: &[String]) -> String {
    format!(
        "(sels => {{
            for (const s of sels) {{
                document.querySelectorAll(s).forEach(el => {{
                    el.style.setProperty('visibility', 'hidden', 'important');
                }});
            }}
            return true;
        }})({})",
        serde_json::to_string(selectors).unwrap_or_else(|_| "[]".into())
    )
}

/// Masked regions are painted over with a solid fill so their layout box
/// still participates in the diff.
fn mask_selectors_js(selectors: &[String]) -> String {
    format!(
        "(sels => {{
            for (const s of sels) {{
                document.querySelectorAll(s).forEach(el => {{
                    el.style.setProperty('background', '#000', 'important');
                    el.style.setProperty('color', 'transparent', 'important');
                    for (const child of el.querySelectorAll('*')) {{
                        child.style.setProperty('visibility', 'hidden', 'important');
                    }}
                }});
            }}
            return true;
        }})({})",
        serde_json::to_string(selectors).unwrap_or_else(|_| "[]".into())
    )
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// PNG dimensions live in the IHDR chunk at fixed offsets.
fn png_dimensions(png: &[u8]) -> (u32, u32) {
    if png.len() > 24 {
        let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
        let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
        (width, height)
    } else {
        (0, 0)
    }
}

fn make_thumbnail(png: &[u8]) -> Result<Vec<u8>> {
    let image = image::load_from_memory(png).map_err(vision_differ::Error::Decode)?;
    let scale = THUMBNAIL_WIDTH as f64 / image.width().max(1) as f64;
    let height = ((image.height() as f64 * scale).round() as u32).max(1);

    let thumbnail = image.resize_exact(THUMBNAIL_WIDTH, height, FilterType::Triangle);
    let mut bytes = Vec::new();
    thumbnail
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(vision_differ::Error::Encode)?;
    Ok(bytes)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_join_handles_slashes() {
        assert_eq!(join_url("https://a.dev/", "/pricing"), "https://a.dev/pricing");
        assert_eq!(join_url("https://a.dev", "pricing"), "https://a.dev/pricing");
    }

    #[test]
    fn hide_js_embeds_selectors_as_json() {
        let js = hide_selectors_js(&[".ads".into(), "#banner".into()]);
        assert!(js.contains(r#"[".ads","#));
        assert!(js.contains("visibility"));
    }

    #[test]
    fn png_dimensions_read_ihdr() {
        let img = image::RgbaImage::from_pixel(31, 17, image::Rgba([0, 0, 0, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        assert_eq!(png_dimensions(&bytes), (31, 17));
        assert_eq!(png_dimensions(&[0; 10]), (0, 0));
    }

    #[test]
    fn thumbnails_scale_to_the_target_width() {
        let img = image::RgbaImage::from_pixel(800, 600, image::Rgba([9, 9, 9, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let thumb = make_thumbnail(&bytes).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 400);
        assert_eq!(decoded.height(), 300);
    }
}
