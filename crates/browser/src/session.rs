//! One live CDP-attached browser session: a launched or connected browser,
//! its event-handler task, and a single page. Local and cloud variants
//! build these differently but drive them through the same operations.

use std::time::{Duration, Instant};

use {
    chromiumoxide::{
        Browser, Page,
        cdp::browser_protocol::{
            emulation::SetDeviceMetricsOverrideParams,
            input::{
                DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                DispatchMouseEventType, MouseButton,
            },
            network::ClearBrowserCookiesParams,
            page::CaptureScreenshotFormat,
        },
        page::ScreenshotParams,
    },
    tokio::task::JoinHandle,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    extract::{self, EXTRACT_ELEMENTS_JS},
    types::{BrowserAction, ElementExtraction, ScrollDirection, SessionSpec, Viewport},
};

pub(crate) struct CdpSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

/// Shared session registry used by every capability variant. Sessions are
/// handed out as `Arc` clones; closing removes the entry and tears the
/// browser down once no operation still holds it.
#[derive(Default)]
pub(crate) struct SessionMap {
    inner: dashmap::DashMap<String, std::sync::Arc<CdpSession>>,
}

impl SessionMap {
    pub(crate) fn insert(&self, session_id: String, session: std::sync::Arc<CdpSession>) {
        self.inner.insert(session_id, session);
    }

    pub(crate) fn get(&self, session_id: &str) -> Result<std::sync::Arc<CdpSession>> {
        self.inner
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub(crate) async fn remove_and_close(&self, session_id: &str) {
        if let Some((_, session)) = self.inner.remove(session_id) {
            match std::sync::Arc::try_unwrap(session) {
                Ok(session) => session.close().await,
                // An in-flight operation still holds the session; the
                // browser is torn down when the last clone drops.
                Err(_still_shared) => {},
            }
            debug!(session_id, "closed browser session");
        }
    }
}

impl CdpSession {
    /// Wrap an attached browser: open its working page, apply the session
    /// spec, and keep the handler task so it can be torn down with us.
    pub(crate) async fn attach(
        browser: Browser,
        handler: JoinHandle<()>,
        spec: &SessionSpec,
    ) -> Result<Self> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        let session = Self {
            browser,
            page,
            handler,
        };
        session.apply_viewport(spec).await?;
        Ok(session)
    }

    async fn apply_viewport(&self, spec: &SessionSpec) -> Result<()> {
        let cmd = SetDeviceMetricsOverrideParams::builder()
            .width(spec.viewport.width as i64)
            .height(spec.viewport.height as i64)
            .device_scale_factor(spec.device_scale_factor)
            .mobile(spec.mobile)
            .build()
            .map_err(|e| Error::Cdp(e.to_string()))?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    pub(crate) async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let cmd = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| Error::Cdp(e.to_string()))?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    pub(crate) async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;
        // Network-idle settle; navigation already committed if this fails.
        let _ = self.page.wait_for_navigation().await;
        Ok(())
    }

    pub(crate) async fn wait_for_navigation(&self) -> Result<()> {
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    pub(crate) async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(full_page)
                    .build(),
            )
            .await
            .map_err(|e| Error::ScreenshotFailed(e.to_string()))
    }

    pub(crate) async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))
    }

    pub(crate) async fn url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?
            .unwrap_or_default())
    }

    pub(crate) async fn title(&self) -> Result<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?
            .unwrap_or_default())
    }

    pub(crate) async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| Error::JsEvalFailed(e.to_string()))?
            .into_value()
            .map_err(|e| Error::JsEvalFailed(format!("failed to read result: {e:?}")))
    }

    pub(crate) async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        let check = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector).map_err(|e| Error::InvalidSelector(e.to_string()))?
        );

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            let found: bool = self.evaluate(&check).await?.as_bool().unwrap_or(false);
            if found {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Err(Error::Timeout(format!(
            "selector {selector} not found after {timeout_ms}ms"
        )))
    }

    pub(crate) async fn is_alive(&self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.page.evaluate("1 + 1")).await,
            Ok(Ok(_))
        )
    }

    pub(crate) async fn extract_elements(&self) -> Result<ElementExtraction> {
        let value = self.evaluate(EXTRACT_ELEMENTS_JS).await?;
        extract::parse_extraction(&value)
    }

    pub(crate) async fn clear_cookies(&self) -> Result<()> {
        self.page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }

    /// Reset to a neutral state between uses: blank page, no cookies.
    pub(crate) async fn reset(&self) -> Result<()> {
        self.navigate("about:blank").await?;
        self.clear_cookies().await
    }

    pub(crate) async fn close(mut self) {
        let _ = self.browser.close().await;
        self.handler.abort();
    }

    // ── Actions ─────────────────────────────────────────────────────────

    pub(crate) async fn perform(&self, action: &BrowserAction) -> Result<()> {
        debug!(action = %action, "performing browser action");
        match action {
            BrowserAction::Click { selector, x, y } => match (x, y, selector) {
                (Some(x), Some(y), _) => self.click_at(*x, *y).await,
                (_, _, Some(selector)) => {
                    let (x, y) = self.selector_center(selector).await?;
                    self.click_at(x, y).await
                },
                _ => Err(Error::InvalidAction(
                    "click requires coordinates or a selector".into(),
                )),
            },
            BrowserAction::ClickAt { x, y } => self.click_at(*x, *y).await,
            BrowserAction::Type { selector, text } => {
                if let Some(selector) = selector {
                    let (x, y) = self.selector_center(selector).await?;
                    self.click_at(x, y).await?;
                }
                self.type_text(text).await
            },
            BrowserAction::Fill { selector, value } => self.fill(selector, value).await,
            BrowserAction::Hover { selector, x, y } => {
                let (x, y) = match (x, y, selector) {
                    (Some(x), Some(y), _) => (*x, *y),
                    (_, _, Some(selector)) => self.selector_center(selector).await?,
                    _ => {
                        return Err(Error::InvalidAction(
                            "hover requires coordinates or a selector".into(),
                        ));
                    },
                };
                self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y, false).await
            },
            BrowserAction::Scroll { direction, dx, dy } => self.scroll(*direction, *dx, *dy).await,
            BrowserAction::ScrollIntoView { selector } => {
                let js = format!(
                    "(() => {{ const el = document.querySelector({sel});
                       if (!el) return false;
                       el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
                       return true; }})()",
                    sel = js_string(selector)?
                );
                self.require_element(selector, &js).await
            },
            BrowserAction::Select { selector, value } => {
                let js = format!(
                    "(() => {{ const el = document.querySelector({sel});
                       if (!el) return false;
                       el.value = {val};
                       el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                       return true; }})()",
                    sel = js_string(selector)?,
                    val = js_string(value)?
                );
                self.require_element(selector, &js).await
            },
            BrowserAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            },
            BrowserAction::Press { key } => self.press_key(key).await,
            BrowserAction::Focus { selector } => {
                let js = format!(
                    "(() => {{ const el = document.querySelector({sel});
                       if (!el) return false; el.focus(); return true; }})()",
                    sel = js_string(selector)?
                );
                self.require_element(selector, &js).await
            },
            BrowserAction::Clear { selector } => {
                let js = format!(
                    "(() => {{ const el = document.querySelector({sel});
                       if (!el) return false;
                       el.value = '';
                       el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                       return true; }})()",
                    sel = js_string(selector)?
                );
                self.require_element(selector, &js).await
            },
            BrowserAction::Check { selector } => self.set_checked(selector, true).await,
            BrowserAction::Uncheck { selector } => self.set_checked(selector, false).await,
            BrowserAction::Navigate { url } => self.navigate(url).await,
        }
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, x, y, true).await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, x, y, true).await
    }

    async fn dispatch_mouse(
        &self,
        event: DispatchMouseEventType,
        x: f64,
        y: f64,
        with_button: bool,
    ) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(event).x(x).y(y);
        if with_button {
            builder = builder.button(MouseButton::Left).click_count(1);
        }
        let cmd = builder.build().map_err(|e| Error::Cdp(e.to_string()))?;
        self.page.execute(cmd).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        for c in text.chars() {
            for event in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
                let cmd = DispatchKeyEventParams::builder()
                    .r#type(event)
                    .text(c.to_string())
                    .build()
                    .map_err(|e| Error::Cdp(e.to_string()))?;
                self.page.execute(cmd).await?;
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        for event in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder().r#type(event).key(key.to_string());
            // Plain characters also need a text payload to register.
            if key.chars().count() == 1 {
                builder = builder.text(key.to_string());
            } else if key == "Enter" {
                builder = builder.text("\r".to_string());
            }
            let cmd = builder.build().map_err(|e| Error::Cdp(e.to_string()))?;
            self.page.execute(cmd).await?;
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({sel});
               if (!el) return false;
               el.focus();
               el.value = {val};
               el.dispatchEvent(new Event('input', {{ bubbles: true }}));
               el.dispatchEvent(new Event('change', {{ bubbles: true }}));
               return true; }})()",
            sel = js_string(selector)?,
            val = js_string(value)?
        );
        self.require_element(selector, &js).await
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({sel});
               if (!el) return false;
               if (el.checked !== {checked}) el.click();
               return true; }})()",
            sel = js_string(selector)?
        );
        self.require_element(selector, &js).await
    }

    async fn scroll(
        &self,
        direction: Option<ScrollDirection>,
        dx: Option<i64>,
        dy: Option<i64>,
    ) -> Result<()> {
        let js = match direction {
            Some(ScrollDirection::Up) => "window.scrollBy(0, -250); true".to_string(),
            Some(ScrollDirection::Down) => "window.scrollBy(0, 250); true".to_string(),
            Some(ScrollDirection::PageUp) => {
                "window.scrollBy(0, -window.innerHeight); true".to_string()
            },
            Some(ScrollDirection::PageDown) => {
                "window.scrollBy(0, window.innerHeight); true".to_string()
            },
            Some(ScrollDirection::Top) => "window.scrollTo(0, 0); true".to_string(),
            Some(ScrollDirection::Bottom) => {
                "window.scrollTo(0, document.body.scrollHeight); true".to_string()
            },
            None => format!(
                "window.scrollBy({}, {}); true",
                dx.unwrap_or(0),
                dy.unwrap_or(0)
            ),
        };
        self.evaluate(&js).await?;
        Ok(())
    }

    /// Center of the first element matching a selector.
    pub(crate) async fn selector_center(&self, selector: &str) -> Result<(f64, f64)> {
        let js = format!(
            "(() => {{ const el = document.querySelector({sel});
               if (!el) return null;
               const r = el.getBoundingClientRect();
               return {{ x: r.x + r.width / 2, y: r.y + r.height / 2 }}; }})()",
            sel = js_string(selector)?
        );

        let value = self.evaluate(&js).await?;
        if value.is_null() {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        let x = value["x"].as_f64().ok_or_else(|| Error::ElementNotFound(selector.to_string()))?;
        let y = value["y"].as_f64().ok_or_else(|| Error::ElementNotFound(selector.to_string()))?;
        Ok((x, y))
    }

    async fn require_element(&self, selector: &str, js: &str) -> Result<()> {
        let found = self.evaluate(js).await?.as_bool().unwrap_or(false);
        if !found {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

/// Encode a string as a JS string literal.
fn js_string(raw: &str) -> Result<String> {
    serde_json::to_string(raw).map_err(|e| Error::InvalidSelector(e.to_string()))
}
