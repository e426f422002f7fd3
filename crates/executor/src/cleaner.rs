//! Page cleaner: dismiss consent banners, close modals, hide overlays.
//!
//! Pages under automation routinely open with a cookie wall or newsletter
//! modal covering the content the model needs to see. Each candidate
//! selector is tried with a short timeout and failures are ignored; the
//! catalog errs on the side of clicking close buttons that are not there.

use std::{sync::Arc, time::Duration};

use {tracing::debug, vision_browser::BrowserCapability};

/// Known consent-accept and dismiss buttons, in rough order of frequency.
pub(crate) const CONSENT_SELECTORS: &[&str] = &[
    // Dedicated consent platforms
    "#onetrust-accept-btn-handler",
    "#truste-consent-button",
    ".cc-accept",
    ".cc-allow",
    ".cc-dismiss",
    "#didomi-notice-agree-button",
    ".didomi-continue-without-agreeing",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    ".qc-cmp2-summary-buttons > button[mode=\"primary\"]",
    "#sp-cc-accept",
    ".fc-cta-consent",
    // Generic accept buttons
    "button[id*=\"accept\"]",
    "button[class*=\"accept\"]",
    "button[id*=\"consent\"]",
    "button[class*=\"consent\"]",
    "button[id*=\"agree\"]",
    "button[class*=\"agree\"]",
    "button[aria-label=\"Accept cookies\"]",
    "[data-testid=\"cookie-accept\"]",
    "[data-testid=\"uc-accept-all-button\"]",
    "[data-cookiebanner=\"accept_button\"]",
];

/// Close buttons for modals and overlays.
pub(crate) const CLOSE_SELECTORS: &[&str] = &[
    "[aria-label=\"Close\"]",
    "[aria-label=\"close\"]",
    "[aria-label=\"Dismiss\"]",
    "button.close",
    ".modal-close",
    ".popup-close",
    ".overlay-close",
    "[data-dismiss=\"modal\"]",
    "[data-testid=\"close-button\"]",
    ".newsletter-popup [class*=\"close\"]",
];

/// Per-candidate budget; the whole pass stays under a couple of seconds
/// even on pages where every probe misses.
const CANDIDATE_TIMEOUT: Duration = Duration::from_millis(250);

/// One cleaning pass. Returns how many candidates matched and were
/// clicked.
pub async fn run(capability: &Arc<dyn BrowserCapability>, session_id: &str) -> usize {
    let mut dismissed = 0;

    for selector in CONSENT_SELECTORS.iter().chain(CLOSE_SELECTORS) {
        let click = format!(
            "(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.click();
                return true;
            }})()",
            serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into())
        );

        let outcome = tokio::time::timeout(
            CANDIDATE_TIMEOUT,
            capability.evaluate(session_id, &click),
        )
        .await;

        if let Ok(Ok(value)) = outcome
            && value.as_bool() == Some(true)
        {
            debug!(selector, "dismissed overlay element");
            dismissed += 1;
            // Give the page a beat to tear the overlay down.
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    if dismissed > 0 {
        debug!(dismissed, "page cleaner pass complete");
    }
    dismissed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_no_duplicate_selectors() {
        let mut all: Vec<&str> = CONSENT_SELECTORS.iter().chain(CLOSE_SELECTORS).copied().collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before);
    }

    #[test]
    fn selectors_serialize_into_valid_js_strings() {
        for selector in CONSENT_SELECTORS.iter().chain(CLOSE_SELECTORS) {
            let encoded = serde_json::to_string(selector).unwrap_or_default();
            assert!(encoded.starts_with('"') && encoded.ends_with('"'), "{selector}");
        }
    }
}
