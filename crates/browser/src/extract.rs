//! Interactive-element extraction.
//!
//! A single injected script walks the DOM for visible interactive elements
//! and reports raw facts (tag, input type, role, click handler, geometry).
//! Classification into element kinds and reference-token assignment happen
//! here in Rust so both can be unit-tested without a browser. Tokens are
//! assigned per kind in document order, so the same DOM always yields the
//! same references.

use serde_json::Value;

use crate::{
    error::{Error, Result},
    types::{ElementExtraction, ElementKind, ExtractedElement},
};

/// JavaScript to collect candidate interactive elements from the DOM.
pub(crate) const EXTRACT_ELEMENTS_JS: &str = r#"
(() => {
    const interactive = [
        'a', 'button', 'input', 'select', 'textarea',
        '[role="button"]', '[role="link"]', '[role="checkbox"]',
        '[role="switch"]', '[onclick]',
        '.toggle', '.switch', '.checkbox', '[class*="toggle-"]', '[class*="switch-"]'
    ];

    const seen = new Set();
    const results = [];

    function isVisible(el) {
        const rect = el.getBoundingClientRect();
        const style = getComputedStyle(el);
        return (
            rect.width > 0 &&
            rect.height > 0 &&
            style.visibility !== 'hidden' &&
            style.display !== 'none' &&
            parseFloat(style.opacity) > 0 &&
            rect.bottom >= 0 &&
            rect.right >= 0 &&
            rect.top <= window.innerHeight &&
            rect.left <= window.innerWidth
        );
    }

    function textOf(el, maxLen = 80) {
        let text = el.innerText || el.value || el.placeholder ||
                   el.getAttribute('aria-label') || '';
        text = text.trim().replace(/\s+/g, ' ');
        if (text.length > maxLen) text = text.substring(0, maxLen) + '...';
        return text || null;
    }

    for (const el of document.querySelectorAll(interactive.join(', '))) {
        if (seen.has(el)) continue;
        seen.add(el);
        if (!isVisible(el)) continue;

        const rect = el.getBoundingClientRect();
        results.push({
            tag: el.tagName.toLowerCase(),
            input_type: el.tagName === 'INPUT' ? (el.type || 'text') : null,
            role: el.getAttribute('role'),
            has_onclick: !!el.getAttribute('onclick'),
            class_name: (typeof el.className === 'string') ? el.className : '',
            text: textOf(el),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height
        });
    }

    return {
        elements: results,
        viewport: { width: window.innerWidth, height: window.innerHeight }
    };
})()
"#;

/// Raw element facts as reported by the injected script.
#[derive(Debug, Clone)]
pub(crate) struct RawElement {
    pub tag: String,
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub has_onclick: bool,
    pub class_name: String,
    pub text: Option<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Classify a raw element into its reference-token kind.
pub(crate) fn classify(raw: &RawElement) -> ElementKind {
    let role = raw.role.as_deref().unwrap_or("");
    let input_type = raw.input_type.as_deref().unwrap_or("");
    let class = raw.class_name.to_ascii_lowercase();

    if role == "checkbox"
        || role == "switch"
        || input_type == "checkbox"
        || input_type == "radio"
        || class.contains("toggle")
        || class.contains("switch")
        || (raw.tag != "input" && class.contains("checkbox"))
    {
        return ElementKind::Checkbox;
    }

    match raw.tag.as_str() {
        "button" => ElementKind::Button,
        "a" => ElementKind::Link,
        "select" => ElementKind::Select,
        "textarea" => ElementKind::Input,
        "input" => match input_type {
            "submit" | "button" | "image" | "reset" => ElementKind::Button,
            _ => ElementKind::Input,
        },
        _ => match role {
            "button" => ElementKind::Button,
            "link" => ElementKind::Link,
            _ if raw.has_onclick => ElementKind::Button,
            _ => ElementKind::Other,
        },
    }
}

/// Assign typed tokens in document order: `BTN1, BTN2, …; IN1, …; LNK1, …`.
pub(crate) fn assign_tokens(
    raw: Vec<RawElement>,
    viewport_width: u32,
    viewport_height: u32,
) -> ElementExtraction {
    let mut counters: [u32; 6] = [0; 6];
    let index = |kind: ElementKind| match kind {
        ElementKind::Button => 0,
        ElementKind::Input => 1,
        ElementKind::Link => 2,
        ElementKind::Checkbox => 3,
        ElementKind::Select => 4,
        ElementKind::Other => 5,
    };

    let elements = raw
        .into_iter()
        .map(|r| {
            let kind = classify(&r);
            counters[index(kind)] += 1;
            ExtractedElement {
                ref_token: format!("{}{}", kind.token_prefix(), counters[index(kind)]),
                kind,
                tag: r.tag,
                text: r.text,
                x: r.x + r.width / 2.0,
                y: r.y + r.height / 2.0,
                width: r.width,
                height: r.height,
            }
        })
        .collect();

    ElementExtraction {
        elements,
        viewport_width,
        viewport_height,
    }
}

/// Parse the script output into an extraction result.
pub(crate) fn parse_extraction(value: &Value) -> Result<ElementExtraction> {
    let raw_elements = value["elements"]
        .as_array()
        .ok_or_else(|| Error::JsEvalFailed("elements not an array".into()))?;

    let raw: Vec<RawElement> = raw_elements
        .iter()
        .filter_map(|e| {
            Some(RawElement {
                tag: e["tag"].as_str()?.to_string(),
                input_type: e["input_type"].as_str().map(String::from),
                role: e["role"].as_str().map(String::from),
                has_onclick: e["has_onclick"].as_bool().unwrap_or(false),
                class_name: e["class_name"].as_str().unwrap_or("").to_string(),
                text: e["text"].as_str().map(String::from),
                x: e["x"].as_f64()?,
                y: e["y"].as_f64()?,
                width: e["width"].as_f64()?,
                height: e["height"].as_f64()?,
            })
        })
        .collect();

    let viewport_width = value["viewport"]["width"].as_u64().unwrap_or(1280) as u32;
    let viewport_height = value["viewport"]["height"].as_u64().unwrap_or(720) as u32;

    Ok(assign_tokens(raw, viewport_width, viewport_height))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tag: &str, input_type: Option<&str>, role: Option<&str>) -> RawElement {
        RawElement {
            tag: tag.into(),
            input_type: input_type.map(String::from),
            role: role.map(String::from),
            has_onclick: false,
            class_name: String::new(),
            text: None,
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 40.0,
        }
    }

    #[test]
    fn classification_covers_the_common_cases() {
        assert_eq!(classify(&raw("button", None, None)), ElementKind::Button);
        assert_eq!(classify(&raw("a", None, None)), ElementKind::Link);
        assert_eq!(classify(&raw("select", None, None)), ElementKind::Select);
        assert_eq!(classify(&raw("textarea", None, None)), ElementKind::Input);
        assert_eq!(classify(&raw("input", Some("text"), None)), ElementKind::Input);
        assert_eq!(classify(&raw("input", Some("submit"), None)), ElementKind::Button);
        assert_eq!(classify(&raw("input", Some("checkbox"), None)), ElementKind::Checkbox);
        assert_eq!(classify(&raw("div", None, Some("button"))), ElementKind::Button);
        assert_eq!(classify(&raw("span", None, Some("switch"))), ElementKind::Checkbox);
        assert_eq!(classify(&raw("div", None, None)), ElementKind::Other);
    }

    #[test]
    fn custom_toggle_classes_count_as_checkboxes() {
        let mut toggle = raw("div", None, None);
        toggle.class_name = "ui-toggle-switch".into();
        assert_eq!(classify(&toggle), ElementKind::Checkbox);
    }

    #[test]
    fn onclick_makes_a_plain_element_a_button() {
        let mut div = raw("div", None, None);
        div.has_onclick = true;
        assert_eq!(classify(&div), ElementKind::Button);
    }

    #[test]
    fn tokens_are_numbered_per_kind_in_document_order() {
        let extraction = assign_tokens(
            vec![
                raw("button", None, None),
                raw("input", Some("text"), None),
                raw("button", None, None),
                raw("a", None, None),
                raw("input", Some("checkbox"), None),
            ],
            1280,
            720,
        );

        let tokens: Vec<&str> = extraction.elements.iter().map(|e| e.ref_token.as_str()).collect();
        assert_eq!(tokens, vec!["BTN1", "IN1", "BTN2", "LNK1", "CHK1"]);
    }

    #[test]
    fn resolved_center_lies_within_the_bounding_box() {
        let extraction = assign_tokens(vec![raw("button", None, None)], 1280, 720);
        let element = extraction.resolve("BTN1").unwrap();

        assert!(element.x >= 10.0 && element.x <= 110.0);
        assert!(element.y >= 20.0 && element.y <= 60.0);
        assert_eq!((element.x, element.y), (60.0, 40.0));
    }

    #[test]
    fn parse_extraction_reads_script_output() {
        let value = serde_json::json!({
            "elements": [{
                "tag": "button",
                "input_type": null,
                "role": null,
                "has_onclick": false,
                "class_name": "",
                "text": "Submit",
                "x": 0.0, "y": 0.0, "width": 80.0, "height": 30.0
            }],
            "viewport": { "width": 1024, "height": 768 }
        });

        let extraction = parse_extraction(&value).unwrap();
        assert_eq!(extraction.viewport_width, 1024);
        assert_eq!(extraction.elements.len(), 1);
        assert_eq!(extraction.elements[0].ref_token, "BTN1");
        assert_eq!(extraction.elements[0].text.as_deref(), Some("Submit"));
    }

    #[test]
    fn unknown_refs_do_not_resolve() {
        let extraction = assign_tokens(vec![], 1280, 720);
        assert!(extraction.resolve("BTN9").is_none());
    }
}
