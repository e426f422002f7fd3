//! Vision prompt construction for the observe/decide loop.

use vision_browser::ElementExtraction;

/// Cap on elements included in a prompt; pages routinely expose hundreds.
const MAX_ELEMENTS: usize = 40;
/// Recent steps summarized for context.
const MAX_HISTORY: usize = 5;

/// A compact record of an executed step kept in memory for prompting.
#[derive(Debug, Clone)]
pub struct StepSummary {
    pub action: String,
    pub target: Option<String>,
    pub success: bool,
}

/// Build the decision prompt sent with the screenshot.
pub fn build_prompt(
    instruction: &str,
    url: &str,
    title: &str,
    step: i64,
    max_steps: i64,
    history: &[StepSummary],
    extraction: &ElementExtraction,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("You are driving a web browser to complete a task.\n\n");
    prompt.push_str(&format!("Task: {instruction}\n"));
    prompt.push_str(&format!("Current URL: {url}\n"));
    prompt.push_str(&format!("Page title: {title}\n"));
    prompt.push_str(&format!("Step {} of {max_steps}\n", step + 1));

    if !history.is_empty() {
        prompt.push_str("\nRecent steps:\n");
        for summary in history.iter().rev().take(MAX_HISTORY).rev() {
            let outcome = if summary.success { "ok" } else { "FAILED" };
            match &summary.target {
                Some(target) => {
                    prompt.push_str(&format!("- {} {} ({outcome})\n", summary.action, target));
                },
                None => prompt.push_str(&format!("- {} ({outcome})\n", summary.action)),
            }
        }
    }

    prompt.push_str("\nInteractive elements (ref: \"text\" at center x, y):\n");
    for element in extraction.elements.iter().take(MAX_ELEMENTS) {
        let text = element.text.as_deref().unwrap_or("");
        prompt.push_str(&format!(
            "{}: \"{}\" at ({:.0}, {:.0})\n",
            element.ref_token, text, element.x, element.y
        ));
    }
    if extraction.elements.len() > MAX_ELEMENTS {
        prompt.push_str(&format!(
            "({} more elements not shown)\n",
            extraction.elements.len() - MAX_ELEMENTS
        ));
    }

    prompt.push_str(
        "\nLook at the screenshot and decide the single next action. Respond with \
         exactly one JSON object and nothing else:\n\
         {\n  \"thinking\": \"why this action\",\n  \"action\": {\n    \"type\": \
         \"click\" | \"type\" | \"scroll\" | \"wait\",\n    \"ref\": \"BTN1\",\n    \
         \"value\": \"text to type, scroll direction, or wait ms\"\n  },\n  \
         \"complete\": false,\n  \"result\": \"only when complete is true\"\n}\n\
         Use the ref of an element from the list when clicking or typing. Set \
         \"complete\": true with a \"result\" once the task is done.",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use vision_browser::{ElementKind, ExtractedElement};

    use super::*;

    fn extraction(count: usize) -> ElementExtraction {
        ElementExtraction {
            elements: (0..count)
                .map(|i| ExtractedElement {
                    ref_token: format!("BTN{}", i + 1),
                    kind: ElementKind::Button,
                    tag: "button".into(),
                    text: Some(format!("Button {i}")),
                    x: 10.0 * i as f64,
                    y: 20.0,
                    width: 50.0,
                    height: 20.0,
                })
                .collect(),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }

    #[test]
    fn prompt_carries_task_context_and_grammar() {
        let prompt = build_prompt(
            "buy the red shoes",
            "https://shop.example.com/cart",
            "Cart",
            2,
            20,
            &[],
            &extraction(1),
        );

        assert!(prompt.contains("buy the red shoes"));
        assert!(prompt.contains("https://shop.example.com/cart"));
        assert!(prompt.contains("Step 3 of 20"));
        assert!(prompt.contains("BTN1: \"Button 0\" at (0, 20)"));
        assert!(prompt.contains("\"complete\": false"));
    }

    #[test]
    fn element_list_is_capped_at_forty() {
        let prompt = build_prompt("t", "u", "t", 0, 5, &[], &extraction(55));
        assert!(prompt.contains("BTN40"));
        assert!(!prompt.contains("BTN41:"));
        assert!(prompt.contains("15 more elements not shown"));
    }

    #[test]
    fn history_keeps_only_the_last_five() {
        let history: Vec<StepSummary> = (0..8)
            .map(|i| StepSummary {
                action: format!("click-{i}"),
                target: None,
                success: i % 2 == 0,
            })
            .collect();

        let prompt = build_prompt("t", "u", "t", 8, 20, &history, &extraction(0));
        assert!(!prompt.contains("click-2 "));
        assert!(prompt.contains("click-3"));
        assert!(prompt.contains("click-7"));
    }
}
