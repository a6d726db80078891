//! Renders a snapshot into the compact text block the LLM reads.

use crate::snapshot::{PageSnapshot, SnapshotElement};

const MAX_ELEMENT_LINES: usize = 150;
const PAGE_TEXT_PREVIEW: usize = 800;

/// What an element is, for display. The ladder is ordered: the first kind
/// that applies wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Select,
    Checkbox,
    Radio,
    Input,
    Video,
    Product,
    Button,
    Link,
}

impl ElementKind {
    fn label(self) -> &'static str {
        match self {
            ElementKind::Select => "SELECT",
            ElementKind::Checkbox => "CHECKBOX",
            ElementKind::Radio => "RADIO",
            ElementKind::Input => "INPUT",
            ElementKind::Video => "VIDEO",
            ElementKind::Product => "PRODUCT",
            ElementKind::Button => "BUTTON",
            ElementKind::Link => "LINK",
        }
    }

    /// Display tier: inputs first, then controls, then products/videos,
    /// then plain links.
    fn tier(self) -> u8 {
        match self {
            ElementKind::Input | ElementKind::Select => 0,
            ElementKind::Button | ElementKind::Checkbox | ElementKind::Radio => 1,
            ElementKind::Product | ElementKind::Video => 2,
            ElementKind::Link => 3,
        }
    }
}

pub fn classify(element: &SnapshotElement) -> ElementKind {
    let input_type = element.input_type.as_deref().unwrap_or("");
    if element.is_select {
        ElementKind::Select
    } else if input_type == "checkbox" || element.role == "checkbox" {
        ElementKind::Checkbox
    } else if input_type == "radio" || element.role == "radio" {
        ElementKind::Radio
    } else if element.is_input {
        ElementKind::Input
    } else if element.is_video {
        ElementKind::Video
    } else if is_product(element) {
        ElementKind::Product
    } else if element.tag == "button" || element.role == "button" {
        ElementKind::Button
    } else {
        ElementKind::Link
    }
}

/// A link that is plausibly a product card: price token in the label or a
/// product-path href.
fn is_product(element: &SnapshotElement) -> bool {
    if element.tag != "a" && element.role != "link" {
        return false;
    }
    if has_price_token(&element.name) {
        return true;
    }
    element
        .href
        .as_deref()
        .map(|href| {
            href.contains("/dp/")
                || href.contains("/product")
                || href.contains("/itm/")
                || href.contains("/p/")
        })
        .unwrap_or(false)
}

fn has_price_token(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '$' | '₹' | '€' | '£') {
            if chars[i + 1..]
                .iter()
                .find(|n| !n.is_whitespace())
                .map(|n| n.is_ascii_digit())
                .unwrap_or(false)
            {
                return true;
            }
        }
    }
    false
}

fn is_sensitive(element: &SnapshotElement) -> bool {
    matches!(
        element.input_type.as_deref(),
        Some("password") | Some("hidden")
    )
}

/// Collapse runs of blank lines so the preview spends its budget on text.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::new();
    let mut blanks = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn element_line(element: &SnapshotElement, kind: ElementKind) -> String {
    let mut line = format!("  {} | {} | \"{}\"", element.uid, kind.label(), element.name);

    if let Some(value) = element.value.as_deref() {
        if !value.is_empty() && !is_sensitive(element) {
            line.push_str(&format!(" (current: \"{}\")", truncate_chars(value, 60)));
        }
    }

    let mut flags = Vec::new();
    match element.checked {
        Some(true) => flags.push("checked"),
        Some(false) => flags.push("unchecked"),
        None => {}
    }
    match element.aria_expanded {
        Some(true) => flags.push("expanded"),
        Some(false) => flags.push("collapsed"),
        None => {}
    }
    if element.disabled {
        flags.push("disabled");
    }
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join("|")));
    }

    if !element.context.is_empty() {
        line.push_str(&format!(" [in: {}]", element.context));
    }

    line
}

fn options_line(element: &SnapshotElement) -> Option<String> {
    let options = element.options.as_ref()?;
    if options.is_empty() {
        return None;
    }
    let texts: Vec<String> = options
        .iter()
        .map(|o| format!("\"{}\"", truncate_chars(&o.text, 40)))
        .collect();
    Some(format!("        options: [→ {}]", texts.join(", ")))
}

/// Format a snapshot for the LLM. Password/hidden inputs are dropped here
/// again even though the producer never emits them.
pub fn format_snapshot(snapshot: &PageSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("PAGE: {}\n", snapshot.url));
    out.push_str(&format!("TITLE: {}\n\n", snapshot.title));

    let preview = truncate_chars(&collapse_blank_runs(&snapshot.raw_text), PAGE_TEXT_PREVIEW);
    out.push_str(&format!(
        "PAGE TEXT (first {} chars):\n{}\n\n",
        PAGE_TEXT_PREVIEW, preview
    ));

    let visible: Vec<(&SnapshotElement, ElementKind)> = snapshot
        .elements
        .iter()
        .filter(|e| !is_sensitive(e))
        .map(|e| (e, classify(e)))
        .collect();

    out.push_str(&format!("ELEMENTS ({} total):\n", visible.len()));

    if visible.is_empty() {
        out.push_str("  (none — page may still be loading)\n");
        return out;
    }

    let checkbox_count = visible
        .iter()
        .filter(|(_, k)| matches!(k, ElementKind::Checkbox | ElementKind::Radio))
        .count();
    if checkbox_count >= 5 {
        out.push_str("  💡 FILTERS DETECTED — use click/select_option on the checkboxes and dropdowns to refine results\n");
    }
    let product_count = visible
        .iter()
        .filter(|(_, k)| *k == ElementKind::Product)
        .count();
    if product_count >= 3 {
        out.push_str(&format!("  🛍 PRODUCTS found ({})\n", product_count));
    }

    let mut ordered = visible;
    ordered.sort_by_key(|(e, k)| (k.tier(), e.uid));

    let mut lines = 0;
    let mut shown = 0;
    for (element, kind) in &ordered {
        if lines >= MAX_ELEMENT_LINES {
            break;
        }
        out.push_str(&element_line(element, *kind));
        out.push('\n');
        lines += 1;
        shown += 1;
        if *kind == ElementKind::Select {
            if let Some(opts) = options_line(element) {
                if lines < MAX_ELEMENT_LINES {
                    out.push_str(&opts);
                    out.push('\n');
                    lines += 1;
                }
            }
        }
    }

    let remaining = ordered.len() - shown;
    if remaining > 0 {
        out.push_str(&format!(
            "  ... and {} more (scroll down to see them)\n",
            remaining
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SelectOption;

    fn element(uid: i64, tag: &str, name: &str) -> SnapshotElement {
        SnapshotElement {
            uid,
            tag: tag.to_string(),
            role: tag.to_string(),
            name: name.to_string(),
            is_clickable: true,
            ..Default::default()
        }
    }

    fn snapshot_with(elements: Vec<SnapshotElement>) -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            elements,
            raw_text: "Hello\n\n\n\nWorld".to_string(),
        }
    }

    #[test]
    fn test_type_ladder() {
        let mut select = element(1, "select", "Sort");
        select.is_select = true;
        assert_eq!(classify(&select), ElementKind::Select);

        let mut checkbox = element(2, "input", "In stock");
        checkbox.input_type = Some("checkbox".to_string());
        assert_eq!(classify(&checkbox), ElementKind::Checkbox);

        let mut input = element(3, "input", "Search");
        input.is_input = true;
        assert_eq!(classify(&input), ElementKind::Input);

        let mut product = element(4, "a", "iPhone 16 — $799");
        product.href = Some("https://shop.example.com/phones".to_string());
        assert_eq!(classify(&product), ElementKind::Product);

        assert_eq!(classify(&element(5, "button", "Go")), ElementKind::Button);
        assert_eq!(classify(&element(6, "a", "About")), ElementKind::Link);
    }

    #[test]
    fn test_product_href_pattern() {
        let mut link = element(1, "a", "Apple iPhone 16 128GB");
        link.href = Some("https://www.amazon.in/dp/B0DGJ7TGDR".to_string());
        assert_eq!(classify(&link), ElementKind::Product);
    }

    #[test]
    fn test_ordering_inputs_before_links() {
        let mut input = element(9, "input", "Search");
        input.is_input = true;
        let link = element(1, "a", "Home");
        let button = element(5, "button", "Submit");

        let text = format_snapshot(&snapshot_with(vec![link, input, button]));
        let input_pos = text.find("9 | INPUT").unwrap();
        let button_pos = text.find("5 | BUTTON").unwrap();
        let link_pos = text.find("1 | LINK").unwrap();
        assert!(input_pos < button_pos);
        assert!(button_pos < link_pos);
    }

    #[test]
    fn test_line_annotations() {
        let mut checkbox = element(3, "input", "In stock only");
        checkbox.input_type = Some("checkbox".to_string());
        checkbox.checked = Some(false);
        checkbox.context = "Filters".to_string();

        let text = format_snapshot(&snapshot_with(vec![checkbox]));
        assert!(text.contains("3 | CHECKBOX | \"In stock only\" [unchecked] [in: Filters]"));
    }

    #[test]
    fn test_select_options_rendered() {
        let mut select = element(2, "select", "Sort by");
        select.is_select = true;
        select.options = Some(vec![
            SelectOption {
                value: "rel".to_string(),
                text: "Relevance".to_string(),
                selected: true,
            },
            SelectOption {
                value: "price".to_string(),
                text: "Price: low to high".to_string(),
                selected: false,
            },
        ]);
        let text = format_snapshot(&snapshot_with(vec![select]));
        assert!(text.contains("options: [→ \"Relevance\", \"Price: low to high\"]"));
    }

    #[test]
    fn test_current_value_shown() {
        let mut input = element(7, "input", "Search");
        input.is_input = true;
        input.value = Some("vs code".to_string());
        let text = format_snapshot(&snapshot_with(vec![input]));
        assert!(text.contains("(current: \"vs code\")"));
    }

    #[test]
    fn test_sensitive_inputs_never_rendered() {
        let mut password = element(8, "input", "Password");
        password.is_input = true;
        password.input_type = Some("password".to_string());
        password.value = Some("hunter2".to_string());

        let text = format_snapshot(&snapshot_with(vec![password]));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("Password"));
        assert!(text.contains("ELEMENTS (0 total)"));
    }

    #[test]
    fn test_empty_snapshot_hint() {
        let snapshot = PageSnapshot::empty("https://example.com", "Loading");
        let text = format_snapshot(&snapshot);
        assert!(text.contains("(none — page may still be loading)"));
    }

    #[test]
    fn test_cap_and_overflow_line() {
        let elements: Vec<SnapshotElement> = (1..=200)
            .map(|i| element(i, "a", &format!("Link {}", i)))
            .collect();
        let text = format_snapshot(&snapshot_with(elements));
        assert!(text.contains("... and 50 more (scroll down to see them)"));
        let line_count = text.lines().filter(|l| l.contains(" | LINK | ")).count();
        assert_eq!(line_count, 150);
    }

    #[test]
    fn test_filters_hint() {
        let elements: Vec<SnapshotElement> = (1..=6)
            .map(|i| {
                let mut e = element(i, "input", &format!("Brand {}", i));
                e.input_type = Some("checkbox".to_string());
                e
            })
            .collect();
        let text = format_snapshot(&snapshot_with(elements));
        assert!(text.contains("FILTERS DETECTED"));
    }

    #[test]
    fn test_products_hint() {
        let elements: Vec<SnapshotElement> = (1..=4)
            .map(|i| {
                let mut e = element(i, "a", &format!("Phone {} — $ {}99", i, i));
                e.href = Some(format!("https://shop.example.com/p/{}", i));
                e
            })
            .collect();
        let text = format_snapshot(&snapshot_with(elements));
        assert!(text.contains("PRODUCTS found (4)"));
    }

    #[test]
    fn test_blank_runs_collapsed_in_preview() {
        let text = format_snapshot(&snapshot_with(vec![element(1, "a", "Home")]));
        assert!(text.contains("Hello\n\nWorld"));
    }
}
