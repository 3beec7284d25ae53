//! JavaScript builders for locating and driving page elements. Everything
//! the engine does in-page goes through these snippets; selectors are
//! JSON-escaped before interpolation.

use super::Locator;

/// Expression evaluating to the target element or `null`.
fn find_expr(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => {
            format!("document.querySelector({})", encode(selector))
        }
        Locator::Xpath(expr) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            encode(expr)
        ),
    }
}

/// `true` once the element is present and visible.
pub fn readiness(locator: &Locator) -> String {
    format!(
        "(() => {{
    const el = {find};
    if (!el) return false;
    if (el.disabled) return false;
    return el.getClientRects().length > 0;
}})()",
        find = find_expr(locator)
    )
}

/// Scroll into view and click; returns whether the element was still there.
pub fn click(locator: &Locator) -> String {
    format!(
        "(() => {{
    const el = {find};
    if (!el) return false;
    el.scrollIntoView({{block: 'center'}});
    el.click();
    return true;
}})()",
        find = find_expr(locator)
    )
}

/// Set an input's value through the native setter so framework change
/// detection (React/Angular) observes it, then fire input/change events.
pub fn input(locator: &Locator, value: &str) -> String {
    format!(
        "(() => {{
    const el = {find};
    if (!el) return false;
    el.scrollIntoView({{block: 'center'}});
    const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement : HTMLInputElement;
    const setter = Object.getOwnPropertyDescriptor(proto.prototype, 'value').set;
    setter.call(el, {value});
    el.dispatchEvent(new Event('input', {{bubbles: true}}));
    el.dispatchEvent(new Event('change', {{bubbles: true}}));
    return true;
}})()",
        find = find_expr(locator),
        value = encode(value)
    )
}

pub fn press(locator: &Locator, key: &str) -> String {
    format!(
        "(() => {{
    const el = {find};
    if (!el) return false;
    el.focus();
    el.dispatchEvent(new KeyboardEvent('keydown', {{key: {key}, bubbles: true}}));
    el.dispatchEvent(new KeyboardEvent('keyup', {{key: {key}, bubbles: true}}));
    return true;
}})()",
        find = find_expr(locator),
        key = encode(key)
    )
}

fn encode(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_selector_is_json_escaped() {
        let script = readiness(&Locator::Css("input[placeholder='Filter...']".into()));
        assert!(script.contains(r#"document.querySelector("input[placeholder='Filter...']")"#));
    }

    #[test]
    fn xpath_uses_document_evaluate() {
        let script = click(&Locator::Xpath("//div[contains(.,'Niche Finder')]".into()));
        assert!(script.contains("document.evaluate"));
        assert!(script.contains("scrollIntoView"));
    }

    #[test]
    fn input_value_with_quotes_is_escaped() {
        let script = input(&Locator::Css("#q".into()), r#"say "hi""#);
        assert!(script.contains(r#""say \"hi\"""#));
    }
}
