//! In-page JavaScript snippets evaluated through `SessionDriver::evaluate`.
//!
//! Every snippet is a self-invoking expression so it can be sent as-is.
//! Selectors and values are embedded as JSON string literals.

fn lit(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// `[{ value, label }]` for every `<option>` of `control`, placeholders included.
/// Returns `[]` when the control is absent.
pub fn read_options(control: &str) -> String {
    format!(
        r#"(() => {{
    const sel = document.querySelector({sel});
    if (!sel) return [];
    return Array.from(sel.querySelectorAll('option')).map(o => ({{
        value: o.value == null ? '' : String(o.value),
        label: (o.innerText || o.textContent || '').trim()
    }}));
}})()"#,
        sel = lit(control)
    )
}

/// Currently selected value of `control`, or `null` when absent.
pub fn selected_value(control: &str) -> String {
    format!(
        r#"(() => {{
    const sel = document.querySelector({sel});
    return sel ? String(sel.value) : null;
}})()"#,
        sel = lit(control)
    )
}

/// Select `value` in `control` and fire `input` + `change` so the page's AJAX
/// handlers repopulate the dependent control.
///
/// Returns `"ok"`, `"missing"` (no control) or `"unavailable"` (no such option).
pub fn select_option(control: &str, value: &str) -> String {
    format!(
        r#"(() => {{
    const sel = document.querySelector({sel});
    if (!sel) return 'missing';
    const want = {val};
    const opt = Array.from(sel.options).find(o => o.value === want);
    if (!opt) return 'unavailable';
    sel.value = want;
    sel.dispatchEvent(new Event('input', {{ bubbles: true }}));
    sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return 'ok';
}})()"#,
        sel = lit(control),
        val = lit(value)
    )
}

pub fn element_exists(selector: &str) -> String {
    format!("!!document.querySelector({})", lit(selector))
}

pub fn count(selector: &str) -> String {
    format!("document.querySelectorAll({}).length", lit(selector))
}

/// `outerHTML` of the first match, or `null`.
pub fn outer_html(selector: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    return el ? el.outerHTML : null;
}})()"#,
        sel = lit(selector)
    )
}

/// Force the result widget's page-size `<select name=…>` to "All" (`-1`).
///
/// Injects the option when the widget does not offer it, then dispatches
/// `change` so the widget's data layer re-renders. Returns `false` when the
/// page-size control is not on the page.
pub fn expand_page_size(select_name: &str) -> String {
    let css = format!("select[name=\"{}\"]", select_name.replace('"', "\\\""));
    format!(
        r#"(() => {{
    const sel = document.querySelector({sel});
    if (!sel) return false;
    let opt = sel.querySelector('option[value="-1"]');
    if (!opt) {{
        opt = document.createElement('option');
        opt.value = '-1';
        opt.text = 'All';
        sel.add(opt);
    }}
    sel.value = '-1';
    sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return true;
}})()"#,
        sel = lit(&css)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_are_escaped() {
        let js = select_option("select#ward", "1'); alert('x");
        assert!(js.contains(r#""1'); alert('x""#), "{js}");
        assert!(js.contains(r#""select#ward""#));
    }

    #[test]
    fn test_page_size_selector_targets_name_attribute() {
        let js = expand_page_size("tbl_data_length");
        assert!(js.contains(r#"select[name=\"tbl_data_length\"]"#), "{js}");
        assert!(js.contains("'-1'"));
    }

    #[test]
    fn test_count_uses_query_selector_all() {
        assert_eq!(
            count("table#tbl_data tbody tr"),
            r#"document.querySelectorAll("table#tbl_data tbody tr").length"#
        );
    }
}
