use std::fmt;

/// How a control is located on the page. Text-matched variants exist because
/// the portal's markup gives its buttons no stable ids or classes; the label
/// is the only durable handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Raw CSS selector (selector lists are allowed).
    Css(String),
    /// Form input matched by its `name` attribute.
    Field { name: String },
    /// A `button` whose visible text matches the label.
    ButtonText { label: String, exact: bool },
    /// An anchor *or* button whose visible text contains the label.
    ActionText { label: String },
}

const HIT_ATTRIBUTE: &str = "data-screener-hit";

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Selector::Css(selector.into())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Selector::Field { name: name.into() }
    }

    pub fn button_text(label: impl Into<String>, exact: bool) -> Self {
        Selector::ButtonText {
            label: label.into(),
            exact,
        }
    }

    pub fn action_text(label: impl Into<String>) -> Self {
        Selector::ActionText {
            label: label.into(),
        }
    }

    /// CSS query that locates this selector's first match. For text-matched
    /// variants this is only valid right after [`Selector::tagging_script`]
    /// has run on the page.
    pub(crate) fn css_query(&self) -> String {
        match self {
            Selector::Css(css) => css.clone(),
            Selector::Field { name } => format!("[name='{name}']"),
            Selector::ButtonText { .. } | Selector::ActionText { .. } => {
                format!("[{HIT_ATTRIBUTE}='0']")
            }
        }
    }

    /// Script that stamps every text-matched node with a hit attribute and
    /// returns the hit count, so the match can be re-queried as plain CSS.
    pub(crate) fn tagging_script(&self) -> Option<String> {
        let (node_selectors, label, exact) = match self {
            Selector::ButtonText { label, exact } => (r#"["button"]"#, label, *exact),
            Selector::ActionText { label } => (r#"["a", "button"]"#, label, false),
            _ => return None,
        };
        let label = serde_json::to_string(label).unwrap_or_else(|_| "\"\"".to_string());
        let matcher = if exact {
            "text === label"
        } else {
            "text.includes(label)"
        };
        Some(format!(
            r#"(() => {{
    document.querySelectorAll('[{attr}]').forEach(node => node.removeAttribute('{attr}'));
    const label = {label};
    const selectors = {node_selectors};
    let idx = 0;
    selectors.forEach(sel => {{
        document.querySelectorAll(sel).forEach(node => {{
            const text = (node.innerText || node.textContent || '').trim();
            if (!text) return;
            if ({matcher}) {{
                node.setAttribute('{attr}', String(idx));
                idx += 1;
            }}
        }});
    }});
    return idx;
}})()"#,
            attr = HIT_ATTRIBUTE,
        ))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => write!(f, "css `{css}`"),
            Selector::Field { name } => write!(f, "field `{name}`"),
            Selector::ButtonText { label, exact: true } => write!(f, "button `{label}`"),
            Selector::ButtonText {
                label,
                exact: false,
            } => write!(f, "button containing `{label}`"),
            Selector::ActionText { label } => write!(f, "action containing `{label}`"),
        }
    }
}
