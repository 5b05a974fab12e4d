//! Warning message rendering.
//!
//! Message tiers carry template keys rather than text. Keys resolve through
//! the policy document's `i18n` dictionaries and `{{name}}` placeholders are
//! filled from the message's own params and the server context.

use std::collections::HashMap;

use serde::Serialize;

use crate::policy::{Message, MessageKind};

/// Fallback language for missing translations.
const DEFAULT_LANGUAGE: &str = "en";

/// Server facts available to message templates.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// Workspace display name.
    pub workspace_name: String,
    /// Workspace domain.
    pub domain: String,
    /// Server version.
    pub version: String,
    /// Whole days until expiration.
    pub remaining_days: i64,
}

impl MessageContext {
    fn params(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("instance_ws_name", self.workspace_name.clone()),
            ("instance_domain", self.domain.clone()),
            ("instance_version", self.version.clone()),
            ("remaining_days", self.remaining_days.to_string()),
        ])
    }
}

/// A message ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    /// Title text.
    pub title: String,
    /// Subtitle text.
    pub subtitle: String,
    /// Description text.
    pub description: String,
    /// Severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Link to further information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Resolve and interpolate a message for `language`.
#[must_use]
pub fn render_message(
    message: &Message,
    i18n: Option<&HashMap<String, HashMap<String, String>>>,
    language: &str,
    context: &MessageContext,
) -> RenderedMessage {
    let context_params = context.params();
    let lookup = |name: &str| -> Option<String> {
        message
            .params
            .as_ref()
            .and_then(|p| p.get(name).cloned())
            .or_else(|| context_params.get(name).cloned())
    };

    let render = |key: &str| interpolate(&translate(i18n, language, key), &lookup);

    RenderedMessage {
        title: render(&message.title),
        subtitle: render(&message.subtitle),
        description: render(&message.description),
        kind: message.kind,
        link: message.link.clone(),
    }
}

/// Look `key` up for `language`, its base language, then English.
fn translate(
    i18n: Option<&HashMap<String, HashMap<String, String>>>,
    language: &str,
    key: &str,
) -> String {
    let Some(i18n) = i18n else {
        return key.to_string();
    };

    let base = language.split(['-', '_']).next().unwrap_or(language);
    [language, base, DEFAULT_LANGUAGE]
        .iter()
        .find_map(|lang| i18n.get(*lang).and_then(|dict| dict.get(key)))
        .cloned()
        .unwrap_or_else(|| key.to_string())
}

/// Replace `{{name}}` placeholders. Unknown names are left as written.
fn interpolate(template: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            },
        }
    }

    out.push_str(rest);
    out
}
