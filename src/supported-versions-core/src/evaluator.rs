//! Version support evaluation.
//!
//! Pure decision logic: given what is known about a server and the policy
//! document that applies to it, decide whether the server version is still
//! supported and which warning tier (if any) to show.
//!
//! ## Rules
//!
//! - **Fail-open**: missing version or missing document means supported
//! - **Exceptions first**: a matching unexpired exception wins over the
//!   general list
//! - **Grace period**: before `enforcementStartDate` nothing is blocked

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};

use crate::policy::{Message, PolicyDocument, VersionEntry};
use crate::registry::ServerRef;

/// Outcome of evaluating one server against a policy document.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportVerdict {
    /// Whether the server may be used without restriction.
    pub supported: bool,
    /// Warning tier to surface, if the countdown is inside one.
    pub message: Option<Message>,
    /// Expiration the verdict was derived from.
    pub expiration: Option<DateTime<Utc>>,
}

impl SupportVerdict {
    fn supported() -> Self {
        Self {
            supported: true,
            message: None,
            expiration: None,
        }
    }

    fn supported_until(
        expiration: DateTime<Utc>,
        messages: Option<&[Message]>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            supported: true,
            message: messages.and_then(|m| get_expiration_message(expiration, m, now)),
            expiration: Some(expiration),
        }
    }
}

/// Decide whether `server` is supported under `doc`.
///
/// `builtin` supplies the last-resort message tiers when neither the matched
/// entry nor the document carries any.
#[must_use]
pub fn evaluate(
    server: &ServerRef,
    doc: Option<&PolicyDocument>,
    builtin: Option<&PolicyDocument>,
    now: DateTime<Utc>,
) -> SupportVerdict {
    let (Some(version), Some(doc)) = (server.version.as_deref(), doc) else {
        return SupportVerdict::supported();
    };
    let Some(versions) = doc.versions.as_deref() else {
        return SupportVerdict::supported();
    };
    let Some(range) = support_range(version) else {
        return SupportVerdict::supported();
    };

    let builtin_messages = builtin.and_then(|b| b.messages.as_deref());

    if let Some(exceptions) = doc
        .exceptions
        .as_ref()
        .filter(|e| !is_other_workspace(&e.unique_id, server.unique_id.as_deref()))
    {
        if let Some(entry) = find_matching(&exceptions.versions, &range) {
            if entry.expiration > now {
                let messages = entry
                    .messages
                    .as_deref()
                    .or(exceptions.messages.as_deref())
                    .or(builtin_messages);
                return SupportVerdict::supported_until(entry.expiration, messages, now);
            }
        }
    }

    let matched = find_matching(versions, &range);
    if let Some(entry) = matched {
        if entry.expiration > now {
            let messages = entry
                .messages
                .as_deref()
                .or(doc.messages.as_deref())
                .or(builtin_messages);
            return SupportVerdict::supported_until(entry.expiration, messages, now);
        }
    }

    if let Some(enforcement) = doc.enforcement_start_date.filter(|d| *d > now) {
        let messages = doc.messages.as_deref().or(builtin_messages);
        return SupportVerdict::supported_until(enforcement, messages, now);
    }

    SupportVerdict {
        supported: false,
        message: None,
        expiration: matched.map(|e| e.expiration),
    }
}

/// Pick the most urgent warning tier that still covers the countdown.
///
/// Returns `None` when there are no tiers, the expiration has passed, or the
/// countdown is longer than every tier.
#[must_use]
pub fn get_expiration_message(
    expiration: DateTime<Utc>,
    messages: &[Message],
    now: DateTime<Utc>,
) -> Option<Message> {
    if messages.is_empty() || expiration <= now {
        return None;
    }

    let remaining = expiration - now;
    if remaining.num_days() < 0 {
        return None;
    }
    let hours = remaining.num_hours();

    let mut tiers: Vec<&Message> = messages.iter().collect();
    tiers.sort_by_key(|m| m.remaining_days);
    tiers
        .into_iter()
        .find(|m| m.remaining_days.saturating_mul(24) >= hours)
        .cloned()
}

/// `~major.minor` range for a server version.
pub(crate) fn support_range(version: &str) -> Option<VersionReq> {
    let (major, minor) = major_minor(version)?;
    VersionReq::parse(&format!("~{}.{}", major, minor)).ok()
}

/// Lenient parse of a policy entry version. Missing components are zero.
pub(crate) fn coerce_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let mut numbers = raw.split('.').map(leading_number);
    let major = numbers.next().flatten()?;
    let minor = numbers.next().flatten().unwrap_or(0);
    let patch = numbers.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = leading_number(parts.next()?)?;
    let minor = parts.next().and_then(leading_number).unwrap_or(0);
    Some((major, minor))
}

fn leading_number(part: &str) -> Option<u64> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn find_matching<'a>(entries: &'a [VersionEntry], range: &VersionReq) -> Option<&'a VersionEntry> {
    entries.iter().find(|entry| {
        coerce_version(&entry.version).is_some_and(|version| range.matches(&version))
    })
}

fn is_other_workspace(exception_id: &str, server_id: Option<&str>) -> bool {
    match server_id {
        Some(id) if !exception_id.is_empty() => id != exception_id,
        _ => false,
    }
}
