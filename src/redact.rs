//! PII scrubbing applied to error messages, context strings, and stacks.
//!
//! Credit-card-like, email-like, and phone-like substrings are replaced with
//! constant tokens before anything leaves the process.  Messages are capped
//! at 1000 chars, stacks at 10 frames / 2000 chars with absolute HTTP(S)
//! origins stripped to path-relative form.

use std::sync::LazyLock;

use regex::Regex;

/// Literal substituted for sensitive input values and masked DOM subtrees.
pub const MASKED: &str = "[MASKED]";

pub const MESSAGE_MAX_CHARS: usize = 1000;
pub const STACK_MAX_CHARS: usize = 2000;
pub const STACK_MAX_FRAMES: usize = 10;

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("card pattern")
});
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d{1,3}[-. ]?\(?\d{2,4}\)?[-. ]?\d{3,4}[-. ]?\d{3,4}").expect("phone pattern")
});
static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^/\s)]+").expect("origin pattern")
});

/// Replace card-like, email-like, and phone-like substrings.
///
/// Cards are scrubbed before phones; the card pattern subsumes most long
/// digit runs and must win.
pub fn scrub(input: &str) -> String {
    let scrubbed = CARD_RE.replace_all(input, "[CARD]");
    let scrubbed = EMAIL_RE.replace_all(&scrubbed, "[EMAIL]");
    PHONE_RE.replace_all(&scrubbed, "[PHONE]").into_owned()
}

/// Scrub and truncate an error message to exactly `MESSAGE_MAX_CHARS`.
pub fn redact_message(message: &str) -> String {
    truncate_chars(&scrub(message), MESSAGE_MAX_CHARS)
}

/// Limit a stack trace to its first 10 frames, strip absolute origins to
/// path-relative form, and cap the result at 2000 chars.
pub fn redact_stack(stack: &str) -> String {
    let frames: Vec<&str> = stack.lines().take(STACK_MAX_FRAMES).collect();
    let joined = frames.join("\n");
    let stripped = ORIGIN_RE.replace_all(&joined, "");
    truncate_chars(&scrub(&stripped), STACK_MAX_CHARS)
}

/// Defensive sanitization of a context object: JSON round-trip (drops
/// anything non-representable at the boundary) and string scrubbing at every
/// depth.
pub fn sanitize_context(value: serde_json::Value) -> serde_json::Value {
    let rounded = serde_json::to_string(&value)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    scrub_value(rounded)
}

fn scrub_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(truncate_chars(&scrub(&s), MESSAGE_MAX_CHARS))
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(scrub_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, scrub_value(v))).collect(),
        ),
        other => other,
    }
}

/// Char-boundary-safe truncation.
pub fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_owned();
    }
    input.chars().take(max).collect()
}
