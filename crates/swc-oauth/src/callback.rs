//! Callback query parsing and the embedded identity marker

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches the identity marker the caller may embed in `state`: the
/// literal `name;` followed by one word, optionally `+`-joined with a
/// second word, e.g. `name;Han+Solo`.
static IDENTITY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)name;(\w*(?:\+\w*)?)").expect("identity marker regex is valid")
});

/// Query parameters of an authorisation redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    pub code: Option<String>,
    pub error: Option<String>,
    pub description: Option<String>,
    pub state: Option<String>,
}

impl CallbackPayload {
    /// Parse a raw query string.
    ///
    /// Values are percent-decoded with `+` left intact, so a marker like
    /// `name;Han+Solo` inside `state` survives and can be decoded a second
    /// time when the identity is extracted.
    pub fn parse(query: &str) -> Self {
        let mut payload = Self::default();

        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode(value);
            match key {
                "code" => payload.code = Some(value),
                "error" => payload.error = Some(value),
                "description" => payload.description = Some(value),
                "state" => payload.state = Some(value),
                _ => {}
            }
        }

        payload
    }
}

/// Extract the identity embedded in a state payload.
///
/// Returns the decoded identity (with `+` read as a space) and the state
/// with the `name;<value>` marker removed and surrounding whitespace and
/// `;` separators trimmed. Without a marker the state is returned trimmed
/// and the identity is `None`.
pub fn extract_identity(state: &str) -> (Option<String>, String) {
    match IDENTITY_MARKER.find(state) {
        Some(m) => {
            let value = &state[m.start() + "name;".len()..m.end()];
            let identity = url_decode(value);

            let mut stripped = String::with_capacity(state.len());
            stripped.push_str(&state[..m.start()]);
            stripped.push_str(&state[m.end()..]);
            (Some(identity), trim_separators(&stripped))
        }
        None => (None, trim_separators(state)),
    }
}

fn trim_separators(s: &str) -> String {
    s.trim_matches(|c: char| c.is_whitespace() || c == ';')
        .to_string()
}

/// Percent-decode, leaving `+` alone.
fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Full URL-decode: `+` becomes a space, then percent-escapes resolve.
fn url_decode(value: &str) -> String {
    percent_decode(&value.replace('+', " "))
}
