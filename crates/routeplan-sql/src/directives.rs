//! Query directives carried in `/*vt+ ... */` comments

use std::collections::BTreeMap;

pub const DIRECTIVE_PLANNER: &str = "PLANNER";
pub const DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS: &str = "SCATTER_ERRORS_AS_WARNINGS";

const PREFIX: &str = "/*vt+";

/// Directives of one statement, keyed by upper-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives(BTreeMap<String, String>);

impl Directives {
    /// Collect `KEY=value` and bare `KEY` entries from every `/*vt+ */`
    /// comment in the statement text.
    pub fn parse(sql: &str) -> Self {
        let mut map = BTreeMap::new();
        let mut rest = sql;
        while let Some(start) = rest.find(PREFIX) {
            let body_start = start + PREFIX.len();
            let Some(len) = rest[body_start..].find("*/") else {
                break;
            };
            let body = &rest[body_start..body_start + len];
            for token in body.split_whitespace() {
                let (key, value) = match token.split_once('=') {
                    Some((k, v)) => (k, v.trim_matches(|c| c == '\'' || c == '"')),
                    None => (token, "true"),
                };
                map.insert(key.to_ascii_uppercase(), value.to_string());
            }
            rest = &rest[body_start + len + 2..];
        }
        Directives(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Bare directives and ones set to `true`/`1`.
    pub fn is_set(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("true") | Some("1")
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
