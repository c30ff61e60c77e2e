//! Routing directives embedded in generated replies.
//!
//! A reply may start with `$LABEL$`. The label routes the original
//! message; whatever follows (trimmed) is the outgoing body. An empty
//! remainder means "label only, do not reply". Text without a directive
//! is sent unchanged.

use std::sync::LazyLock;

use regex::Regex;

static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\$([^$]+)\$(.*)$").expect("directive pattern is valid"));

/// A reply split into its optional routing label and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    pub label: Option<&'a str>,
    pub body: &'a str,
}

impl Directive<'_> {
    /// Whether there is anything to send. Only a directive with an empty
    /// remainder suppresses the reply; undirected text is sent as is.
    pub fn has_content(&self) -> bool {
        self.label.is_none() || !self.body.is_empty()
    }
}

pub fn parse_directive(response: &str) -> Directive<'_> {
    let parts = DIRECTIVE
        .captures(response)
        .and_then(|caps| Some((caps.get(1)?, caps.get(2)?)));
    match parts {
        Some((label, rest)) => Directive {
            label: Some(label.as_str()),
            body: rest.as_str().trim(),
        },
        None => Directive {
            label: None,
            body: response,
        },
    }
}
