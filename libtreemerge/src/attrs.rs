//! Minimal `.gitattributes` handling: just enough to drive renormalization
//! (CRLF to LF conversion for paths the attributes declare as text) during
//! content comparison and merging.

use std::borrow::Cow;

/// Attribute rules parsed from a `.gitattributes` blob. Built lazily per
/// merge from the file at the root of the trees being merged and discarded
/// with the merge state.
#[derive(Debug, Default, Clone)]
pub struct AttrIndex {
    rules: Vec<AttrRule>,
}

#[derive(Debug, Clone)]
struct AttrRule {
    pattern: String,
    /// `Some(true)` for `text`/`text=auto`/`eol=...`, `Some(false)` for
    /// `-text`/`binary`
    text: Option<bool>,
}

impl AttrIndex {
    pub fn parse(bytes: &[u8]) -> Self {
        let content = String::from_utf8_lossy(bytes);
        let mut rules = vec![];
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let pattern = match words.next() {
                Some(pattern) => pattern.to_owned(),
                None => continue,
            };
            let mut text = None;
            for attr in words {
                match attr {
                    "text" | "text=auto" => text = Some(true),
                    attr if attr.starts_with("eol=") => text = Some(true),
                    "-text" | "binary" => text = Some(false),
                    _ => {}
                }
            }
            if text.is_some() {
                rules.push(AttrRule { pattern, text });
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// last matching rule wins, as in the attribute stack
    pub fn is_text(&self, path: &str) -> bool {
        let mut text = false;
        for rule in &self.rules {
            if pattern_matches(&rule.pattern, path) {
                text = rule.text.unwrap_or(false);
            }
        }
        text
    }
}

// a deliberately small subset of attribute pattern syntax: bare names match
// against the basename, patterns with '/' against the whole path, '*' matches
// within a single component
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let target = if pattern.contains('/') {
        path
    } else {
        path.rsplit('/').next().unwrap_or(path)
    };
    glob_match(pattern.trim_start_matches('/'), target)
}

fn glob_match(pattern: &str, target: &str) -> bool {
    let pattern = pattern.as_bytes();
    let target = target.as_bytes();

    fn matches(pattern: &[u8], target: &[u8]) -> bool {
        match pattern.split_first() {
            None => target.is_empty(),
            Some((b'*', rest)) => (0..=target.len())
                .filter(|&i| target[..i].iter().all(|&c| c != b'/'))
                .any(|i| matches(rest, &target[i..])),
            Some((b'?', rest)) => match target.split_first() {
                Some((&c, tail)) => c != b'/' && matches(rest, tail),
                None => false,
            },
            Some((&c, rest)) => match target.split_first() {
                Some((&t, tail)) => t == c && matches(rest, tail),
                None => false,
            },
        }
    }

    matches(pattern, target)
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|&b| b == 0)
}

/// CRLF -> LF conversion for text paths; the identity everywhere else.
pub fn renormalize<'a>(
    attrs: Option<&AttrIndex>,
    path: &str,
    enabled: bool,
    bytes: &'a [u8],
) -> Cow<'a, [u8]> {
    let is_text = enabled
        && attrs.map_or(false, |attrs| attrs.is_text(path))
        && !looks_binary(bytes);
    if !is_text || !bytes.contains(&b'\r') {
        return Cow::Borrowed(bytes);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    Cow::Owned(out)
}
