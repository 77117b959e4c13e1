//! Per-host diagnostics.

use serde::{Deserialize, Serialize};

/// Ordered stderr evidence captured while running a batch on one host.
///
/// Lines are only ever appended. An empty diagnostic means the batch fully
/// succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostic(Vec<String>);

impl Diagnostic {
    /// An empty diagnostic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.0.push(line.into());
    }

    /// Append every line of `other`, preserving order.
    pub fn extend(&mut self, other: Diagnostic) {
        self.0.extend(other.0);
    }

    /// True when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of captured lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The captured lines in arrival order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.0
    }

    /// A copy with every line exactly equal to `message` removed.
    #[must_use]
    pub fn without(&self, message: &str) -> Self {
        Self(self.0.iter().filter(|l| *l != message).cloned().collect())
    }

    /// Consume the diagnostic and return its lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for Diagnostic {
    fn from(lines: Vec<String>) -> Self {
        Self(lines)
    }
}

impl<S: Into<String>> FromIterator<S> for Diagnostic {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_in_order() {
        let mut d = Diagnostic::new();
        d.push("first");
        d.extend(["second", "third"].into_iter().collect());
        assert_eq!(d.lines(), ["first", "second", "third"]);
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn without_is_exact_match() {
        let d: Diagnostic = ["benign", "benign ", "real"].into_iter().collect();
        assert_eq!(d.without("benign").lines(), ["benign ", "real"]);
        assert!(Diagnostic::from(vec!["benign".to_string()])
            .without("benign")
            .is_empty());
    }

    #[test]
    fn serializes_as_list() {
        let d: Diagnostic = ["a", "b"].into_iter().collect();
        assert_eq!(serde_json::to_string(&d).unwrap(), r#"["a","b"]"#);
    }
}
