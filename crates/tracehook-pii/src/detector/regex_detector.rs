//! Regex-based secret detector

use crate::detector::{Detection, Detector, PatternSource};
use regex::Regex;

/// Regex-based detector with allowlist support
///
/// A match is left alone when it is fully covered by an allowlist match in the
/// surrounding text, or when an allowlist pattern matches inside the matched
/// text itself. The allowlist always wins over both default and custom patterns.
#[derive(Debug, Clone)]
pub struct RegexDetector {
    patterns: Vec<(PatternSource, Regex)>,
    allowlist: Vec<Regex>,
}

impl RegexDetector {
    /// Compile a detector, failing on the first invalid pattern
    pub fn new(
        patterns: &[(PatternSource, String)],
        allowlist: &[String],
    ) -> Result<Self, regex::Error> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for (source, pattern) in patterns {
            compiled.push((*source, Regex::new(pattern)?));
        }

        let mut allow = Vec::with_capacity(allowlist.len());
        for pattern in allowlist {
            allow.push(Regex::new(pattern)?);
        }

        Ok(Self::from_compiled(compiled, allow))
    }

    /// Build from already compiled expressions
    pub fn from_compiled(patterns: Vec<(PatternSource, Regex)>, allowlist: Vec<Regex>) -> Self {
        Self {
            patterns,
            allowlist,
        }
    }

    /// Number of allowlist patterns
    pub fn allowlist_count(&self) -> usize {
        self.allowlist.len()
    }

    fn is_allowlisted(&self, matched: &str, start: usize, end: usize, allowed: &[(usize, usize)]) -> bool {
        if allowed.iter().any(|&(a_start, a_end)| a_start <= start && end <= a_end) {
            return true;
        }
        self.allowlist.iter().any(|re| re.is_match(matched))
    }
}

impl Detector for RegexDetector {
    fn detect(&self, text: &str) -> Vec<Detection> {
        if self.patterns.is_empty() || text.is_empty() {
            return Vec::new();
        }

        let allowed: Vec<(usize, usize)> = self
            .allowlist
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();

        let mut detections = Vec::new();
        for (source, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                if m.start() == m.end() {
                    continue;
                }
                if self.is_allowlisted(m.as_str(), m.start(), m.end(), &allowed) {
                    continue;
                }
                detections.push(Detection {
                    source: *source,
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_string(),
                });
            }
        }

        // Position order, longest first on ties
        detections.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        detections
    }

    fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
