use regex::Regex;

/// Result of statement classification.
///
/// `Unknown` covers everything that is not recognizably a write; the router
/// treats it as a read. Misclassifying a read as a write only costs
/// performance, while the reverse would be incorrect, so the write detection
/// errs on the inclusive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Unknown,
    Read,
    Write,
}

/// Detects whether a statement must run on a primary.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, sql: &str) -> QueryKind;
}

/// Regex-level classifier.
///
/// A statement is a write when its first token is one of the DML/DDL
/// mutation verbs, or when it contains a bare `RETURNING` anywhere — the
/// safety net for DML that produces rows. Keywords inside string literals or
/// comments are not distinguished; that false positive merely routes a read
/// to the primary.
pub struct RegexQueryClassifier {
    write_pattern: Regex,
}

impl RegexQueryClassifier {
    pub fn new() -> Self {
        Self {
            write_pattern: Regex::new(
                r"(?i)^\s*(INSERT|UPDATE|DELETE|MERGE|TRUNCATE|REPLACE)\b|\bRETURNING\b",
            )
            .expect("write pattern is valid"),
        }
    }
}

impl Default for RegexQueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier for RegexQueryClassifier {
    fn classify(&self, sql: &str) -> QueryKind {
        if self.write_pattern.is_match(sql) {
            QueryKind::Write
        } else {
            QueryKind::Unknown
        }
    }
}
