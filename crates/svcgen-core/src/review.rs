//! Turning the review stage's free text into a pass/fail verdict.
//!
//! Two classifiers are provided. [`KeywordClassifier`] reproduces the
//! prefix-and-length heuristic the review prompt was tuned against; it can
//! misjudge long confirmations as failures. [`TaggedClassifier`] expects an
//! explicit `VERDICT: PASS` or `VERDICT: FAIL` line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Pass,
    Fail,
}

impl ReviewVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

pub trait ReviewClassifier: Send + Sync {
    fn classify(&self, review: &str) -> ReviewVerdict;
}

const PASS_KEYWORDS: &[&str] = &["通过", "pass", "passed", "success", "successful", "成功"];
const FAIL_KEYWORDS: &[&str] = &["不通过", "fail", "failed", "error", "错误", "失败"];
const FAILURE_HINTS: &[&str] = &["错误", "问题", "error", "issue"];
const SHORT_RESPONSE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl ReviewClassifier for KeywordClassifier {
    fn classify(&self, review: &str) -> ReviewVerdict {
        let text = review.trim().to_lowercase();
        if text.is_empty() {
            return ReviewVerdict::Fail;
        }
        if PASS_KEYWORDS.iter().any(|k| text.starts_with(k)) {
            return ReviewVerdict::Pass;
        }
        if FAIL_KEYWORDS.iter().any(|k| text.starts_with(k)) {
            return ReviewVerdict::Fail;
        }
        if text.chars().count() < SHORT_RESPONSE_CHARS
            && !FAILURE_HINTS.iter().any(|h| text.contains(h))
        {
            return ReviewVerdict::Pass;
        }
        ReviewVerdict::Fail
    }
}

/// Reads the last `VERDICT:` line. Anything else is a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedClassifier;

impl ReviewClassifier for TaggedClassifier {
    fn classify(&self, review: &str) -> ReviewVerdict {
        let verdict = review
            .lines()
            .rev()
            .filter_map(|line| {
                let line = line.trim();
                let (tag, value) = line.split_once(':')?;
                tag.trim().eq_ignore_ascii_case("verdict").then(|| value.trim())
            })
            .next();
        match verdict {
            Some(v) if v.eq_ignore_ascii_case("pass") => ReviewVerdict::Pass,
            _ => ReviewVerdict::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword(text: &str) -> ReviewVerdict {
        KeywordClassifier.classify(text)
    }

    #[test]
    fn test_pass_prefixes() {
        assert_eq!(keyword("通过"), ReviewVerdict::Pass);
        assert_eq!(keyword("  PASSED: all outputs mapped"), ReviewVerdict::Pass);
        assert_eq!(keyword("Success"), ReviewVerdict::Pass);
    }

    #[test]
    fn test_fail_prefixes() {
        assert_eq!(keyword("不通过: missing output mapping"), ReviewVerdict::Fail);
        assert_eq!(keyword("Failed to map order"), ReviewVerdict::Fail);
        assert_eq!(keyword("错误：缺少返回语句"), ReviewVerdict::Fail);
    }

    #[test]
    fn test_short_fallback() {
        assert_eq!(keyword("Looks equivalent to the source."), ReviewVerdict::Pass);
        assert_eq!(keyword("Found an issue with the return"), ReviewVerdict::Fail);
        assert_eq!(keyword("存在问题"), ReviewVerdict::Fail);
        assert_eq!(keyword(""), ReviewVerdict::Fail);
    }

    #[test]
    fn test_long_unprefixed_text_fails() {
        let long = "The generated script maps every field of the original service ".repeat(3);
        assert_eq!(keyword(&long), ReviewVerdict::Fail);
    }

    #[test]
    fn test_tagged_verdict() {
        let tagged = TaggedClassifier;
        assert_eq!(tagged.classify("checked all paths\nVERDICT: PASS"), ReviewVerdict::Pass);
        assert_eq!(tagged.classify("verdict: pass\nVerdict: fail"), ReviewVerdict::Fail);
        assert_eq!(tagged.classify("通过"), ReviewVerdict::Fail);
    }
}
