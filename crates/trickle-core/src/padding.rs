//! First-chunk padding for browsers that buffer before rendering.
//!
//! Several browsers hold back incremental rendering until a minimum
//! number of bytes has arrived. The first chunk of a progressive
//! response is topped up with an inert HTML comment so that threshold is
//! crossed immediately.

use anyhow::Context;
use regex::Regex;
use tracing::trace;

use crate::config::{PaddingConfig, default_rules};

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";
const FILLER: char = '+';

#[derive(Debug, Clone)]
struct FamilyRule {
    family: String,
    pattern: Regex,
    target: usize,
}

/// Ordered User-Agent → padding target table. First match wins.
#[derive(Debug, Clone, Default)]
pub struct PaddingTable {
    rules: Vec<FamilyRule>,
}

impl PaddingTable {
    pub fn from_config(config: &PaddingConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).with_context(|| {
                    format!("invalid padding pattern for {}: {}", rule.family, rule.pattern)
                })?;
                Ok(FamilyRule {
                    family: rule.family.clone(),
                    pattern,
                    target: rule.target,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// The built-in IE / Firefox / Chrome / Safari table.
    pub fn builtin() -> Self {
        let config = PaddingConfig {
            enabled: true,
            rules: default_rules(),
        };
        Self::from_config(&config).expect("built-in padding patterns are valid")
    }

    /// A table that never pads.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Matching family name, if any.
    pub fn family(&self, user_agent: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(user_agent))
            .map(|r| r.family.as_str())
    }

    /// Size the first chunk should reach for this agent. `None` for
    /// exempt, unknown, or absent agents.
    pub fn target_for(&self, user_agent: Option<&str>) -> Option<usize> {
        let user_agent = user_agent?;
        let rule = self.rules.iter().find(|r| r.pattern.is_match(user_agent))?;
        trace!(family = %rule.family, target = rule.target, "padding family matched");
        (rule.target > 0).then_some(rule.target)
    }
}

/// Append the padding comment so `chunk` becomes exactly `target` bytes.
/// Chunks already too large for a comment to fit are left alone.
pub fn pad_to(chunk: &mut String, target: usize) {
    let overhead = COMMENT_OPEN.len() + COMMENT_CLOSE.len();
    let Some(filler) = target.checked_sub(chunk.len() + overhead) else {
        return;
    };
    chunk.reserve(filler + overhead);
    chunk.push_str(COMMENT_OPEN);
    chunk.extend(std::iter::repeat_n(FILLER, filler));
    chunk.push_str(COMMENT_CLOSE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaddingRule;

    const IE: &str = "Mozilla/5.0 (Windows; U; MSIE 9.0; WIndows NT 9.0; en-US)";
    const CHROME: &str = "Mozilla/5.0 (Windows NT 5.1) AppleWebKit/534.25 (KHTML, like Gecko) Chrome/12.0.706.0 Safari/534.25";
    const SAFARI: &str = "Mozilla/5.0 (Windows; U; Windows NT 6.1; tr-TR) AppleWebKit/533.20.25 (KHTML, like Gecko) Version/5.0.4 Safari/533.20.27";
    const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:2.2a1pre) Gecko/20110324 Firefox/4.2a1pre";

    #[test]
    fn builtin_families() {
        let table = PaddingTable::builtin();
        assert_eq!(table.target_for(Some(IE)), Some(255));
        assert_eq!(table.target_for(Some(CHROME)), Some(2048));
        assert_eq!(table.target_for(Some(SAFARI)), Some(1024));
        assert_eq!(table.target_for(Some(FIREFOX)), None);
        assert_eq!(table.family(CHROME), Some("chrome"));
        assert_eq!(table.family(FIREFOX), Some("firefox"));
    }

    #[test]
    fn unknown_or_garbage_agents_get_nothing() {
        let table = PaddingTable::builtin();
        assert_eq!(table.target_for(None), None);
        assert_eq!(table.target_for(Some("")), None);
        assert_eq!(table.target_for(Some("curl/8.0")), None);
        assert_eq!(table.target_for(Some("\u{0}\u{ffff}MSIE")), None);
    }

    #[test]
    fn pad_reaches_target_exactly() {
        let mut chunk = "a".to_string();
        pad_to(&mut chunk, 255);
        assert_eq!(chunk.len(), 255);
        assert_eq!(chunk, format!("a<!--{}-->", "+".repeat(247)));

        let mut chunk = "a".to_string();
        pad_to(&mut chunk, 2048);
        assert_eq!(chunk, format!("a<!--{}-->", "+".repeat(2040)));
    }

    #[test]
    fn empty_comment_fills_the_last_seven_bytes() {
        let mut chunk = "x".repeat(248);
        pad_to(&mut chunk, 255);
        assert_eq!(chunk.len(), 255);
        assert!(chunk.ends_with("x<!---->"));

        let mut chunk = "x".repeat(249);
        pad_to(&mut chunk, 255);
        assert_eq!(chunk.len(), 249);
    }

    #[test]
    fn large_chunks_are_not_padded() {
        let mut chunk = "x".repeat(250);
        pad_to(&mut chunk, 255);
        assert_eq!(chunk.len(), 250);

        let mut chunk = "x".repeat(300);
        pad_to(&mut chunk, 255);
        assert_eq!(chunk.len(), 300);
    }

    #[test]
    fn disabled_config_never_pads() {
        let config = PaddingConfig {
            enabled: false,
            rules: default_rules(),
        };
        let table = PaddingTable::from_config(&config).unwrap();
        assert_eq!(table.target_for(Some(IE)), None);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let config = PaddingConfig {
            enabled: true,
            rules: vec![PaddingRule {
                family: "broken".into(),
                pattern: "(".into(),
                target: 10,
            }],
        };
        let err = PaddingTable::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
