//! Signature matching over the request text.
//!
//! Families are evaluated in registry order and the first family with any
//! matching pattern wins. Matches are case-insensitive. The matcher keeps no
//! state, so the same input always yields the same event.

use crate::{
    config::PatternConfig,
    detector::{DetectionContext, Detector},
    event::{AttackCategory, SecurityEvent, Severity},
    features::FeatureVector,
};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFamily {
    Injection,
    Script,
    AccountTakeover,
    ApiAbuse,
}

impl SignatureFamily {
    pub fn category(&self) -> AttackCategory {
        match self {
            Self::Injection       => AttackCategory::InjectionAttack,
            Self::Script          => AttackCategory::CrossSiteScript,
            Self::AccountTakeover => AttackCategory::AccountTakeover,
            Self::ApiAbuse        => AttackCategory::ApiAbuse,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Injection       => "SQL injection attempt",
            Self::Script          => "Script injection attempt",
            Self::AccountTakeover => "Account takeover marker",
            Self::ApiAbuse        => "API abuse marker",
        }
    }
}

const INJECTION: &[&str] = &[
    r"(\bunion\b.*\bselect\b)|(\bselect\b.*\bunion\b)",
    r"(\bor\b\s+\d+\s*=\s*\d+)|(\band\b\s+\d+\s*=\s*\d+)",
    r"(\bdrop\b\s+\btable\b)|(\bdelete\b\s+\bfrom\b)",
    r"(\binsert\b\s+\binto\b)|(\bupdate\b\s+\bset\b)",
    r#"('|"|`).*(union|select|insert|delete|update|drop)"#,
    r"\b(exec|execute)\s*\(",
    r"(;|\s)(shutdown|xp_cmdshell|sp_executesql)",
];

const SCRIPT: &[&str] = &[
    r"<script[^>]*>.*?</script>",
    r"javascript:\s*[^;]+",
    r"on(load|error|click|mouse|focus|blur)\s*=",
    r"<iframe[^>]*src\s*=",
    r"eval\s*\(",
    r"document\.(write|writeln|cookie)",
    r"window\.(location|open)",
];

const ACCOUNT_TAKEOVER: &[&str] = &[
    r"multiple_failed_attempts",
    r"password_reset_abuse",
    r"session_token_manipulation",
    r"credential_stuffing_pattern",
];

const API_ABUSE: &[&str] = &[
    r"excessive_api_calls",
    r"rate_limit_exceeded",
    r"unauthorized_endpoint_access",
    r"data_scraping_pattern",
];

struct Signature {
    family: SignatureFamily,
    source: &'static str,
    regex: Regex,
}

/// Registry order is evaluation order. Never reorder.
static REGISTRY: Lazy<Vec<Signature>> = Lazy::new(|| {
    let families = [
        (SignatureFamily::Injection, INJECTION),
        (SignatureFamily::Script, SCRIPT),
        (SignatureFamily::AccountTakeover, ACCOUNT_TAKEOVER),
        (SignatureFamily::ApiAbuse, API_ABUSE),
    ];
    families
        .into_iter()
        .flat_map(|(family, patterns)| patterns.iter().map(move |p| (family, *p)))
        .filter_map(|(family, source)| {
            match RegexBuilder::new(source).case_insensitive(true).build() {
                Ok(regex) => Some(Signature { family, source, regex }),
                Err(e) => {
                    log::error!("Signature '{source}' failed to compile: {e}");
                    None
                }
            }
        })
        .collect()
});

/// A single signature hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMatch {
    pub family: SignatureFamily,
    pub pattern: &'static str,
}

pub struct PatternMatcher {
    config: PatternConfig,
}

impl PatternMatcher {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// First matching signature in registry order.
    pub fn first_match(&self, text: &str) -> Option<SignatureMatch> {
        REGISTRY
            .iter()
            .find(|sig| sig.regex.is_match(text))
            .map(|sig| SignatureMatch {
                family: sig.family,
                pattern: sig.source,
            })
    }

    pub fn confidence(&self, family: SignatureFamily) -> f64 {
        match family {
            SignatureFamily::Injection       => self.config.injection_confidence,
            SignatureFamily::Script          => self.config.script_confidence,
            SignatureFamily::AccountTakeover => self.config.takeover_confidence,
            SignatureFamily::ApiAbuse        => self.config.api_abuse_confidence,
        }
    }
}

impl Detector for PatternMatcher {
    fn name(&self) -> &'static str {
        "pattern_matcher"
    }

    fn detect(&self, _features: &FeatureVector, ctx: &DetectionContext<'_>) -> Option<SecurityEvent> {
        let hit = self.first_match(&ctx.entry.inspected_text())?;
        log::debug!(
            "Signature hit from {}: {:?} /{}/",
            ctx.entry.source_ip,
            hit.family,
            hit.pattern
        );
        Some(
            SecurityEvent::detected(
                ctx.entry,
                hit.family.category(),
                Severity::High,
                self.confidence(hit.family),
                self.name(),
                format!("{} detected: {}", hit.family.label(), hit.pattern),
            )
            .with_factors(vec![hit.pattern.to_string()]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreatConfig;

    fn matcher() -> PatternMatcher {
        PatternMatcher::new(ThreatConfig::default_test().patterns)
    }

    #[test]
    fn every_signature_compiles() {
        let total = INJECTION.len() + SCRIPT.len() + ACCOUNT_TAKEOVER.len() + API_ABUSE.len();
        assert_eq!(REGISTRY.len(), total);
    }

    #[test]
    fn injection_is_case_insensitive() {
        let m = matcher();
        let hit = m.first_match("/api/accounts?id=1 UnIoN SeLeCt password from users").unwrap();
        assert_eq!(hit.family, SignatureFamily::Injection);
        assert_eq!(m.first_match("id=1 OR 1=1").unwrap().family, SignatureFamily::Injection);
    }

    #[test]
    fn injection_wins_over_script_when_both_match() {
        let m = matcher();
        let text = "<script>alert(1)</script> ' union select 1";
        assert_eq!(m.first_match(text).unwrap().family, SignatureFamily::Injection);
    }

    #[test]
    fn script_markers() {
        let m = matcher();
        for text in [
            "<img src=x onerror=alert(1)>",
            "javascript:alert(document)",
            "<iframe width=1 src=http://evil>",
        ] {
            assert_eq!(m.first_match(text).unwrap().family, SignatureFamily::Script, "{text}");
        }
    }

    #[test]
    fn benign_text_does_not_match() {
        let m = matcher();
        assert!(m.first_match("/api/accounts/123/balance GET").is_none());
        assert!(m.first_match("").is_none());
    }

    #[test]
    fn markers_map_to_their_confidence() {
        let m = matcher();
        let hit = m.first_match("flag=credential_stuffing_pattern").unwrap();
        assert_eq!(hit.family.category(), AttackCategory::AccountTakeover);
        assert_eq!(m.confidence(hit.family), 0.75);
        let hit = m.first_match("data_scraping_pattern").unwrap();
        assert_eq!(m.confidence(hit.family), 0.70);
    }
}
