//! Safety guardrails for every generative call
//!
//! Input sanitization, numeric bounds, output content checks, and
//! structured-output validation. All checks are total: they classify,
//! they never panic on well-formed strings.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::fields::{SnapshotFields, FINANCIAL_FIELDS, MAX_AGE, MAX_FIELD_VALUE, MIN_AGE};

/// Maximum user message length before truncation
pub const MAX_USER_MESSAGE_LENGTH: usize = 2000;

const REDACTED: &str = "[removed]";

/// Topics we never give advice on. Mentioning one is fine; advice
/// phrasing around one is not.
const RESTRICTED_TOPICS: &[&str] = &[
    "investment",
    "stock",
    "crypto",
    "bitcoin",
    "tax",
    "legal",
    "lawsuit",
    "bankruptcy",
];

const ADVICE_PHRASINGS: &[&str] = &["you should", "i recommend", "invest in", "buy"];

lazy_static! {
    static ref INJECTION_PATTERNS: Vec<Regex> = [
        r"(?i)ignore previous instructions",
        r"(?i)disregard all prior",
        r"(?i)forget everything",
        r"(?i)you are now",
        r"(?i)new instructions:",
        r"(?i)system prompt:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static injection pattern"))
    .collect();

    static ref HARMFUL_PATTERNS: Vec<Regex> = [
        r"(?i)\b(kill|suicide|self-harm|hurt yourself)\b",
        r"(?i)\b(illegal|fraud|scam|steal)\b",
        r"(?i)\b(guaranteed returns|get rich quick|insider)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static harmful pattern"))
    .collect();

    static ref ADVICE_PATTERNS: Vec<(&'static str, Regex)> = {
        let mut patterns = Vec::new();
        for topic in RESTRICTED_TOPICS {
            for phrasing in ADVICE_PHRASINGS {
                let pattern = format!(r"(?i){}.*{}", regex::escape(phrasing), topic);
                patterns.push((
                    *topic,
                    Regex::new(&pattern).expect("static advice pattern"),
                ));
            }
        }
        patterns
    };
}

/// Stateless guard; all checks are associated functions.
pub struct SafetyGuard;

impl SafetyGuard {
    /// Sanitize user text before it reaches a prompt: truncate to the max
    /// length (with ellipsis) and redact prompt-injection phrases.
    /// Idempotent on already-clean text.
    pub fn sanitize(message: &str) -> String {
        if message.is_empty() {
            return String::new();
        }

        let mut text = if message.chars().count() > MAX_USER_MESSAGE_LENGTH {
            warn!(
                original_len = message.chars().count(),
                "User message truncated"
            );
            let truncated: String = message.chars().take(MAX_USER_MESSAGE_LENGTH).collect();
            format!("{}...", truncated)
        } else {
            message.to_string()
        };

        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(&text) {
                warn!(pattern = %pattern.as_str(), "Potential prompt injection redacted");
                text = pattern.replace_all(&text, REDACTED).into_owned();
            }
        }

        text.trim().to_string()
    }

    /// Validate monetary fields and age against their declared bounds.
    /// The first violation short-circuits with a readable reason.
    pub fn validate_fields(fields: &SnapshotFields) -> Result<(), String> {
        for name in FINANCIAL_FIELDS {
            // Field names come from the fixed taxonomy, so the lookup
            // cannot miss.
            let value = fields.get(name).unwrap_or(0);
            if value < 0 {
                return Err(format!("{} cannot be negative", name));
            }
            if value > MAX_FIELD_VALUE {
                return Err(format!("{} exceeds maximum allowed value", name));
            }
        }

        if fields.age < MIN_AGE || fields.age > MAX_AGE {
            return Err(format!("Age must be between {} and {}", MIN_AGE, MAX_AGE));
        }

        Ok(())
    }

    /// Scan generated text for harmful content and restricted-topic advice.
    pub fn check_output_safety(response_text: &str) -> Result<(), String> {
        for pattern in HARMFUL_PATTERNS.iter() {
            if pattern.is_match(response_text) {
                warn!(pattern = %pattern.as_str(), "Harmful pattern detected in output");
                return Err("Response contained potentially harmful content".to_string());
            }
        }

        for (topic, pattern) in ADVICE_PATTERNS.iter() {
            if pattern.is_match(response_text) {
                warn!(topic, "Restricted financial advice detected");
                return Err(format!(
                    "Response contained advice on restricted topic: {}",
                    topic
                ));
            }
        }

        Ok(())
    }

    /// Parse generated text as JSON (stripping an optional code fence) and
    /// require the given top-level fields.
    pub fn validate_structured_output(
        response_text: &str,
        required_fields: &[&str],
    ) -> Result<Value, String> {
        let cleaned = response_text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let parsed: Value =
            serde_json::from_str(cleaned).map_err(|e| format!("Invalid JSON: {}", e))?;

        let missing: Vec<&str> = required_fields
            .iter()
            .filter(|field| parsed.get(**field).is_none())
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(format!("Missing fields: {}", missing.join(", ")));
        }

        Ok(parsed)
    }

    /// Append the fixed safety reminders every generative prompt carries.
    pub fn add_safety_context(prompt: &str) -> String {
        format!(
            "{}\n\nSAFETY REMINDERS:\n\
             - Never provide specific investment, tax, or legal advice\n\
             - Do not make claims about guaranteed outcomes\n\
             - Keep tone supportive and non-judgmental\n\
             - If unsure, err on the side of caution\n\
             - Focus only on general budgeting awareness and financial literacy",
            prompt
        )
    }

    /// Audit line for a generative interaction.
    pub fn log_interaction(service: &str, input: &str, output: &str, success: bool) {
        let status = if success { "SUCCESS" } else { "FAILURE" };
        info!(
            service,
            status,
            input = %input.chars().take(100).collect::<String>(),
            output = %output.chars().take(100).collect::<String>(),
            "Generation interaction"
        );
    }
}
