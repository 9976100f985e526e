//! Adaptive field collection
//!
//! Tracks which structured fields are still missing and produces the next
//! conversational question. Question text may come from the generator; the
//! canned table below covers every field in the taxonomy so the flow never
//! stalls when generation is unavailable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fields::required_fields;
use crate::generation::{guarded_generate, TextGenerator};
use crate::safety::SafetyGuard;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Ephemeral per-intake state; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSession {
    pub history: Vec<ConversationTurn>,
    pub collected: HashSet<String>,
    pub has_profile: bool,
}

impl CollectionSession {
    pub fn new(has_profile: bool) -> Self {
        Self {
            history: Vec::new(),
            collected: HashSet::new(),
            has_profile,
        }
    }

    pub fn record_turn(&mut self, role: &str, content: &str) {
        self.history.push(ConversationTurn {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    pub fn mark_collected(&mut self, field: &str) {
        self.collected.insert(field.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyPrompt {
    pub field: Option<String>,
    pub question: Option<String>,
    pub context: Option<String>,
    pub is_complete: bool,
    pub suggested_type: Option<String>,
    pub options: Option<Vec<String>>,
    pub progress: f64,
}

impl SurveyPrompt {
    fn complete() -> Self {
        Self {
            field: None,
            question: None,
            context: None,
            is_complete: true,
            suggested_type: None,
            options: None,
            progress: 1.0,
        }
    }
}

struct CannedQuestion {
    question: &'static str,
    context: Option<&'static str>,
    suggested_type: &'static str,
    options: Option<&'static [&'static str]>,
}

lazy_static! {
    static ref CANNED_QUESTIONS: HashMap<&'static str, CannedQuestion> = {
        let mut table = HashMap::new();
        table.insert("age", CannedQuestion {
            question: "Let's start with the basics! How old are you?",
            context: Some("This helps me tailor advice to your life stage."),
            suggested_type: "number",
            options: None,
        });
        table.insert("gender", CannedQuestion {
            question: "How do you identify?",
            context: Some("This helps personalize your experience."),
            suggested_type: "select",
            options: Some(&["Male", "Female", "Non-binary", "Prefer not to say"]),
        });
        table.insert("year_in_school", CannedQuestion {
            question: "What year are you in school?",
            context: Some("Different years come with different financial challenges."),
            suggested_type: "select",
            options: Some(&["Freshman", "Sophomore", "Junior", "Senior", "Graduate"]),
        });
        table.insert("major", CannedQuestion {
            question: "What are you studying?",
            context: Some("Your major can affect both expenses and future income."),
            suggested_type: "text",
            options: None,
        });
        table.insert("monthly_income", CannedQuestion {
            question: "How much money do you bring in each month?",
            context: Some(
                "Include jobs, allowances, gig work, everything that comes in regularly.",
            ),
            suggested_type: "number",
            options: None,
        });
        table.insert("financial_aid", CannedQuestion {
            question: "Do you receive any financial aid? How much per month?",
            context: Some(
                "Include scholarships, grants, and any loan money you use for living expenses.",
            ),
            suggested_type: "number",
            options: None,
        });
        table.insert("tuition", CannedQuestion {
            question: "What's your monthly tuition cost?",
            context: Some("If you pay per semester, just divide by the number of months."),
            suggested_type: "number",
            options: None,
        });
        table.insert("housing", CannedQuestion {
            question: "How much do you spend on housing each month?",
            context: Some("Include rent, utilities, internet, the whole package."),
            suggested_type: "number",
            options: None,
        });
        table.insert("food", CannedQuestion {
            question: "What about food? How much do you typically spend monthly?",
            context: Some("Groceries, meal plans, dining out, coffee runs, all of it counts!"),
            suggested_type: "number",
            options: None,
        });
        table.insert("transportation", CannedQuestion {
            question: "How much do you spend getting around?",
            context: Some("Gas, public transit, rideshares, bike maintenance, whatever you use."),
            suggested_type: "number",
            options: None,
        });
        table.insert("books_supplies", CannedQuestion {
            question: "What do books and supplies cost you monthly?",
            context: Some(
                "Textbooks, lab materials, school supplies. If it varies, give me an average.",
            ),
            suggested_type: "number",
            options: None,
        });
        table.insert("entertainment", CannedQuestion {
            question: "Now for the fun stuff: how much goes to entertainment?",
            context: Some("Streaming, games, concerts, nights out with friends."),
            suggested_type: "number",
            options: None,
        });
        table.insert("personal_care", CannedQuestion {
            question: "What about personal care and self-maintenance?",
            context: Some("Haircuts, skincare, gym, clothes, taking care of yourself."),
            suggested_type: "number",
            options: None,
        });
        table.insert("technology", CannedQuestion {
            question: "Any regular technology expenses?",
            context: Some("Phone plan, app subscriptions, software you need."),
            suggested_type: "number",
            options: None,
        });
        table.insert("health_wellness", CannedQuestion {
            question: "What do you spend on health and wellness?",
            context: Some("Insurance, medications, therapy, doctor visits."),
            suggested_type: "number",
            options: None,
        });
        table.insert("miscellaneous", CannedQuestion {
            question: "Anything else we haven't covered?",
            context: Some(
                "Gifts, random purchases, unexpected expenses, the stuff that doesn't fit elsewhere.",
            ),
            suggested_type: "number",
            options: None,
        });
        table.insert("preferred_payment_method", CannedQuestion {
            question: "Last one! How do you usually pay for things?",
            context: Some("This tells me a bit about your spending habits."),
            suggested_type: "select",
            options: Some(&[
                "Cash",
                "Credit Card",
                "Debit Card",
                "Mobile Payment (Venmo, Apple Pay, etc.)",
            ]),
        });
        table
    };
}

pub struct FieldCollector {
    generator: Arc<dyn TextGenerator>,
}

impl FieldCollector {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Decide the next question. Terminal once every required field has
    /// been collected.
    pub async fn next_prompt(
        &self,
        history: &[ConversationTurn],
        collected: &HashSet<String>,
        has_profile: bool,
    ) -> SurveyPrompt {
        let required = required_fields(has_profile);
        let missing: Vec<&str> = required
            .iter()
            .filter(|field| !collected.contains(**field))
            .copied()
            .collect();

        if missing.is_empty() {
            return SurveyPrompt::complete();
        }

        let target = missing[0];
        let progress = collected.len() as f64 / required.len() as f64;

        match self
            .generate_question(history, collected, &missing, target)
            .await
        {
            Some(prompt) => SurveyPrompt { progress, ..prompt },
            None => Self::canned_prompt(target, progress),
        }
    }

    async fn generate_question(
        &self,
        history: &[ConversationTurn],
        collected: &HashSet<String>,
        missing: &[&str],
        target: &str,
    ) -> Option<SurveyPrompt> {
        let mut collected_names: Vec<&str> = collected.iter().map(|s| s.as_str()).collect();
        collected_names.sort_unstable();

        let mut context = format!(
            "Fields already collected: {}\nFields still needed: {}\nNext field to collect: {}\n\nConversation so far:\n",
            if collected_names.is_empty() {
                "None yet".to_string()
            } else {
                collected_names.join(", ")
            },
            missing.join(", "),
            target,
        );

        if history.is_empty() {
            context.push_str("(This is the start of the conversation)");
        } else {
            for turn in history {
                context.push_str(&format!(
                    "\n{}: {}",
                    turn.role,
                    SafetyGuard::sanitize(&turn.content)
                ));
            }
        }

        let prompt = format!("{}\n\n{}", SURVEY_PROMPT, context);

        match guarded_generate(
            self.generator.as_ref(),
            "survey",
            &prompt,
            500,
            &["field", "question"],
        )
        .await
        {
            Ok(parsed) => Some(SurveyPrompt {
                field: Some(
                    parsed["field"]
                        .as_str()
                        .unwrap_or(target)
                        .to_string(),
                ),
                question: parsed["question"].as_str().map(|s| s.to_string()),
                context: parsed["context"].as_str().map(|s| s.to_string()),
                is_complete: false,
                suggested_type: Some(
                    parsed["suggested_type"]
                        .as_str()
                        .unwrap_or("text")
                        .to_string(),
                ),
                options: parsed["options"].as_array().map(|options| {
                    options
                        .iter()
                        .filter_map(|option| option.as_str().map(|s| s.to_string()))
                        .collect()
                }),
                progress: 0.0,
            }),
            Err(e) => {
                warn!(error = %e, field = target, "Survey question generation failed, using canned question");
                None
            }
        }
    }

    fn canned_prompt(target: &str, progress: f64) -> SurveyPrompt {
        // Table covers the full taxonomy, so the lookup only misses for
        // names outside it; keep a generic question for that case anyway.
        match CANNED_QUESTIONS.get(target) {
            Some(canned) => SurveyPrompt {
                field: Some(target.to_string()),
                question: Some(canned.question.to_string()),
                context: canned.context.map(|s| s.to_string()),
                is_complete: false,
                suggested_type: Some(canned.suggested_type.to_string()),
                options: canned
                    .options
                    .map(|options| options.iter().map(|s| s.to_string()).collect()),
                progress,
            },
            None => SurveyPrompt {
                field: Some(target.to_string()),
                question: Some(format!("Tell me about your {}", target.replace('_', " "))),
                context: None,
                is_complete: false,
                suggested_type: Some("text".to_string()),
                options: None,
                progress,
            },
        }
    }
}

const SURVEY_PROMPT: &str = r#"You are a friendly financial coach collecting information from a college student. Your goal is to gather their financial data through a natural, conversational flow.

Based on the conversation so far, generate the next question to ask. Be:
- Warm and conversational, not robotic
- Brief but clear
- Encouraging when appropriate

Return JSON with:
{
  "field": "the_field_being_asked",
  "question": "Your conversational question",
  "context": "Optional helper text",
  "suggested_type": "number|text|select",
  "options": ["only", "for", "select", "types"]
}"#;
