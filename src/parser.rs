//! Intake answer parsing
//!
//! Turns free-form survey answers into the 17 structured fields via one
//! guarded generation call. There is no deterministic fallback here: output
//! the generator cannot produce as valid JSON is a terminal
//! `UnprocessableInput` for the submission.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::error::{CoachError, Result};
use crate::fields::{required_fields, SnapshotFields};
use crate::generation::{guarded_generate, TextGenerator};
use crate::models::RawAnswer;
use crate::safety::SafetyGuard;

pub struct AnswerParser {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerParser {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn parse(&self, raw_answers: &[RawAnswer]) -> Result<SnapshotFields> {
        let answers_text = raw_answers
            .iter()
            .map(|answer| {
                format!(
                    "- {}: {}",
                    answer.question_id,
                    SafetyGuard::sanitize(&answer.answer)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = build_parser_prompt(&answers_text);
        let all_fields = required_fields(false);

        let parsed = guarded_generate(
            self.generator.as_ref(),
            "parser",
            &prompt,
            1024,
            &all_fields,
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Intake parsing failed");
            CoachError::UnprocessableInput(format!("Failed to parse intake data: {}", e))
        })?;

        fields_from_json(&parsed)
    }
}

/// Pull each taxonomy field out of the parsed object, accepting integers or
/// floats (rounded). A non-numeric value is a terminal failure.
fn fields_from_json(parsed: &Value) -> Result<SnapshotFields> {
    let mut fields = SnapshotFields {
        age: 0,
        gender: 0,
        year_in_school: 0,
        major: 0,
        monthly_income: 0,
        financial_aid: 0,
        tuition: 0,
        housing: 0,
        food: 0,
        transportation: 0,
        books_supplies: 0,
        entertainment: 0,
        personal_care: 0,
        technology: 0,
        health_wellness: 0,
        miscellaneous: 0,
        preferred_payment_method: 0,
    };

    for name in required_fields(false) {
        let value = parsed
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
            .ok_or_else(|| {
                CoachError::UnprocessableInput(format!("Parsed field {} is not numeric", name))
            })?;
        fields.set(name, value);
    }

    Ok(fields)
}

fn build_parser_prompt(answers_text: &str) -> String {
    format!(
        r#"Parse the following survey answers into structured financial data. Extract the values and convert them to the specified formats.

Survey Answers:
{}

Return a JSON object with these exact fields (use the integer codes specified):

- age: integer (16-100)
- gender: integer (0=Male, 1=Female, 2=Non-binary, 3=Prefer not to say)
- year_in_school: integer (0=Freshman, 1=Sophomore, 2=Junior, 3=Senior, 4=Graduate)
- major: integer - Map the field of study to one of these categories:
  0=STEM (computer science, engineering, math, physics, chemistry, biology, data science, etc.)
  1=Business (finance, accounting, marketing, economics, MBA, etc.)
  2=Humanities (english, history, philosophy, languages, literature, etc.)
  3=Social Sciences (psychology, sociology, political science, anthropology, etc.)
  4=Arts (art, music, theater, design, film, etc.)
  5=Health Sciences (nursing, pre-med, public health, kinesiology, etc.)
  6=Education
  7=Law/Pre-Law
  8=Other
- monthly_income: integer in dollars (extract number, default 0)
- financial_aid: integer in dollars (extract number, default 0)
- tuition: integer in dollars (extract number, default 0)
- housing: integer in dollars (extract number, default 0)
- food: integer in dollars (extract number, default 0)
- transportation: integer in dollars (extract number, default 0)
- books_supplies: integer in dollars (extract number, default 0)
- entertainment: integer in dollars (extract number, default 0)
- personal_care: integer in dollars (extract number, default 0)
- technology: integer in dollars (extract number, default 0)
- health_wellness: integer in dollars (extract number, default 0)
- miscellaneous: integer in dollars (extract number, default 0)
- preferred_payment_method: integer (0=Cash, 1=Credit Card, 2=Debit Card, 3=Mobile Payment)

Important:
- Understand common abbreviations: "CS" = Computer Science = STEM (0), "econ" = Economics = Business (1), "psych" = Psychology = Social Sciences (3), etc.
- Extract just the numeric value from money amounts (e.g., "$500" -> 500, "about 300" -> 300)
- All amounts are MONTHLY; if a value is unclear or missing, use reasonable defaults

Return ONLY the JSON object, no other text or markdown."#,
        answers_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StaticGenerator;

    fn answers() -> Vec<RawAnswer> {
        vec![
            RawAnswer {
                question_id: "age".to_string(),
                answer: "I'm 21".to_string(),
            },
            RawAnswer {
                question_id: "monthly_income".to_string(),
                answer: "about $2300 a month".to_string(),
            },
        ]
    }

    const PARSED: &str = r#"{
        "age": 21, "gender": 1, "year_in_school": 2, "major": 0,
        "monthly_income": 2300, "financial_aid": 0, "tuition": 800,
        "housing": 800, "food": 420, "transportation": 100,
        "books_supplies": 50, "entertainment": 300, "personal_care": 150,
        "technology": 80, "health_wellness": 100, "miscellaneous": 215,
        "preferred_payment_method": 2
    }"#;

    #[tokio::test]
    async fn test_parse_happy_path() {
        let parser = AnswerParser::new(Arc::new(StaticGenerator::replying(PARSED)));
        let fields = parser.parse(&answers()).await.unwrap();
        assert_eq!(fields.age, 21);
        assert_eq!(fields.monthly_income, 2300);
        assert_eq!(fields.total_spending(), 3015);
    }

    #[tokio::test]
    async fn test_parse_fenced_json() {
        let fenced = format!("```json\n{}\n```", PARSED);
        let parser = AnswerParser::new(Arc::new(StaticGenerator::replying(&fenced)));
        assert!(parser.parse(&answers()).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_output_is_unprocessable() {
        let parser = AnswerParser::new(Arc::new(StaticGenerator::replying("not json")));
        let err = parser.parse(&answers()).await.unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
    }

    #[tokio::test]
    async fn test_missing_field_is_unprocessable() {
        let parser = AnswerParser::new(Arc::new(StaticGenerator::replying("{\"age\": 21}")));
        let err = parser.parse(&answers()).await.unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
    }

    #[tokio::test]
    async fn test_generator_outage_is_terminal_for_parsing() {
        let parser = AnswerParser::new(Arc::new(StaticGenerator::failing("no key")));
        let err = parser.parse(&answers()).await.unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
        assert!(err.is_user_visible());
    }

    #[tokio::test]
    async fn test_float_values_round() {
        let parsed = PARSED.replace("\"food\": 420", "\"food\": 420.4");
        let parser = AnswerParser::new(Arc::new(StaticGenerator::replying(&parsed)));
        let fields = parser.parse(&answers()).await.unwrap();
        assert_eq!(fields.food, 420);
    }
}
