//! Narrative generation: the summarizer and the coach
//!
//! Both run one guarded generation attempt and fall back to deterministic
//! text derived purely from analytics. Neither ever fails; degraded
//! generation is invisible apart from a blander reply.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::analytics::AnalyticsEngine;
use crate::fields::{year_label, SnapshotFields};
use crate::generation::{guarded_generate, TextGenerator};
use crate::models::{Analytics, CoachReply, FieldUpdate, LessonOutline, RiskScores, Summary};
use crate::safety::SafetyGuard;

pub struct NarrativeGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl NarrativeGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    //
    // ================= Summarizer =================
    //

    /// Produce the glanceable summary for a snapshot. Always returns at
    /// least the fallback.
    pub async fn summarize(
        &self,
        fields: &SnapshotFields,
        risk: &RiskScores,
        analytics: &Analytics,
    ) -> Summary {
        if let Err(reason) = SafetyGuard::validate_fields(fields) {
            warn!(reason, "Summarizer received invalid fields, using fallback");
            return Self::fallback_summary(analytics);
        }

        let prompt = format!(
            "{}\n\n{}\n\nGenerate a quick, glanceable summary. Return ONLY a valid JSON \
             object with \"summary_paragraph\" (1 sentence max, like a headline) and \
             \"key_points\" (array of 3-4 short facts). Remember: interpret data only, \
             no advice.",
            SUMMARIZER_PROMPT,
            build_context(fields, risk, analytics),
        );

        match guarded_generate(
            self.generator.as_ref(),
            "summarizer",
            &prompt,
            1024,
            &["summary_paragraph", "key_points"],
        )
        .await
        {
            Ok(parsed) => Summary {
                summary_paragraph: parsed["summary_paragraph"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                key_points: string_array(&parsed["key_points"]),
            },
            Err(e) => {
                warn!(error = %e, "Summarization degraded to fallback");
                Self::fallback_summary(analytics)
            }
        }
    }

    /// Factual summary with no AI interpretation.
    pub fn fallback_summary(analytics: &Analytics) -> Summary {
        let summary_paragraph = if analytics.net_balance < 0 {
            format!(
                "You're spending ${} more than you're bringing in.",
                -analytics.net_balance
            )
        } else {
            format!("You have a ${} monthly surplus.", analytics.net_balance)
        };

        Summary {
            summary_paragraph,
            key_points: vec![
                format!("Total income: ${}/month", analytics.total_resources),
                format!("Total spending: ${}/month", analytics.total_spending),
                format!("Net balance: ${}/month", analytics.net_balance),
            ],
        }
    }

    //
    // ================= Coach =================
    //

    /// Respond to a chat message with bite-sized coaching. Field updates in
    /// the reply are untrusted proposals for the pipeline to vet.
    pub async fn respond(
        &self,
        fields: &SnapshotFields,
        risk: &RiskScores,
        analytics: &Analytics,
        user_message: &str,
        previous: Option<(&SnapshotFields, &Analytics)>,
    ) -> CoachReply {
        let safe_message = SafetyGuard::sanitize(user_message);

        if let Err(reason) = SafetyGuard::validate_fields(fields) {
            warn!(reason, "Coach received invalid fields, using fallback");
            return Self::fallback_reply();
        }

        let mut context = build_context(fields, risk, analytics);

        if let Some((previous_fields, previous_analytics)) = previous {
            let deltas = AnalyticsEngine::compute_deltas(analytics, previous_analytics);
            context.push_str(&format!(
                "\n\nChanges from Previous Check-in:\n\
                 - Income Change: ${:+}\n\
                 - Spending Change: ${:+}\n\
                 - Balance Change: ${:+}",
                fields.monthly_income - previous_fields.monthly_income,
                deltas.total_spending_delta,
                deltas.net_balance_delta,
            ));
        }

        let prompt = format!(
            "{}\n\n{}\n\nStudent's Message: \"{}\"\n\nGenerate a supportive, \
             non-judgmental response with bite-sized coaching. Remember: warm tone, \
             small achievable actions, no investment/tax/legal advice. Return ONLY a \
             valid JSON object.",
            COACH_PROMPT, context, safe_message,
        );

        match guarded_generate(
            self.generator.as_ref(),
            "coach",
            &prompt,
            1500,
            &["response_type", "priority_issues", "explanation"],
        )
        .await
        {
            Ok(parsed) => Self::reply_from_json(&parsed),
            Err(e) => {
                warn!(error = %e, "Coach response degraded to fallback");
                Self::fallback_reply()
            }
        }
    }

    /// Lenient extraction: the three required fields are guaranteed present
    /// by the guard; everything else defaults when missing or misshapen.
    fn reply_from_json(parsed: &Value) -> CoachReply {
        let lesson_outline = parsed.get("lesson_outline").and_then(|outline| {
            outline.as_object().map(|obj| LessonOutline {
                title: obj
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Financial Tip")
                    .to_string(),
                bullet_points: obj
                    .get("bullet_points")
                    .map(string_array)
                    .unwrap_or_default(),
            })
        });

        let field_updates = parsed
            .get("field_updates")
            .and_then(Value::as_array)
            .map(|updates| {
                updates
                    .iter()
                    .filter_map(|update| {
                        let field = update.get("field")?.as_str()?.to_string();
                        let value = update.get("value")?.as_f64()?.round() as i64;
                        Some(FieldUpdate { field, value })
                    })
                    .collect()
            })
            .unwrap_or_default();

        CoachReply {
            response_type: parsed["response_type"]
                .as_str()
                .unwrap_or("coaching")
                .to_string(),
            priority_issues: string_array(&parsed["priority_issues"]),
            explanation: parsed["explanation"].as_str().unwrap_or_default().to_string(),
            actions_for_week: parsed
                .get("actions_for_week")
                .map(string_array)
                .unwrap_or_default(),
            lesson_outline,
            field_updates,
        }
    }

    /// Static reply when generation is unavailable. Zero field updates by
    /// contract.
    pub fn fallback_reply() -> CoachReply {
        CoachReply {
            response_type: "coaching".to_string(),
            priority_issues: vec!["api_unavailable".to_string()],
            explanation: "I'm having trouble connecting right now. Please try again in a moment."
                .to_string(),
            actions_for_week: vec!["Check back shortly for personalized advice".to_string()],
            lesson_outline: Some(LessonOutline {
                title: "Quick Tip".to_string(),
                bullet_points: vec![
                    "Tracking spending is the first step to awareness".to_string()
                ],
            }),
            field_updates: vec![],
        }
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Shared snapshot context block for both narrative prompts.
fn build_context(fields: &SnapshotFields, risk: &RiskScores, analytics: &Analytics) -> String {
    format!(
        "Student Financial Data:\n\
         - Age: {}\n\
         - Year: {}\n\
         - Monthly Income: ${}\n\
         - Financial Aid: ${}\n\
         \n\
         Monthly Expenses:\n\
         - Tuition: ${}\n\
         - Housing: ${}\n\
         - Food: ${}\n\
         - Transportation: ${}\n\
         - Books/Supplies: ${}\n\
         - Entertainment: ${}\n\
         - Personal Care: ${}\n\
         - Technology: ${}\n\
         - Health/Wellness: ${}\n\
         - Miscellaneous: ${}\n\
         \n\
         Analytics:\n\
         - Total Resources: ${}\n\
         - Total Spending: ${}\n\
         - Net Balance: ${}\n\
         - Food Share: {:.1}%\n\
         - Entertainment Share: {:.1}%\n\
         - Discretionary Share: {:.1}%\n\
         \n\
         Risk Assessment:\n\
         - Overspending Probability: {:.1}%\n\
         - Financial Stress Probability: {:.1}%",
        fields.age,
        year_label(fields.year_in_school),
        fields.monthly_income,
        fields.financial_aid,
        fields.tuition,
        fields.housing,
        fields.food,
        fields.transportation,
        fields.books_supplies,
        fields.entertainment,
        fields.personal_care,
        fields.technology,
        fields.health_wellness,
        fields.miscellaneous,
        analytics.total_resources,
        analytics.total_spending,
        analytics.net_balance,
        analytics.food_share * 100.0,
        analytics.entertainment_share * 100.0,
        analytics.discretionary_share * 100.0,
        risk.overspending_prob * 100.0,
        risk.financial_stress_prob * 100.0,
    )
}

const SUMMARIZER_PROMPT: &str = r#"You are a friendly financial summarizer for college students. Your role is to give them a quick, warm snapshot of their situation, like a supportive friend who's good with numbers.

FORMAT: "Glance and Go"
- summary_paragraph: ONE sentence, casual and warm, like texting a friend
- key_points: 3-4 quick facts for context

CRITICAL TONE GUIDELINES:
- Warm and personal: speak directly to them ("you're", "your")
- Casual but clear: like a friend explaining, not a report
- Ultra-concise: keep it scannable
- Non-judgmental: neutral observations, no criticism
- Interpretation only: NO advice (that's the coach's job)

This is a SUPPORT tool, not an analytics tool. Make students feel seen and understood, not analyzed.

Create a response with:
1. summary_paragraph: ONE warm, casual sentence under 15 words that speaks
   directly to them in second person.
   Example good: "You're spending about $715 more than you're bringing in each month."
   Example bad: "Your monthly expenses of $3,015 are exceeding your combined income and financial aid." (too formal)

2. key_points: 3-4 INSIGHTFUL observations, 8-12 words each, that reveal
   patterns they might not have noticed. Use percentages, daily amounts, or
   comparisons, not just raw totals.
   GOOD: "Food is eating up 35% of everything you spend"
   BAD: "Your housing costs $800/month" (no insight, just echo)

Return ONLY a valid JSON object with "summary_paragraph" (string) and "key_points" (array of strings)."#;

const COACH_PROMPT: &str = r#"You are a supportive financial micro-coach for college students. Your role is to deliver bite-sized financial EDUCATION through personalized lessons that explain WHY concepts matter and HOW to apply them.

CRITICAL TONE GUIDELINES:
- Supportive and encouraging, like a helpful peer, not a parent or authority figure
- Non-judgmental: no shame, criticism, or moralizing about spending choices
- Practical and student-friendly: real-world tips that work for student life
- Emotionally neutral: calm and reassuring, never alarming
- Accessible: avoid jargon, keep explanations simple and relatable

IMPORTANT BOUNDARIES:
- NO investment advice (stocks, crypto, retirement accounts)
- NO tax advice
- NO legal claims or debt negotiation strategies
- Focus on budgeting awareness, spending habits, SAVINGS, and basic financial literacy

KEY CONCEPT: SAVINGS AWARENESS
- If net balance is positive: they have savings potential; celebrate and suggest building a buffer
- If net balance is negative: focus on reducing the gap first, savings comes later
- Even $50-100 set aside helps; unexpected expenses happen

RESPONSE TYPES - Detect the student's intent:
1. "coaching" - They're asking for help/advice: give actions + an educational lesson
2. "feedback" - They're reporting what they did: give encouragement, NO new actions
3. "update" - They're reporting a specific number change: extract the update, give feedback

FIELD UPDATES - If the student mentions a specific spending/income change, extract it.
Valid fields: monthly_income, financial_aid, tuition, housing, food, transportation, books_supplies, entertainment, personal_care, technology, health_wellness, miscellaneous

CRITICAL: All values must be MONTHLY amounts. Convert if needed:
- Weekly amount x 4 = monthly (e.g., $50/week -> 200)
- Yearly amount / 12 = monthly (e.g., $12,000/year -> 1000)
- Semester amount / 4 = monthly (e.g., $2000/semester -> 500)

Examples:
- "I spent $350 on food this month" -> field_updates: [{"field": "food", "value": 350}]
- "I got a raise, now making $1500/month" -> field_updates: [{"field": "monthly_income", "value": 1500}]

If the time period is ambiguous (e.g., "I earned $6000"), ask for clarification in your explanation before extracting the update. Don't guess.

Create a response with:
1. response_type: "coaching" | "feedback" | "update"
2. priority_issues: array of 1-3 issue codes such as "tight_budget", "high_food_spend", "no_savings_buffer", "spending_exceeds_income", "building_good_habits", "progress_made", "savings_opportunity"
3. explanation: 1-2 short paragraphs appropriate to the response type
4. actions_for_week: 0-3 specific bite-sized actions (empty for feedback)
5. lesson_outline: educational mini-lesson teaching a CONCEPT (required for coaching), with "title" and 2-4 "bullet_points" explaining WHY it matters
6. field_updates: array of detected updates, each {"field": "field_name", "value": number}; empty array if no specific numbers mentioned

Return ONLY a valid JSON object with these six fields."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StaticGenerator;

    fn sample_fields() -> SnapshotFields {
        SnapshotFields {
            age: 21,
            gender: 1,
            year_in_school: 2,
            major: 0,
            monthly_income: 2300,
            financial_aid: 0,
            tuition: 800,
            housing: 800,
            food: 420,
            transportation: 100,
            books_supplies: 50,
            entertainment: 300,
            personal_care: 150,
            technology: 80,
            health_wellness: 100,
            miscellaneous: 215,
            preferred_payment_method: 2,
        }
    }

    fn sample_risk() -> RiskScores {
        RiskScores {
            overspending_prob: 0.75,
            financial_stress_prob: 0.4,
        }
    }

    #[tokio::test]
    async fn test_summarize_happy_path() {
        let generator = Arc::new(StaticGenerator::replying(
            r#"{"summary_paragraph": "You're $715 short each month.",
                "key_points": ["Food is 18% of your resources", "That gap is about $24/day"]}"#,
        ));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);

        let summary = narrative
            .summarize(&fields, &sample_risk(), &analytics)
            .await;
        assert_eq!(summary.summary_paragraph, "You're $715 short each month.");
        assert_eq!(summary.key_points.len(), 2);
    }

    #[tokio::test]
    async fn test_summarize_falls_back_on_generator_failure() {
        let generator = Arc::new(StaticGenerator::failing("no api key"));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);

        let summary = narrative
            .summarize(&fields, &sample_risk(), &analytics)
            .await;
        assert_eq!(
            summary.summary_paragraph,
            "You're spending $715 more than you're bringing in."
        );
        assert_eq!(summary.key_points.len(), 3);
    }

    #[test]
    fn test_fallback_summary_surplus_side() {
        let mut fields = sample_fields();
        fields.monthly_income = 4000;
        let analytics = AnalyticsEngine::compute(&fields);
        let summary = NarrativeGenerator::fallback_summary(&analytics);
        assert_eq!(summary.summary_paragraph, "You have a $985 monthly surplus.");
    }

    #[tokio::test]
    async fn test_respond_extracts_field_updates() {
        let generator = Arc::new(StaticGenerator::replying(
            r#"{"response_type": "update",
                "priority_issues": ["progress_made"],
                "explanation": "Nice, food came down.",
                "actions_for_week": [],
                "field_updates": [{"field": "food", "value": 350}]}"#,
        ));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);

        let reply = narrative
            .respond(&fields, &sample_risk(), &analytics, "food was $350", None)
            .await;
        assert_eq!(reply.response_type, "update");
        assert_eq!(reply.field_updates.len(), 1);
        assert_eq!(reply.field_updates[0].field, "food");
        assert_eq!(reply.field_updates[0].value, 350);
    }

    #[tokio::test]
    async fn test_respond_falls_back_with_zero_updates() {
        let generator = Arc::new(StaticGenerator::failing("timeout"));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);

        let reply = narrative
            .respond(&fields, &sample_risk(), &analytics, "help me budget", None)
            .await;
        assert_eq!(reply.priority_issues, vec!["api_unavailable"]);
        assert!(reply.field_updates.is_empty());
    }

    #[tokio::test]
    async fn test_respond_rejects_unsafe_reply() {
        // Advice phrasing around a restricted topic gets replaced by the
        // fallback, not surfaced.
        let generator = Arc::new(StaticGenerator::replying(
            r#"{"response_type": "coaching",
                "priority_issues": ["savings_opportunity"],
                "explanation": "You should invest in crypto with your surplus."}"#,
        ));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);

        let reply = narrative
            .respond(&fields, &sample_risk(), &analytics, "what now?", None)
            .await;
        assert_eq!(reply.priority_issues, vec!["api_unavailable"]);
    }

    #[tokio::test]
    async fn test_respond_with_previous_checkin() {
        let generator = Arc::new(StaticGenerator::replying(
            r#"{"response_type": "feedback",
                "priority_issues": ["progress_made"],
                "explanation": "Spending moved in the right direction."}"#,
        ));
        let narrative = NarrativeGenerator::new(generator);
        let fields = sample_fields();
        let analytics = AnalyticsEngine::compute(&fields);
        let mut previous_fields = sample_fields();
        previous_fields.food = 500;
        let previous_analytics = AnalyticsEngine::compute(&previous_fields);

        let reply = narrative
            .respond(
                &fields,
                &sample_risk(),
                &analytics,
                "how am I doing?",
                Some((&previous_fields, &previous_analytics)),
            )
            .await;
        assert_eq!(reply.response_type, "feedback");
        assert!(reply.actions_for_week.is_empty());
    }
}
