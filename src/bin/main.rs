use spending_coach::{
    generation::{StaticGenerator, TextGenerator},
    models::RawAnswer,
    pipeline::SnapshotPipeline,
    risk::RiskScorer,
    store::InMemoryStore,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One-shot local run: intake a sample check-in and ask the coach a
/// question, all against the in-memory store and the static generator so no
/// API key or database is needed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Student Spending Coach starting");

    let canned = r#"{
        "age": 21, "gender": 1, "year_in_school": 2, "major": 0,
        "monthly_income": 2300, "financial_aid": 0, "tuition": 800,
        "housing": 800, "food": 420, "transportation": 100,
        "books_supplies": 50, "entertainment": 300, "personal_care": 150,
        "technology": 80, "health_wellness": 100, "miscellaneous": 215,
        "preferred_payment_method": 2,
        "summary_paragraph": "Spending is running ahead of income this month.",
        "key_points": ["Net balance is -$715", "Housing and tuition dominate"],
        "response_type": "coaching",
        "priority_issues": ["overspending"],
        "explanation": "Food and entertainment are the easiest places to trim."
    }"#;

    let generator: Arc<dyn TextGenerator> = Arc::new(StaticGenerator::replying(canned));
    let pipeline = SnapshotPipeline::new(
        generator,
        RiskScorer::from_env(),
        Arc::new(InMemoryStore::new()),
    );

    let user_id = Uuid::new_v4();
    let answers = vec![
        RawAnswer {
            question_id: "age".to_string(),
            answer: "I'm 21, a junior studying computer science".to_string(),
        },
        RawAnswer {
            question_id: "monthly_income".to_string(),
            answer: "about $2300 a month from my part-time job".to_string(),
        },
        RawAnswer {
            question_id: "food".to_string(),
            answer: "maybe $420 on food, $300 on going out".to_string(),
        },
    ];

    let intake = pipeline.intake(user_id, &answers).await?;

    println!("\n=== SNAPSHOT ===");
    println!("Snapshot ID: {}", intake.snapshot.id);
    println!("Total income:   ${}/month", intake.analytics.total_resources);
    println!("Total spending: ${}/month", intake.analytics.total_spending);
    println!("Net balance:    ${}/month", intake.analytics.net_balance);
    println!(
        "Overspending risk: {:.1}% | Stress risk: {:.1}%",
        intake.snapshot.overspending_prob * 100.0,
        intake.snapshot.financial_stress_prob * 100.0,
    );
    println!("\n{}", intake.snapshot.summary.summary_paragraph);
    for point in &intake.snapshot.summary.key_points {
        println!("  - {}", point);
    }

    let chat = pipeline
        .chat(user_id, "Where should I cut back first?", None)
        .await?;

    println!("\n=== COACH ===");
    println!("{}", chat.reply.explanation);
    for action in &chat.reply.actions_for_week {
        println!("  - {}", action);
    }

    Ok(())
}
