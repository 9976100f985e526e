//! Deterministic budget analytics
//!
//! Pure functions from snapshot fields to derived totals and shares.
//! No failure mode; inputs are assumed range-validated upstream.

use crate::fields::SnapshotFields;
use crate::models::{Analytics, AnalyticsDeltas};

pub struct AnalyticsEngine;

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl AnalyticsEngine {
    pub fn compute(fields: &SnapshotFields) -> Analytics {
        let total_resources = fields.total_resources();
        let total_spending = fields.total_spending();
        let discretionary = fields.discretionary_spending();

        // Shares are zero by rule when there are no resources. Avoiding the
        // division is a policy choice, not an error path.
        let share = |category: i64| -> f64 {
            if total_resources > 0 {
                round3(category as f64 / total_resources as f64)
            } else {
                0.0
            }
        };

        let net_balance = total_resources - total_spending;
        let is_overspending = net_balance < 0;

        Analytics {
            total_resources,
            total_spending,
            net_balance,
            is_overspending,
            overspending_amount: if is_overspending { -net_balance } else { 0 },
            savings_potential: if net_balance > 0 { net_balance } else { 0 },
            food_share: share(fields.food),
            housing_share: share(fields.housing),
            entertainment_share: share(fields.entertainment),
            discretionary_share: share(discretionary),
            tuition_share: share(fields.tuition),
        }
    }

    pub fn compute_deltas(current: &Analytics, previous: &Analytics) -> AnalyticsDeltas {
        AnalyticsDeltas {
            total_spending_delta: current.total_spending - previous.total_spending,
            net_balance_delta: current.net_balance - previous.net_balance,
            food_share_delta: round3(current.food_share - previous.food_share),
            entertainment_share_delta: round3(
                current.entertainment_share - previous.entertainment_share,
            ),
            discretionary_share_delta: round3(
                current.discretionary_share - previous.discretionary_share,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_with(income: i64, aid: i64) -> SnapshotFields {
        SnapshotFields {
            age: 21,
            gender: 1,
            year_in_school: 2,
            major: 0,
            monthly_income: income,
            financial_aid: aid,
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

    #[test]
    fn test_reference_scenario() {
        // income=2300, aid=0 against the 10 spending categories above.
        let analytics = AnalyticsEngine::compute(&fields_with(2300, 0));

        assert_eq!(analytics.total_resources, 2300);
        assert_eq!(analytics.total_spending, 3015);
        assert_eq!(analytics.net_balance, -715);
        assert!(analytics.is_overspending);
        assert_eq!(analytics.overspending_amount, 715);
        assert_eq!(analytics.savings_potential, 0);
    }

    #[test]
    fn test_balance_identity_and_exclusivity() {
        for (income, aid) in [(2300, 0), (4000, 500), (3015, 0), (0, 3015)] {
            let analytics = AnalyticsEngine::compute(&fields_with(income, aid));
            assert_eq!(
                analytics.total_resources - analytics.total_spending,
                analytics.net_balance
            );
            // Exactly one of the two is nonzero, or both are zero when the
            // balance is exactly zero.
            if analytics.net_balance == 0 {
                assert_eq!(analytics.overspending_amount, 0);
                assert_eq!(analytics.savings_potential, 0);
            } else {
                assert!(
                    (analytics.overspending_amount > 0) ^ (analytics.savings_potential > 0)
                );
            }
        }
    }

    #[test]
    fn test_surplus_side() {
        let analytics = AnalyticsEngine::compute(&fields_with(4000, 0));
        assert!(!analytics.is_overspending);
        assert_eq!(analytics.overspending_amount, 0);
        assert_eq!(analytics.savings_potential, 985);
    }

    #[test]
    fn test_shares_rounding() {
        let analytics = AnalyticsEngine::compute(&fields_with(2300, 0));
        // 420 / 2300 = 0.18260... -> 0.183
        assert_eq!(analytics.food_share, 0.183);
        // discretionary = 665 / 2300 = 0.28913... -> 0.289
        assert_eq!(analytics.discretionary_share, 0.289);
        assert_eq!(analytics.tuition_share, 0.348);
    }

    #[test]
    fn test_zero_resources_zeroes_all_shares() {
        let analytics = AnalyticsEngine::compute(&fields_with(0, 0));
        assert_eq!(analytics.food_share, 0.0);
        assert_eq!(analytics.housing_share, 0.0);
        assert_eq!(analytics.entertainment_share, 0.0);
        assert_eq!(analytics.discretionary_share, 0.0);
        assert_eq!(analytics.tuition_share, 0.0);
    }

    #[test]
    fn test_deltas_are_plain_subtraction() {
        let current = AnalyticsEngine::compute(&fields_with(2300, 0));
        let mut earlier_fields = fields_with(2300, 0);
        earlier_fields.food = 500;
        let previous = AnalyticsEngine::compute(&earlier_fields);

        let deltas = AnalyticsEngine::compute_deltas(&current, &previous);
        assert_eq!(deltas.total_spending_delta, -80);
        assert_eq!(deltas.net_balance_delta, 80);
        // 0.183 - 0.217 = -0.034
        assert_eq!(deltas.food_share_delta, -0.034);
        assert_eq!(deltas.entertainment_share_delta, 0.0);
    }
}
