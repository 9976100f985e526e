//! Field taxonomy shared by the safety guard, risk scorer, field collector,
//! and persistence schema.
//!
//! The 17 field names, their valid ranges, and the categorical code→label
//! tables are a fixed contract; changing a code's meaning here requires a
//! coordinated change everywhere.

use serde::{Deserialize, Serialize};

/// Profile fields (collected once, stored on the user)
pub const PROFILE_FIELDS: &[&str] = &[
    "age",
    "gender",
    "year_in_school",
    "major",
    "preferred_payment_method",
];

/// Financial fields (collected every check-in)
pub const FINANCIAL_FIELDS: &[&str] = &[
    "monthly_income",
    "financial_aid",
    "tuition",
    "housing",
    "food",
    "transportation",
    "books_supplies",
    "entertainment",
    "personal_care",
    "technology",
    "health_wellness",
    "miscellaneous",
];

/// Bounds on validated values
pub const MIN_AGE: i64 = 16;
pub const MAX_AGE: i64 = 100;
pub const MAX_FIELD_VALUE: i64 = 1_000_000;

pub const GENDER_MAX_CODE: i64 = 3;
pub const YEAR_MAX_CODE: i64 = 4;
pub const MAJOR_MAX_CODE: i64 = 8;
pub const PAYMENT_MAX_CODE: i64 = 3;

/// Ordered taxonomy: profile fields first, then financial fields.
pub fn required_fields(has_profile: bool) -> Vec<&'static str> {
    if has_profile {
        FINANCIAL_FIELDS.to_vec()
    } else {
        PROFILE_FIELDS
            .iter()
            .chain(FINANCIAL_FIELDS.iter())
            .copied()
            .collect()
    }
}

pub fn is_known_field(name: &str) -> bool {
    PROFILE_FIELDS.contains(&name) || FINANCIAL_FIELDS.contains(&name)
}

//
// ================= Display Labels =================
//

pub fn gender_label(code: i64) -> &'static str {
    match code {
        0 => "Male",
        1 => "Female",
        2 => "Non-binary",
        _ => "Prefer not to say",
    }
}

pub fn year_label(code: i64) -> &'static str {
    match code {
        0 => "Freshman",
        1 => "Sophomore",
        2 => "Junior",
        3 => "Senior",
        _ => "Graduate",
    }
}

pub fn major_label(code: i64) -> &'static str {
    match code {
        0 => "STEM (Science, Technology, Engineering, Math)",
        1 => "Business",
        2 => "Humanities",
        3 => "Social Sciences",
        4 => "Arts",
        5 => "Health Sciences",
        6 => "Education",
        7 => "Law",
        _ => "Other",
    }
}

pub fn payment_label(code: i64) -> &'static str {
    match code {
        0 => "Cash",
        1 => "Credit Card",
        2 => "Debit Card",
        _ => "Mobile Payment (Venmo, Cash App, etc.)",
    }
}

//
// ================= ML Labels =================
//
// The trained artifacts expect the label strings they were fitted on, which
// differ from the display tables: credit and debit collapse into one column,
// and majors use the training survey's wording.

pub fn gender_ml_label(code: i64) -> &'static str {
    match code {
        0 => "Male",
        1 => "Female",
        _ => "Non-binary",
    }
}

pub fn year_ml_label(code: i64) -> &'static str {
    year_label(code)
}

pub fn major_ml_label(code: i64) -> &'static str {
    match code {
        0 => "Computer Science",
        1 => "Business",
        2 => "English",
        3 => "Psychology",
        4 => "Art",
        5 => "Biology",
        6 => "Education",
        7 => "Law",
        _ => "Economics",
    }
}

pub fn payment_ml_label(code: i64) -> &'static str {
    match code {
        0 => "Cash",
        1 | 2 => "Credit/Debit Card",
        _ => "Mobile Payment App",
    }
}

//
// ================= Snapshot Fields =================
//

/// The 17 structured fields a snapshot is built from. Dollar amounts are
/// monthly integers; demographic fields are categorical codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFields {
    pub age: i64,
    pub gender: i64,
    pub year_in_school: i64,
    pub major: i64,
    pub monthly_income: i64,
    pub financial_aid: i64,
    pub tuition: i64,
    pub housing: i64,
    pub food: i64,
    pub transportation: i64,
    pub books_supplies: i64,
    pub entertainment: i64,
    pub personal_care: i64,
    pub technology: i64,
    pub health_wellness: i64,
    pub miscellaneous: i64,
    pub preferred_payment_method: i64,
}

impl SnapshotFields {
    pub fn total_resources(&self) -> i64 {
        self.monthly_income + self.financial_aid
    }

    pub fn total_spending(&self) -> i64 {
        self.tuition
            + self.housing
            + self.food
            + self.transportation
            + self.books_supplies
            + self.entertainment
            + self.personal_care
            + self.technology
            + self.health_wellness
            + self.miscellaneous
    }

    pub fn discretionary_spending(&self) -> i64 {
        self.entertainment + self.personal_care + self.miscellaneous
    }

    /// Categorical codes must sit inside their tables. Monetary and age
    /// bounds are the safety guard's job; this check covers what the guard
    /// does not.
    pub fn validate_codes(&self) -> std::result::Result<(), String> {
        if !(0..=GENDER_MAX_CODE).contains(&self.gender) {
            return Err(format!("gender code {} out of range", self.gender));
        }
        if !(0..=YEAR_MAX_CODE).contains(&self.year_in_school) {
            return Err(format!(
                "year_in_school code {} out of range",
                self.year_in_school
            ));
        }
        if !(0..=MAJOR_MAX_CODE).contains(&self.major) {
            return Err(format!("major code {} out of range", self.major));
        }
        if !(0..=PAYMENT_MAX_CODE).contains(&self.preferred_payment_method) {
            return Err(format!(
                "preferred_payment_method code {} out of range",
                self.preferred_payment_method
            ));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        let value = match name {
            "age" => self.age,
            "gender" => self.gender,
            "year_in_school" => self.year_in_school,
            "major" => self.major,
            "monthly_income" => self.monthly_income,
            "financial_aid" => self.financial_aid,
            "tuition" => self.tuition,
            "housing" => self.housing,
            "food" => self.food,
            "transportation" => self.transportation,
            "books_supplies" => self.books_supplies,
            "entertainment" => self.entertainment,
            "personal_care" => self.personal_care,
            "technology" => self.technology,
            "health_wellness" => self.health_wellness,
            "miscellaneous" => self.miscellaneous,
            "preferred_payment_method" => self.preferred_payment_method,
            _ => return None,
        };
        Some(value)
    }

    /// Set a field by taxonomy name. Returns false for unknown names so
    /// callers can drop untrusted update proposals.
    pub fn set(&mut self, name: &str, value: i64) -> bool {
        match name {
            "age" => self.age = value,
            "gender" => self.gender = value,
            "year_in_school" => self.year_in_school = value,
            "major" => self.major = value,
            "monthly_income" => self.monthly_income = value,
            "financial_aid" => self.financial_aid = value,
            "tuition" => self.tuition = value,
            "housing" => self.housing = value,
            "food" => self.food = value,
            "transportation" => self.transportation = value,
            "books_supplies" => self.books_supplies = value,
            "entertainment" => self.entertainment = value,
            "personal_care" => self.personal_care = value,
            "technology" => self.technology = value,
            "health_wellness" => self.health_wellness = value,
            "miscellaneous" => self.miscellaneous = value,
            "preferred_payment_method" => self.preferred_payment_method = value,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_fields() -> SnapshotFields {
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

    #[test]
    fn test_taxonomy_sizes() {
        assert_eq!(PROFILE_FIELDS.len(), 5);
        assert_eq!(FINANCIAL_FIELDS.len(), 12);
        assert_eq!(required_fields(false).len(), 17);
        assert_eq!(required_fields(true).len(), 12);
    }

    #[test]
    fn test_totals() {
        let fields = sample_fields();
        assert_eq!(fields.total_resources(), 2300);
        assert_eq!(fields.total_spending(), 3015);
        assert_eq!(fields.discretionary_spending(), 665);
    }

    #[test]
    fn test_get_set_by_name() {
        let mut fields = sample_fields();
        assert_eq!(fields.get("food"), Some(420));
        assert!(fields.set("food", 350));
        assert_eq!(fields.food, 350);
        assert!(!fields.set("not_a_field", 1));
        assert_eq!(fields.get("not_a_field"), None);
    }

    #[test]
    fn test_code_validation() {
        let mut fields = sample_fields();
        assert!(fields.validate_codes().is_ok());
        fields.major = 9;
        assert!(fields.validate_codes().is_err());
    }

    #[test]
    fn test_ml_labels_collapse_payment_codes() {
        assert_eq!(payment_ml_label(1), payment_ml_label(2));
        assert_eq!(payment_ml_label(3), "Mobile Payment App");
        assert_eq!(gender_ml_label(3), "Non-binary");
    }
}
