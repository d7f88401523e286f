use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{AttendanceRecord, CreditRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreditTypeTotal {
    pub earned: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreditSummary {
    pub total_earned: f64,
    pub types: BTreeMap<String, CreditTypeTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditReport {
    pub summary: CreditSummary,
    pub details: Vec<CreditRecord>,
}

pub fn compute_credit_summary(credits: &[CreditRecord]) -> CreditReport {
    let mut summary = CreditSummary::default();

    for credit in credits {
        let amount = credit.amount();
        summary.total_earned += amount;
        let entry = summary
            .types
            .entry(credit.type_or_default().to_string())
            .or_default();
        entry.earned += amount;
        entry.count += 1;
    }

    let mut details = credits.to_vec();
    details.sort_by(|a, b| b.earned_date.cmp(&a.earned_date));

    CreditReport { summary, details }
}

/// Credit earned through attendance alone, as shown on a student's history.
pub fn total_credit_awarded(records: &[AttendanceRecord]) -> f64 {
    records.iter().map(AttendanceRecord::credit).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn credit(kind: Option<&str>, amount: Option<f64>, days_ago: i64) -> CreditRecord {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        CreditRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::nil(),
            credit_type: kind.map(str::to_string),
            credit_amount: amount,
            earned_date: base - Duration::days(days_ago),
            description: "Robotics Seminar".to_string(),
        }
    }

    #[test]
    fn empty_input_is_empty_summary() {
        let report = compute_credit_summary(&[]);
        assert_eq!(report.summary.total_earned, 0.0);
        assert!(report.summary.types.is_empty());
        assert!(report.details.is_empty());
    }

    #[test]
    fn sums_per_type_and_overall() {
        let credits = vec![
            credit(Some("service"), Some(2.0), 3),
            credit(Some("service"), Some(3.0), 2),
            credit(Some("academic"), Some(1.0), 1),
        ];
        let report = compute_credit_summary(&credits);
        assert_eq!(report.summary.total_earned, 6.0);
        assert_eq!(
            report.summary.types.get("service"),
            Some(&CreditTypeTotal { earned: 5.0, count: 2 })
        );
        assert_eq!(
            report.summary.types.get("academic"),
            Some(&CreditTypeTotal { earned: 1.0, count: 1 })
        );
    }

    #[test]
    fn missing_type_and_amount_fall_back() {
        let credits = vec![credit(None, None, 0), credit(Some("  "), Some(f64::NAN), 0)];
        let report = compute_credit_summary(&credits);
        assert_eq!(report.summary.total_earned, 0.0);
        assert_eq!(
            report.summary.types.get("general"),
            Some(&CreditTypeTotal { earned: 0.0, count: 2 })
        );
    }

    #[test]
    fn details_are_newest_first() {
        let credits = vec![
            credit(Some("a"), Some(1.0), 10),
            credit(Some("b"), Some(1.0), 0),
            credit(Some("c"), Some(1.0), 5),
        ];
        let report = compute_credit_summary(&credits);
        let kinds: Vec<&str> = report.details.iter().map(|c| c.type_or_default()).collect();
        assert_eq!(kinds, vec!["b", "c", "a"]);
    }

    #[test]
    fn attendance_credit_skips_missing_values() {
        let make = |credit_awarded| AttendanceRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::nil(),
            class_id: Uuid::nil(),
            date: Utc::now(),
            status: None,
            notes: None,
            credit_awarded,
        };
        let records = vec![make(Some(0.5)), make(None), make(Some(1.0))];
        assert_eq!(total_credit_awarded(&records), 1.5);
    }
}
