use std::fmt::Write;
use std::io;

use chrono::NaiveDate;

use crate::credits::CreditReport;
use crate::models::{AttendanceStatus, RosterEntry};
use crate::stats::AttendanceStats;

pub fn build_report(
    scope: &str,
    generated_on: NaiveDate,
    stats: &AttendanceStats,
    top: usize,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(output, "Generated for {} on {}", scope, generated_on);
    let _ = writeln!(output);

    if stats.total_records == 0 {
        let _ = writeln!(output, "No attendance has been recorded yet.");
        return output;
    }

    let _ = writeln!(output, "## Overview");
    let _ = writeln!(
        output,
        "- Attendance rate: {}% across {} records",
        stats.overall_attendance_rate, stats.total_records
    );
    for status in AttendanceStatus::ALL {
        let _ = writeln!(output, "- {}: {}", status, stats.count(status));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students with Most Absences");

    if stats.absences_by_student.is_empty() {
        let _ = writeln!(output, "No absences recorded.");
    } else {
        for entry in stats.absences_by_student.iter().take(top) {
            let _ = writeln!(
                output,
                "- {} ({}): {} absences",
                entry.student.display_name, entry.student.email, entry.count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance Trend");
    let _ = writeln!(output, "| Date | Present | Absent | Late | Excused |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for day in &stats.attendance_over_time {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            day.date, day.present, day.absent, day.late, day.excused
        );
    }

    output
}

pub fn build_credit_report(student: &str, report: &CreditReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Credit Report for {}", student);
    let _ = writeln!(output, "Total earned: {:.2}", report.summary.total_earned);
    let _ = writeln!(output);
    let _ = writeln!(output, "## By Type");

    if report.summary.types.is_empty() {
        let _ = writeln!(output, "No credits earned yet.");
    } else {
        for (kind, total) in &report.summary.types {
            let _ = writeln!(
                output,
                "- {}: {:.2} from {} awards",
                kind, total.earned, total.count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## History");
    for credit in &report.details {
        let _ = writeln!(
            output,
            "- {} {:.2} {} ({})",
            credit.earned_date.date_naive(),
            credit.amount(),
            credit.type_or_default(),
            credit.description
        );
    }

    output
}

/// Writes the class roster as CSV, one row per enrolled student.
pub fn export_roster_csv<W: io::Write>(writer: W, roster: &[RosterEntry]) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["Name", "Email", "Student ID", "Grade Level", "Enrollment Date"])?;
    for entry in roster {
        let grade = entry
            .grade_level
            .map(|g| g.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let enrolled = entry.enrolled_at.format("%Y-%m-%d").to_string();
        writer.write_record([
            entry.student.display_name.as_str(),
            entry.student.email.as_str(),
            entry.student_number.as_str(),
            grade.as_str(),
            enrolled.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use crate::credits::compute_credit_summary;
    use crate::models::{AttendanceRecord, CreditRecord, StudentProfile};
    use crate::stats::compute_attendance_stats;

    #[test]
    fn empty_stats_render_placeholder() {
        let stats = compute_attendance_stats(&[], &HashMap::new());
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = build_report("Robotics", day, &stats, 5);
        assert!(report.contains("No attendance has been recorded yet."));
        assert!(!report.contains("## Overview"));
    }

    #[test]
    fn report_lists_rate_absences_and_trend() {
        let student = Uuid::new_v4();
        let records: Vec<AttendanceRecord> = [AttendanceStatus::Absent, AttendanceStatus::Present]
            .into_iter()
            .enumerate()
            .map(|(i, status)| AttendanceRecord {
                id: Uuid::new_v4(),
                student_id: student,
                class_id: Uuid::nil(),
                date: Utc.with_ymd_and_hms(2026, 2, 2 + i as u32, 9, 0, 0).unwrap(),
                status: Some(status),
                notes: None,
                credit_awarded: None,
            })
            .collect();
        let stats = compute_attendance_stats(&records, &HashMap::new());
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = build_report("all classes", day, &stats, 5);

        assert!(report.contains("Attendance rate: 50% across 2 records"));
        assert!(report.contains("- excused: 0"));
        assert!(report.contains("Unknown student (): 1 absences"));
        assert!(report.contains("| 2026-02-02 | 0 | 1 | 0 | 0 |"));
        assert!(report.contains("| 2026-02-03 | 1 | 0 | 0 | 0 |"));
    }

    #[test]
    fn credit_report_groups_by_type() {
        let credits = vec![CreditRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::nil(),
            credit_type: Some("service".to_string()),
            credit_amount: Some(0.25),
            earned_date: Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap(),
            description: "Urban Ecology Seminar".to_string(),
        }];
        let report = build_credit_report("Noor Haddad", &compute_credit_summary(&credits));
        assert!(report.contains("Total earned: 0.25"));
        assert!(report.contains("- service: 0.25 from 1 awards"));
        assert!(report.contains("- 2026-02-02 0.25 service (Urban Ecology Seminar)"));
    }

    #[test]
    fn roster_csv_has_headers_and_placeholder_grade() {
        let roster = vec![
            RosterEntry {
                enrollment_id: Uuid::new_v4(),
                student: StudentProfile {
                    id: Uuid::new_v4(),
                    display_name: "Haddad, Noor".to_string(),
                    email: "noor@school.test".to_string(),
                },
                student_number: "S-1041".to_string(),
                grade_level: Some(10),
                enrolled_at: Utc.with_ymd_and_hms(2026, 1, 12, 15, 30, 0).unwrap(),
            },
            RosterEntry {
                enrollment_id: Uuid::new_v4(),
                student: StudentProfile {
                    id: Uuid::new_v4(),
                    display_name: "Eli Brennan".to_string(),
                    email: "eli@school.test".to_string(),
                },
                student_number: String::new(),
                grade_level: None,
                enrolled_at: Utc.with_ymd_and_hms(2026, 2, 3, 8, 0, 0).unwrap(),
            },
        ];

        let mut out = Vec::new();
        export_roster_csv(&mut out, &roster).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Name,Email,Student ID,Grade Level,Enrollment Date");
        assert_eq!(lines[1], "\"Haddad, Noor\",noor@school.test,S-1041,10,2026-01-12");
        assert_eq!(lines[2], "Eli Brennan,eli@school.test,,N/A,2026-02-03");
        assert_eq!(lines.len(), 3);
    }
}
