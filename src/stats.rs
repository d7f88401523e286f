use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceStatus, ClassHistoryEntry, StudentProfile};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceCount {
    pub student: StudentProfile,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyAttendance {
    pub date: NaiveDate,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl DailyAttendance {
    fn bump(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_records: usize,
    pub stats_by_status: BTreeMap<AttendanceStatus, usize>,
    pub overall_attendance_rate: u32,
    pub absences_by_student: Vec<AbsenceCount>,
    pub attendance_over_time: Vec<DailyAttendance>,
}

impl AttendanceStats {
    /// Count for a status; statuses never observed read as zero.
    pub fn count(&self, status: AttendanceStatus) -> usize {
        self.stats_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Summarises an already-fetched set of attendance records.
///
/// `profiles` supplies display details for the absence ranking; students
/// missing from it are reported with a placeholder profile. Records without a
/// recognised status count toward `total_records` only.
pub fn compute_attendance_stats(
    records: &[AttendanceRecord],
    profiles: &HashMap<Uuid, StudentProfile>,
) -> AttendanceStats {
    let mut stats_by_status: BTreeMap<AttendanceStatus, usize> = BTreeMap::new();
    let mut absences: Vec<(Uuid, usize)> = Vec::new();
    let mut absence_slot: HashMap<Uuid, usize> = HashMap::new();
    let mut by_day: BTreeMap<NaiveDate, DailyAttendance> = BTreeMap::new();

    for record in records {
        let day = by_day.entry(record.day()).or_insert_with(|| DailyAttendance {
            date: record.day(),
            ..DailyAttendance::default()
        });

        let Some(status) = record.status else {
            continue;
        };

        *stats_by_status.entry(status).or_insert(0) += 1;
        day.bump(status);

        if status == AttendanceStatus::Absent {
            let slot = *absence_slot.entry(record.student_id).or_insert_with(|| {
                absences.push((record.student_id, 0));
                absences.len() - 1
            });
            absences[slot].1 += 1;
        }
    }

    let count = |status: AttendanceStatus| stats_by_status.get(&status).copied().unwrap_or(0);
    let overall_attendance_rate = attendance_rate(
        count(AttendanceStatus::Present),
        count(AttendanceStatus::Absent),
        count(AttendanceStatus::Late),
    );

    // sort_by is stable, so equal counts keep first-occurrence order
    absences.sort_by(|a, b| b.1.cmp(&a.1));
    let absences_by_student = absences
        .into_iter()
        .map(|(student_id, count)| AbsenceCount {
            student: profiles
                .get(&student_id)
                .cloned()
                .unwrap_or_else(|| StudentProfile::unknown(student_id)),
            count,
        })
        .collect();

    AttendanceStats {
        total_records: records.len(),
        stats_by_status,
        overall_attendance_rate,
        absences_by_student,
        attendance_over_time: by_day.into_values().collect(),
    }
}

/// Percentage of sessions attended, rounded half-up. Excused sessions are not counted.
pub fn attendance_rate(present: usize, absent: usize, late: usize) -> u32 {
    let denominator = present + absent + late;
    if denominator == 0 {
        return 0;
    }
    (100.0 * present as f64 / denominator as f64).round() as u32
}

/// Pairs each record with its student, newest session first and then by name.
pub fn class_history(
    records: Vec<AttendanceRecord>,
    profiles: &HashMap<Uuid, StudentProfile>,
) -> Vec<ClassHistoryEntry> {
    let mut history: Vec<ClassHistoryEntry> = records
        .into_iter()
        .map(|record| ClassHistoryEntry {
            student: profiles
                .get(&record.student_id)
                .cloned()
                .unwrap_or_else(|| StudentProfile::unknown(record.student_id)),
            record,
        })
        .collect();
    history.sort_by(|a, b| {
        b.record
            .day()
            .cmp(&a.record.day())
            .then_with(|| a.student.display_name.cmp(&b.student.display_name))
    });
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};

    fn record(
        student_id: Uuid,
        day: u32,
        hour: u32,
        status: Option<AttendanceStatus>,
    ) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            student_id,
            class_id: Uuid::nil(),
            date: Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap(),
            status,
            notes: None,
            credit_awarded: None,
        }
    }

    fn profile(id: Uuid, name: &str) -> StudentProfile {
        StudentProfile {
            id,
            display_name: name.to_string(),
            email: format!("{}@school.test", name.to_lowercase()),
        }
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let stats = compute_attendance_stats(&[], &HashMap::new());
        assert_eq!(stats.total_records, 0);
        assert!(stats.stats_by_status.is_empty());
        assert_eq!(stats.overall_attendance_rate, 0);
        assert!(stats.absences_by_student.is_empty());
        assert!(stats.attendance_over_time.is_empty());
        assert_eq!(stats.count(AttendanceStatus::Absent), 0);
    }

    #[test]
    fn rate_ignores_excused_and_rounds() {
        let s = Uuid::new_v4();
        let records = vec![
            record(s, 2, 9, Some(AttendanceStatus::Present)),
            record(s, 3, 9, Some(AttendanceStatus::Present)),
            record(s, 4, 9, Some(AttendanceStatus::Late)),
            record(s, 5, 9, Some(AttendanceStatus::Excused)),
        ];
        let stats = compute_attendance_stats(&records, &HashMap::new());
        // 2 of 3 -> 66.67 -> 67
        assert_eq!(stats.overall_attendance_rate, 67);
        assert_eq!(attendance_rate(1, 1, 0), 50);
        assert_eq!(attendance_rate(0, 0, 0), 0);
    }

    #[test]
    fn only_excused_gives_zero_rate() {
        let records = vec![record(Uuid::new_v4(), 2, 9, Some(AttendanceStatus::Excused))];
        let stats = compute_attendance_stats(&records, &HashMap::new());
        assert_eq!(stats.overall_attendance_rate, 0);
        assert_eq!(stats.count(AttendanceStatus::Excused), 1);
    }

    #[test]
    fn unknown_status_counts_only_in_total() {
        let s = Uuid::new_v4();
        let records = vec![
            record(s, 2, 9, Some(AttendanceStatus::Present)),
            record(s, 2, 10, None),
        ];
        let stats = compute_attendance_stats(&records, &HashMap::new());
        assert_eq!(stats.total_records, 2);
        let bucketed: usize = stats.stats_by_status.values().sum();
        assert_eq!(bucketed, 1);
        assert_eq!(stats.attendance_over_time.len(), 1);
        assert_eq!(stats.attendance_over_time[0].present, 1);
    }

    #[test]
    fn absences_rank_descending_with_stable_ties() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let records = vec![
            record(b, 2, 9, Some(AttendanceStatus::Absent)),
            record(a, 2, 9, Some(AttendanceStatus::Absent)),
            record(c, 2, 9, Some(AttendanceStatus::Absent)),
            record(c, 3, 9, Some(AttendanceStatus::Absent)),
            record(a, 3, 9, Some(AttendanceStatus::Present)),
        ];
        let profiles = HashMap::from([(a, profile(a, "Ana")), (c, profile(c, "Cy"))]);
        let stats = compute_attendance_stats(&records, &profiles);

        let ranked: Vec<(Uuid, usize)> = stats
            .absences_by_student
            .iter()
            .map(|entry| (entry.student.id, entry.count))
            .collect();
        assert_eq!(ranked, vec![(c, 2), (b, 1), (a, 1)]);
        assert_eq!(stats.absences_by_student[0].student.display_name, "Cy");
        assert_eq!(stats.absences_by_student[1].student.display_name, "Unknown student");

        let total: usize = stats.absences_by_student.iter().map(|e| e.count).sum();
        assert_eq!(total, stats.count(AttendanceStatus::Absent));
    }

    #[test]
    fn days_group_by_date_and_sort_ascending() {
        let s = Uuid::new_v4();
        let records = vec![
            record(s, 10, 15, Some(AttendanceStatus::Late)),
            record(s, 3, 8, Some(AttendanceStatus::Present)),
            record(s, 10, 8, Some(AttendanceStatus::Absent)),
            record(s, 3, 14, Some(AttendanceStatus::Excused)),
        ];
        let stats = compute_attendance_stats(&records, &HashMap::new());
        let days = &stats.attendance_over_time;
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 2, 3).unwrap());
        assert_eq!((days[0].present, days[0].excused), (1, 1));
        assert_eq!(days[1].date, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
        assert_eq!((days[1].absent, days[1].late), (1, 1));
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn status_map_serializes_with_lowercase_keys() {
        let records = vec![record(Uuid::new_v4(), 2, 9, Some(AttendanceStatus::Late))];
        let stats = compute_attendance_stats(&records, &HashMap::new());
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["statsByStatus"]["late"], 1);
        assert_eq!(value["totalRecords"], 1);
    }

    #[test]
    fn class_history_is_newest_first_then_by_name() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let records = vec![
            record(a, 3, 9, Some(AttendanceStatus::Present)),
            record(b, 5, 9, Some(AttendanceStatus::Absent)),
            record(a, 5, 9, Some(AttendanceStatus::Late)),
            record(Uuid::new_v4(), 4, 9, None),
        ];
        let profiles = HashMap::from([(a, profile(a, "Zed")), (b, profile(b, "Abe"))]);
        let history = class_history(records, &profiles);

        let order: Vec<(u32, &str)> = history
            .iter()
            .map(|entry| (entry.record.day().day(), entry.student.display_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(5, "Abe"), (5, "Zed"), (4, "Unknown student"), (3, "Zed")]
        );
    }
}
