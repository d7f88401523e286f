use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{
    AttendanceDraft, AttendanceEntry, AttendanceRecord, AttendanceStatus, ClassInfo, DraftEntry,
    RosterEntry,
};

/// Starting draft for an attendance date: every roster student is absent
/// unless a record for that date already exists, in which case it is reused.
pub fn roster_defaults(roster: &[RosterEntry], existing: &[AttendanceRecord]) -> AttendanceDraft {
    let by_student: HashMap<Uuid, &AttendanceRecord> =
        existing.iter().map(|r| (r.student_id, r)).collect();

    roster
        .iter()
        .map(|entry| {
            let student_id = entry.student.id;
            let draft = match by_student.get(&student_id) {
                Some(record) => DraftEntry {
                    id: Some(record.id),
                    status: Some(record.status.unwrap_or(AttendanceStatus::Absent)),
                    notes: record.notes.clone(),
                    credit_awarded: record.credit_awarded,
                },
                None => DraftEntry {
                    status: Some(AttendanceStatus::Absent),
                    ..DraftEntry::default()
                },
            };
            (student_id, draft)
        })
        .collect()
}

/// Changing a status drops any credit carried over from the stored record,
/// so the saved row earns the credit that matches the new status.
fn set_status(entry: &mut DraftEntry, status: AttendanceStatus) {
    if entry.status != Some(status) {
        entry.credit_awarded = None;
    }
    entry.status = Some(status);
}

pub fn apply_mark_all_present(draft: &AttendanceDraft, roster: &[RosterEntry]) -> AttendanceDraft {
    let mut updated = draft.clone();
    for entry in roster {
        set_status(updated.entry(entry.student.id).or_default(), AttendanceStatus::Present);
    }
    updated
}

/// Sets one student's status; returns false when the student has no draft entry.
pub fn mark(draft: &mut AttendanceDraft, student_id: Uuid, status: AttendanceStatus) -> bool {
    match draft.get_mut(&student_id) {
        Some(entry) => {
            set_status(entry, status);
            true
        }
        None => false,
    }
}

/// Credit a session earns for the status when no explicit amount was given.
pub fn credit_for(status: AttendanceStatus, class: &ClassInfo) -> f64 {
    if status.earns_credit() {
        class.credit_value
    } else {
        0.0
    }
}

/// Rows to persist for the date, in roster order.
pub fn finalize_draft(
    draft: &AttendanceDraft,
    roster: &[RosterEntry],
    class: &ClassInfo,
) -> Vec<AttendanceEntry> {
    roster
        .iter()
        .map(|entry| {
            let pending = draft.get(&entry.student.id);
            let status = pending
                .and_then(|d| d.status)
                .unwrap_or(AttendanceStatus::Absent);
            let credit_awarded = pending
                .and_then(|d| d.credit_awarded)
                .filter(|c| c.is_finite() && *c >= 0.0)
                .unwrap_or_else(|| credit_for(status, class));
            AttendanceEntry {
                student_id: entry.student.id,
                status,
                notes: pending.and_then(|d| d.notes.clone()).unwrap_or_default(),
                credit_awarded,
            }
        })
        .collect()
}

pub fn has_open_seat(class: &ClassInfo) -> bool {
    class.current_enrollment < class.capacity
}
