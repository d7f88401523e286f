use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Attendance states. `tardy` is accepted on input and stored as `Late`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    #[serde(alias = "tardy")]
    Late,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::Excused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    /// Lenient parse used for stored and imported values; unknown text yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" | "tardy" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    /// Statuses that earn the class credit for the session.
    pub fn earns_credit(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendanceStatus::parse(s).ok_or_else(|| {
            format!("unknown attendance status '{s}' (expected present, absent, late or excused)")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub date: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<AttendanceStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub credit_awarded: Option<f64>,
}

impl AttendanceRecord {
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }

    pub fn credit(&self) -> f64 {
        non_negative(self.credit_awarded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    #[serde(default)]
    pub credit_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub credit_amount: Option<f64>,
    pub earned_date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

impl CreditRecord {
    pub const DEFAULT_TYPE: &'static str = "general";

    pub fn type_or_default(&self) -> &str {
        match self.credit_type.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => kind,
            _ => Self::DEFAULT_TYPE,
        }
    }

    pub fn amount(&self) -> f64 {
        self.credit_amount.filter(|v| v.is_finite()).unwrap_or(0.0)
    }
}

fn non_negative(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0)
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<AttendanceStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(AttendanceStatus::parse))
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
}

impl StudentProfile {
    pub fn unknown(id: Uuid) -> Self {
        StudentProfile {
            id,
            display_name: "Unknown student".to_string(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Counselor,
    Admin,
    Specialist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Counselor => "counselor",
            Role::Admin => "admin",
            Role::Specialist => "specialist",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "counselor" => Some(Role::Counselor),
            "admin" => Some(Role::Admin),
            "specialist" => Some(Role::Specialist),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific profile fields; each role carries only what applies to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ProfileDetails {
    Student {
        student_id: String,
        grade_level: Option<u8>,
        graduation_year: Option<i32>,
    },
    Teacher {
        employee_id: String,
    },
    Counselor {
        employee_id: String,
        specialization: Option<String>,
    },
    Admin {
        employee_id: String,
        admin_level: String,
    },
    Specialist {
        employee_id: String,
    },
}

impl ProfileDetails {
    pub fn role(&self) -> Role {
        match self {
            ProfileDetails::Student { .. } => Role::Student,
            ProfileDetails::Teacher { .. } => Role::Teacher,
            ProfileDetails::Counselor { .. } => Role::Counselor,
            ProfileDetails::Admin { .. } => Role::Admin,
            ProfileDetails::Specialist { .. } => Role::Specialist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub email: String,
    pub status: String,
    pub department: String,
    pub details: ProfileDetails,
}

impl UserProfile {
    pub fn role(&self) -> Role {
        self.details.role()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub enrollment_id: Uuid,
    pub student: StudentProfile,
    /// School-issued id from the student profile; empty when never set.
    pub student_number: String,
    pub grade_level: Option<i16>,
    pub enrolled_at: DateTime<Utc>,
}

/// One attendance row in a class's history, with the student it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassHistoryEntry {
    pub record: AttendanceRecord,
    pub student: StudentProfile,
}

/// In-progress attendance for one student on the entry date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEntry {
    pub id: Option<Uuid>,
    pub status: Option<AttendanceStatus>,
    pub notes: Option<String>,
    pub credit_awarded: Option<f64>,
}

pub type AttendanceDraft = BTreeMap<Uuid, DraftEntry>;

/// A row ready to be written for a class and date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: Uuid,
    pub status: AttendanceStatus,
    pub notes: String,
    pub credit_awarded: f64,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub capacity: i32,
    pub current_enrollment: i32,
    pub credit_value: f64,
    pub credit_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Enrolled,
    Waitlisted,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Waitlisted => "waitlisted",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enrolled" => Some(EnrollmentStatus::Enrolled),
            "waitlisted" => Some(EnrollmentStatus::Waitlisted),
            "completed" => Some(EnrollmentStatus::Completed),
            "dropped" => Some(EnrollmentStatus::Dropped),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tardy_is_read_as_late() {
        assert_eq!(AttendanceStatus::parse("tardy"), Some(AttendanceStatus::Late));
        assert_eq!(AttendanceStatus::parse(" Late "), Some(AttendanceStatus::Late));
        assert_eq!(AttendanceStatus::parse("sick"), None);
        assert!("bogus".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn records_tolerate_odd_json() {
        let record: AttendanceRecord = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "studentId": Uuid::new_v4(),
            "classId": Uuid::new_v4(),
            "date": "2026-03-02T15:30:00Z",
            "status": "holiday",
            "creditAwarded": "oops"
        }))
        .unwrap();
        assert_eq!(record.status, None);
        assert_eq!(record.credit(), 0.0);
        assert_eq!(record.day(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        let credit: CreditRecord = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "studentId": Uuid::new_v4(),
            "creditType": "",
            "creditAmount": "1.5",
            "earnedDate": "2026-03-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(credit.type_or_default(), "general");
        assert_eq!(credit.amount(), 1.5);
    }

    #[test]
    fn profile_details_are_tagged_by_role() {
        let details = ProfileDetails::Admin {
            employee_id: "E-1".to_string(),
            admin_level: "standard".to_string(),
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["role"], "admin");
        assert_eq!(details.role(), Role::Admin);
    }
}
