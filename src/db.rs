use std::collections::HashMap;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::import::{self, AccountDirectory, CandidateUser, Caller, DirectoryError};
use crate::models::{
    AttendanceDraft, AttendanceEntry, AttendanceRecord, AttendanceStatus, ClassInfo,
    CreditRecord, DraftEntry, EnrollmentStatus, Role, RosterEntry, StudentProfile, UserProfile,
};
use crate::roster;

const ATTENDANCE_COLUMNS: &str =
    "a.id, a.student_id, a.class_id, a.session_date, a.status, a.notes, a.credit_awarded";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn attendance_from_row(row: &PgRow) -> AttendanceRecord {
    let session_date: NaiveDate = row.get("session_date");
    let status: Option<String> = row.get("status");
    AttendanceRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        class_id: row.get("class_id"),
        date: session_date.and_time(NaiveTime::MIN).and_utc(),
        status: status.as_deref().and_then(AttendanceStatus::parse),
        notes: row.get("notes"),
        credit_awarded: row.get("credit_awarded"),
    }
}

fn class_from_row(row: &PgRow) -> ClassInfo {
    ClassInfo {
        id: row.get("id"),
        teacher_id: row.get("teacher_id"),
        title: row.get("title"),
        capacity: row.get("capacity"),
        current_enrollment: row.get("current_enrollment"),
        credit_value: row.get("credit_value"),
        credit_type: row.get("credit_type"),
    }
}

/// Loads a class, failing unless `teacher_id` teaches it.
pub async fn fetch_class(
    pool: &PgPool,
    teacher_id: Uuid,
    class_id: Uuid,
) -> anyhow::Result<ClassInfo> {
    let row = sqlx::query(
        r#"
        SELECT id, teacher_id, title, capacity, current_enrollment, credit_value, credit_type
        FROM seminar_reports.classes
        WHERE id = $1 AND teacher_id = $2
        "#,
    )
    .bind(class_id)
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(class_from_row(&row)),
        None => bail!("class {class_id} not found for teacher {teacher_id}"),
    }
}

pub async fn fetch_class_attendance(
    pool: &PgPool,
    teacher_id: Uuid,
    class_id: Uuid,
    since: Option<NaiveDate>,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    fetch_class(pool, teacher_id, class_id).await?;

    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS} \
         FROM seminar_reports.attendance a \
         WHERE a.class_id = $1 AND ($2::date IS NULL OR a.session_date >= $2) \
         ORDER BY a.session_date"
    );
    let rows = sqlx::query(&query)
        .bind(class_id)
        .bind(since)
        .fetch_all(pool)
        .await?;
    log::debug!("fetched {} attendance rows for class {class_id}", rows.len());
    Ok(rows.iter().map(attendance_from_row).collect())
}

pub async fn fetch_teacher_attendance(
    pool: &PgPool,
    teacher_id: Uuid,
    since: Option<NaiveDate>,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS} \
         FROM seminar_reports.attendance a \
         JOIN seminar_reports.classes c ON c.id = a.class_id \
         WHERE c.teacher_id = $1 AND ($2::date IS NULL OR a.session_date >= $2) \
         ORDER BY a.session_date"
    );
    let rows = sqlx::query(&query)
        .bind(teacher_id)
        .bind(since)
        .fetch_all(pool)
        .await?;
    log::debug!("fetched {} attendance rows for teacher {teacher_id}", rows.len());
    Ok(rows.iter().map(attendance_from_row).collect())
}

pub async fn fetch_attendance_for_date(
    pool: &PgPool,
    class_id: Uuid,
    date: NaiveDate,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS} \
         FROM seminar_reports.attendance a \
         WHERE a.class_id = $1 AND a.session_date = $2"
    );
    let rows = sqlx::query(&query)
        .bind(class_id)
        .bind(date)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(attendance_from_row).collect())
}

/// A student's own attendance, newest first.
pub async fn fetch_student_attendance_history(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<(AttendanceRecord, String)>> {
    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS}, c.title \
         FROM seminar_reports.attendance a \
         JOIN seminar_reports.classes c ON c.id = a.class_id \
         WHERE a.student_id = $1 \
         ORDER BY a.session_date DESC"
    );
    let rows = sqlx::query(&query).bind(student_id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (attendance_from_row(row), row.get("title")))
        .collect())
}

pub async fn fetch_profiles(
    pool: &PgPool,
    ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, StudentProfile>> {
    let rows = sqlx::query(
        r#"
        SELECT account_id, display_name, email
        FROM seminar_reports.profiles
        WHERE account_id = ANY($1)
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let id: Uuid = row.get("account_id");
            (
                id,
                StudentProfile {
                    id,
                    display_name: row.get("display_name"),
                    email: row.get("email"),
                },
            )
        })
        .collect())
}

/// Credits for a student, visible only to a teacher the student is enrolled with.
pub async fn fetch_student_credits_for_teacher(
    pool: &PgPool,
    teacher_id: Uuid,
    student_id: Uuid,
) -> anyhow::Result<Vec<CreditRecord>> {
    let taught: bool = sqlx::query(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM seminar_reports.enrollments e
            JOIN seminar_reports.classes c ON c.id = e.class_id
            WHERE c.teacher_id = $1 AND e.student_id = $2
        ) AS taught
        "#,
    )
    .bind(teacher_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?
    .get("taught");

    if !taught {
        bail!("student {student_id} is not enrolled with teacher {teacher_id}");
    }

    let rows = sqlx::query(
        r#"
        SELECT id, student_id, credit_type, credit_amount, earned_date, description
        FROM seminar_reports.credits
        WHERE student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CreditRecord {
            id: row.get("id"),
            student_id: row.get("student_id"),
            credit_type: row.get("credit_type"),
            credit_amount: row.get("credit_amount"),
            earned_date: row.get("earned_date"),
            description: row.get("description"),
        })
        .collect())
}

/// Students holding an enrollment of `status` in the class, ordered by name.
///
/// `Enrolled` gives the attendance roster; `Waitlisted` gives the queue a
/// teacher approves from.
pub async fn fetch_enrollments(
    pool: &PgPool,
    class_id: Uuid,
    status: EnrollmentStatus,
) -> anyhow::Result<Vec<RosterEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT e.id AS enrollment_id, e.enrolled_at,
               p.account_id, p.display_name, p.email,
               COALESCE(p.details->>'student_id', '') AS student_number,
               (p.details->>'grade_level')::smallint AS grade_level
        FROM seminar_reports.enrollments e
        JOIN seminar_reports.profiles p ON p.account_id = e.student_id
        WHERE e.class_id = $1 AND e.status = $2
        ORDER BY p.display_name
        "#,
    )
    .bind(class_id)
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    log::debug!(
        "fetched {} {} enrollments for class {class_id}",
        rows.len(),
        status.as_str()
    );
    Ok(rows
        .into_iter()
        .map(|row| RosterEntry {
            enrollment_id: row.get("enrollment_id"),
            student: StudentProfile {
                id: row.get("account_id"),
                display_name: row.get("display_name"),
                email: row.get("email"),
            },
            student_number: row.get("student_number"),
            grade_level: row.get("grade_level"),
            enrolled_at: row.get("enrolled_at"),
        })
        .collect())
}

fn credit_source_key(class_id: Uuid, student_id: Uuid, date: NaiveDate) -> String {
    format!("attendance:{class_id}:{student_id}:{date}")
}

/// Makes the credit record for one attendance row match the credit it awards:
/// written or re-valued when positive, removed when zero.
async fn sync_attendance_credit(
    conn: &mut PgConnection,
    class: &ClassInfo,
    student_id: Uuid,
    date: NaiveDate,
    amount: f64,
) -> anyhow::Result<()> {
    let source_key = credit_source_key(class.id, student_id, date);

    if amount <= 0.0 {
        sqlx::query("DELETE FROM seminar_reports.credits WHERE source_key = $1")
            .bind(&source_key)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO seminar_reports.credits
        (id, student_id, class_id, credit_type, credit_amount,
         earned_date, description, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO UPDATE
        SET credit_amount = EXCLUDED.credit_amount,
            credit_type = EXCLUDED.credit_type
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(class.id)
    .bind(&class.credit_type)
    .bind(amount)
    .bind(date.and_time(NaiveTime::MIN).and_utc())
    .bind(&class.title)
    .bind(&source_key)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Writes one attendance row per entry and keeps its credit record in step.
pub async fn record_attendance(
    pool: &PgPool,
    class: &ClassInfo,
    date: NaiveDate,
    entries: &[AttendanceEntry],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;

    let owned = sqlx::query(
        "SELECT id FROM seminar_reports.classes WHERE id = $1 AND teacher_id = $2 FOR UPDATE",
    )
    .bind(class.id)
    .bind(class.teacher_id)
    .fetch_optional(&mut *tx)
    .await?;
    if owned.is_none() {
        bail!("class {} is no longer taught by {}", class.id, class.teacher_id);
    }

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO seminar_reports.attendance
            (id, class_id, student_id, session_date, status, notes, credit_awarded)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (class_id, student_id, session_date) DO UPDATE
            SET status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                credit_awarded = EXCLUDED.credit_awarded,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(class.id)
        .bind(entry.student_id)
        .bind(date)
        .bind(entry.status.as_str())
        .bind(&entry.notes)
        .bind(entry.credit_awarded)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to record attendance for {}", entry.student_id))?;

        sync_attendance_credit(&mut tx, class, entry.student_id, date, entry.credit_awarded)
            .await?;
    }

    tx.commit().await?;
    log::info!(
        "recorded {} attendance rows for {} on {date}",
        entries.len(),
        class.title
    );
    Ok(entries.len())
}

/// Changes a recorded status (and optionally its notes) and re-derives the
/// credit the session earns from the class credit value.
pub async fn update_attendance_record(
    pool: &PgPool,
    teacher_id: Uuid,
    record_id: Uuid,
    status: AttendanceStatus,
    notes: Option<&str>,
) -> anyhow::Result<f64> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT a.student_id, a.session_date,
               c.id, c.teacher_id, c.title, c.capacity, c.current_enrollment,
               c.credit_value, c.credit_type
        FROM seminar_reports.attendance a
        JOIN seminar_reports.classes c ON c.id = a.class_id
        WHERE a.id = $1 AND c.teacher_id = $2
        FOR UPDATE OF a
        "#,
    )
    .bind(record_id)
    .bind(teacher_id)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("attendance record {record_id} not found for teacher {teacher_id}"))?;

    let class = class_from_row(&row);
    let student_id: Uuid = row.get("student_id");
    let date: NaiveDate = row.get("session_date");
    let credit = roster::credit_for(status, &class);

    sqlx::query(
        r#"
        UPDATE seminar_reports.attendance
        SET status = $2, notes = COALESCE($3, notes), credit_awarded = $4, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(record_id)
    .bind(status.as_str())
    .bind(notes)
    .bind(credit)
    .execute(&mut *tx)
    .await?;
    sync_attendance_credit(&mut tx, &class, student_id, date, credit).await?;

    tx.commit().await?;
    log::info!("attendance record {record_id} set to {status} ({credit:.2} credit)");
    Ok(credit)
}

/// Moves a waitlisted student into the class if a seat is free.
pub async fn approve_waitlist_student(
    pool: &PgPool,
    teacher_id: Uuid,
    class_id: Uuid,
    enrollment_id: Uuid,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT id, teacher_id, title, capacity, current_enrollment, credit_value, credit_type
        FROM seminar_reports.classes
        WHERE id = $1 AND teacher_id = $2
        FOR UPDATE
        "#,
    )
    .bind(class_id)
    .bind(teacher_id)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("class {class_id} not found for teacher {teacher_id}"))?;
    let class = class_from_row(&row);

    if !roster::has_open_seat(&class) {
        bail!(
            "{} is full ({} of {} seats taken)",
            class.title,
            class.current_enrollment,
            class.capacity
        );
    }

    let status: Option<String> = sqlx::query(
        "SELECT status FROM seminar_reports.enrollments WHERE id = $1 AND class_id = $2",
    )
    .bind(enrollment_id)
    .bind(class_id)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| row.get("status"));

    match status.as_deref().and_then(EnrollmentStatus::parse) {
        Some(EnrollmentStatus::Waitlisted) => {}
        Some(other) => bail!("enrollment {enrollment_id} is {}, not waitlisted", other.as_str()),
        None => bail!("enrollment {enrollment_id} not found in class {class_id}"),
    }

    sqlx::query("UPDATE seminar_reports.enrollments SET status = $2 WHERE id = $1")
        .bind(enrollment_id)
        .bind(EnrollmentStatus::Enrolled.as_str())
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        UPDATE seminar_reports.classes
        SET current_enrollment = current_enrollment + 1
        WHERE id = $1
        "#,
    )
    .bind(class_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("enrollment {enrollment_id} moved off the waitlist for {}", class.title);
    Ok(())
}

pub async fn fetch_caller(pool: &PgPool, email: &str) -> anyhow::Result<Option<Caller>> {
    let row = sqlx::query(
        "SELECT email, role FROM seminar_reports.profiles WHERE email = $1 AND status = 'active'",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|row| {
        let role: String = row.get("role");
        Role::parse(&role).map(|role| Caller {
            email: row.get("email"),
            role,
        })
    }))
}

/// Accounts and profiles kept in the seminar database.
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(err: impl std::fmt::Display) -> DirectoryError {
    DirectoryError::Store(err.to_string())
}

#[async_trait]
impl AccountDirectory for PgDirectory {
    async fn create_account(
        &self,
        email: &str,
        display_name: &str,
        role: Role,
    ) -> Result<String, DirectoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO seminar_reports.accounts (id, email, display_name, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(display_name)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => Ok(row.get::<Uuid, _>("id").to_string()),
            None => Err(DirectoryError::AlreadyExists(email.to_string())),
        }
    }

    async fn write_profile(
        &self,
        account_id: &str,
        profile: &UserProfile,
    ) -> Result<(), DirectoryError> {
        let account_id = Uuid::parse_str(account_id).map_err(store_err)?;
        sqlx::query(
            r#"
            INSERT INTO seminar_reports.profiles
            (account_id, display_name, email, role, status, department, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account_id)
        .bind(&profile.display_name)
        .bind(&profile.email)
        .bind(profile.role().as_str())
        .bind(&profile.status)
        .bind(&profile.department)
        .bind(Json(&profile.details))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), DirectoryError> {
        let account_id = Uuid::parse_str(account_id).map_err(store_err)?;
        sqlx::query("DELETE FROM seminar_reports.accounts WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let teacher_id = Uuid::parse_str("5e0c9a3d-1b6f-4c2e-a8d4-93f1b07e6a25")?;
    let class_id = Uuid::parse_str("a81d47c6-3e92-4b05-9f1a-6c2d8e4b7f30")?;

    // (id, name, email, role, student number, enrollment)
    let people = vec![
        (
            Uuid::parse_str("e3b4f6a1-7d28-4c9e-b150-2f8a6d1c9e47")?,
            "Rosa Okafor",
            "rosa.okafor@school.example",
            Role::Admin,
            None,
            None,
        ),
        (
            teacher_id,
            "Tomas Lindqvist",
            "tomas.lindqvist@school.example",
            Role::Teacher,
            None,
            None,
        ),
        (
            Uuid::parse_str("1f7c2e90-4a6b-4d3f-8e25-b9c04d71a6e8")?,
            "Noor Haddad",
            "noor.haddad@school.example",
            Role::Student,
            Some("S-1041"),
            Some(EnrollmentStatus::Enrolled),
        ),
        (
            Uuid::parse_str("8b25d0e4-c17a-4f68-93e2-5a0f6c4b8d19")?,
            "Eli Brennan",
            "eli.brennan@school.example",
            Role::Student,
            Some("S-1042"),
            Some(EnrollmentStatus::Enrolled),
        ),
        (
            Uuid::parse_str("46e9a7b2-0c5d-4e13-a6f8-d2b19c3e5a70")?,
            "Sofia Quispe",
            "sofia.quispe@school.example",
            Role::Student,
            Some("S-1043"),
            Some(EnrollmentStatus::Enrolled),
        ),
        (
            Uuid::parse_str("c0d58f31-9e7a-42b6-b4c9-7e16a2f0d853")?,
            "Marcus Feld",
            "marcus.feld@school.example",
            Role::Student,
            Some("S-1044"),
            Some(EnrollmentStatus::Waitlisted),
        ),
    ];

    for (id, name, email, role, student_number, _) in &people {
        let profile = import::validate_row(&CandidateUser {
            email: Some(email.to_string()),
            role: Some(role.as_str().to_string()),
            display_name: Some(name.to_string()),
            student_id: student_number.map(str::to_string),
            ..CandidateUser::default()
        })
        .map_err(anyhow::Error::msg)?;

        sqlx::query(
            r#"
            INSERT INTO seminar_reports.accounts (id, email, display_name, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(role.as_str())
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO seminar_reports.profiles
            (account_id, display_name, email, role, status, department, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&profile.display_name)
        .bind(&profile.email)
        .bind(role.as_str())
        .bind(&profile.status)
        .bind(&profile.department)
        .bind(Json(&profile.details))
        .execute(pool)
        .await?;
    }

    let enrollments: Vec<(Uuid, EnrollmentStatus)> = people
        .iter()
        .filter_map(|(id, _, _, _, _, enrollment)| enrollment.map(|status| (*id, status)))
        .collect();
    let enrolled = enrollments
        .iter()
        .filter(|(_, status)| *status == EnrollmentStatus::Enrolled)
        .count();

    sqlx::query(
        r#"
        INSERT INTO seminar_reports.classes
        (id, teacher_id, title, capacity, current_enrollment, credit_value, credit_type)
        VALUES ($1, $2, 'Urban Ecology Seminar', 12, $3, 0.25, 'service')
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(class_id)
    .bind(teacher_id)
    .bind(enrolled as i32)
    .execute(pool)
    .await?;

    for (student_id, status) in &enrollments {
        sqlx::query(
            r#"
            INSERT INTO seminar_reports.enrollments (id, class_id, student_id, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (class_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(class_id)
        .bind(student_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    }

    let class = fetch_class(pool, teacher_id, class_id).await?;
    let students = fetch_enrollments(pool, class_id, EnrollmentStatus::Enrolled).await?;
    let today = Utc::now().date_naive();
    let pattern = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::Present,
        AttendanceStatus::Excused,
    ];

    for days_ago in 1..=5_i64 {
        let date = today - chrono::Duration::days(days_ago);
        let draft: AttendanceDraft = students
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let status = pattern[(i + days_ago as usize) % pattern.len()];
                (
                    entry.student.id,
                    DraftEntry {
                        status: Some(status),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let entries = roster::finalize_draft(&draft, &students, &class);
        record_attendance(pool, &class, date, &entries).await?;
    }

    Ok(())
}
