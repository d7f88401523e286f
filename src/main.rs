use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod config;
mod credits;
mod db;
mod import;
mod models;
mod report;
mod roster;
mod stats;

use config::AppConfig;
use models::{AttendanceStatus, EnrollmentStatus};

#[derive(Parser)]
#[command(name = "seminar-reports")]
#[command(about = "Seminar attendance, credit reporting and user import", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample users, a class and a week of attendance
    Seed,
    /// Create accounts and profiles in bulk (administrators only)
    #[command(group(
        ArgGroup::new("source")
            .args(["csv", "json"])
            .required(true)
            .multiple(false)
    ))]
    ImportUsers {
        /// Email of the administrator running the import
        #[arg(long = "as")]
        caller: String,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// File containing `{"users": [...]}`
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Attendance statistics for one class or all of a teacher's classes
    Stats {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Option<Uuid>,
        /// Only count sessions from the last N days
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Credit summary for a student taught by the teacher
    Credits {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Enrolled students of a class, optionally exported as CSV
    Roster {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Waitlisted students of a class, with the enrollment ids to approve
    Waitlist {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Uuid,
    },
    /// Every recorded session of a class, newest first
    ClassHistory {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Uuid,
    },
    /// A student's attendance history and attendance credit
    History {
        #[arg(long)]
        student: Uuid,
    },
    /// Record attendance for a class on a date
    TakeAttendance {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Uuid,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        all_present: bool,
        /// STUDENT_ID=STATUS, may be repeated
        #[arg(long = "mark", value_parser = parse_mark)]
        marks: Vec<(Uuid, AttendanceStatus)>,
    },
    /// Change the status or notes of a recorded attendance entry
    EditAttendance {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        record: Uuid,
        #[arg(long)]
        status: AttendanceStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Move a waitlisted student into a class
    Approve {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        enrollment: Uuid,
    },
    /// Write a markdown attendance report
    Report {
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        class: Option<Uuid>,
        #[arg(long, default_value = "attendance-report.md")]
        out: PathBuf,
    },
}

fn parse_mark(raw: &str) -> Result<(Uuid, AttendanceStatus), String> {
    let (student, status) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected STUDENT_ID=STATUS, got '{raw}'"))?;
    let student = Uuid::parse_str(student.trim()).map_err(|e| e.to_string())?;
    Ok((student, status.parse()?))
}

fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

async fn load_stats(
    pool: &sqlx::PgPool,
    teacher: Uuid,
    class: Option<Uuid>,
    since: Option<NaiveDate>,
) -> anyhow::Result<stats::AttendanceStats> {
    let records = match class {
        Some(class) => db::fetch_class_attendance(pool, teacher, class, since).await?,
        None => db::fetch_teacher_attendance(pool, teacher, since).await?,
    };
    let mut students: Vec<Uuid> = records.iter().map(|r| r.student_id).collect();
    students.sort();
    students.dedup();
    let profiles = db::fetch_profiles(pool, &students).await?;
    Ok(stats::compute_attendance_stats(&records, &profiles))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportUsers { caller, csv, json } => {
            let rows = match (csv, json) {
                (Some(path), _) => import::read_csv_rows(&path)?,
                (None, Some(path)) => {
                    let payload = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    import::parse_payload(&payload)?
                }
                (None, None) => anyhow::bail!("either --csv or --json is required"),
            };
            let caller = db::fetch_caller(&pool, &caller).await?;
            let directory = db::PgDirectory::new(pool.clone());
            let outcome = import::bulk_create_users(&directory, caller.as_ref(), &rows).await?;

            println!(
                "Created {} users, {} errors.",
                outcome.success_count, outcome.error_count
            );
            for error in &outcome.errors {
                println!("- row {} ({}): {}", error.row, error.email, error.error);
            }
        }
        Commands::Stats {
            teacher,
            class,
            since_days,
            json,
        } => {
            let since = since_days.map(cutoff_date);
            let stats = load_stats(&pool, teacher, class, since).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            if stats.total_records == 0 {
                println!("No attendance data available.");
                return Ok(());
            }

            println!(
                "Attendance rate {}% across {} records (absent {}, late {}, excused {}).",
                stats.overall_attendance_rate,
                stats.total_records,
                stats.count(AttendanceStatus::Absent),
                stats.count(AttendanceStatus::Late),
                stats.count(AttendanceStatus::Excused),
            );
            println!("Students with most absences:");
            for entry in stats.absences_by_student.iter().take(config.report_top_n) {
                println!(
                    "- {} ({}) {} absences",
                    entry.student.display_name, entry.student.email, entry.count
                );
            }
        }
        Commands::Credits {
            teacher,
            student,
            json,
        } => {
            let credits = db::fetch_student_credits_for_teacher(&pool, teacher, student).await?;
            let summary = credits::compute_credit_summary(&credits);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let profiles = db::fetch_profiles(&pool, &[student]).await?;
                let name = profiles
                    .get(&student)
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| student.to_string());
                print!("{}", report::build_credit_report(&name, &summary));
            }
        }
        Commands::Roster {
            teacher,
            class,
            csv,
        } => {
            let class = db::fetch_class(&pool, teacher, class).await?;
            let students =
                db::fetch_enrollments(&pool, class.id, EnrollmentStatus::Enrolled).await?;

            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::export_roster_csv(file, &students)?;
                println!("Exported {} students to {}.", students.len(), path.display());
                return Ok(());
            }
            if students.is_empty() {
                println!("No students enrolled in {}.", class.title);
                return Ok(());
            }

            println!(
                "{} ({} of {} seats taken):",
                class.title, class.current_enrollment, class.capacity
            );
            for entry in &students {
                println!(
                    "- {} ({}) {}",
                    entry.student.display_name, entry.student.email, entry.student.id
                );
            }
        }
        Commands::Waitlist { teacher, class } => {
            let class = db::fetch_class(&pool, teacher, class).await?;
            let waiting =
                db::fetch_enrollments(&pool, class.id, EnrollmentStatus::Waitlisted).await?;
            if waiting.is_empty() {
                println!("No students waiting for {}.", class.title);
                return Ok(());
            }

            for entry in &waiting {
                println!(
                    "- {} ({}) since {} enrollment {}",
                    entry.student.display_name,
                    entry.student.email,
                    entry.enrolled_at.date_naive(),
                    entry.enrollment_id
                );
            }
        }
        Commands::ClassHistory { teacher, class } => {
            let records = db::fetch_class_attendance(&pool, teacher, class, None).await?;
            if records.is_empty() {
                println!("No attendance recorded yet.");
                return Ok(());
            }

            let mut students: Vec<Uuid> = records.iter().map(|r| r.student_id).collect();
            students.sort();
            students.dedup();
            let profiles = db::fetch_profiles(&pool, &students).await?;
            for entry in stats::class_history(records, &profiles) {
                println!(
                    "- {} {} {} (+{:.2})",
                    entry.record.day(),
                    entry.student.display_name,
                    entry.record.status.map(|s| s.as_str()).unwrap_or("unknown"),
                    entry.record.credit()
                );
            }
        }
        Commands::History { student } => {
            let history = db::fetch_student_attendance_history(&pool, student).await?;
            if history.is_empty() {
                println!("No attendance recorded yet.");
                return Ok(());
            }

            for (record, title) in &history {
                println!(
                    "- {} {} {} (+{:.2}){}",
                    record.day(),
                    title,
                    record.status.map(|s| s.as_str()).unwrap_or("unknown"),
                    record.credit(),
                    record
                        .notes
                        .as_deref()
                        .filter(|n| !n.is_empty())
                        .map(|n| format!(": {n}"))
                        .unwrap_or_default()
                );
            }
            let records: Vec<_> = history.into_iter().map(|(record, _)| record).collect();
            println!(
                "Total attendance credit: {:.2}",
                credits::total_credit_awarded(&records)
            );
        }
        Commands::TakeAttendance {
            teacher,
            class,
            date,
            all_present,
            marks,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let class = db::fetch_class(&pool, teacher, class).await?;
            let students =
                db::fetch_enrollments(&pool, class.id, EnrollmentStatus::Enrolled).await?;
            let existing = db::fetch_attendance_for_date(&pool, class.id, date).await?;

            let mut draft = roster::roster_defaults(&students, &existing);
            if all_present {
                draft = roster::apply_mark_all_present(&draft, &students);
            }
            for (student, status) in marks {
                if !roster::mark(&mut draft, student, status) {
                    log::warn!("{student} is not on the roster for {}", class.title);
                }
            }

            let entries = roster::finalize_draft(&draft, &students, &class);
            let written = db::record_attendance(&pool, &class, date, &entries).await?;
            println!("Recorded attendance for {written} students in {} on {date}.", class.title);
        }
        Commands::EditAttendance {
            teacher,
            record,
            status,
            notes,
        } => {
            let credit =
                db::update_attendance_record(&pool, teacher, record, status, notes.as_deref())
                    .await?;
            println!("Attendance record {record} updated ({status}, {credit:.2} credit).");
        }
        Commands::Approve {
            teacher,
            class,
            enrollment,
        } => {
            db::approve_waitlist_student(&pool, teacher, class, enrollment).await?;
            println!("Enrollment {enrollment} approved.");
        }
        Commands::Report {
            teacher,
            class,
            out,
        } => {
            let stats = load_stats(&pool, teacher, class, None).await?;
            let scope = match class {
                Some(class) => db::fetch_class(&pool, teacher, class).await?.title,
                None => "all classes".to_string(),
            };
            let markdown = report::build_report(
                &scope,
                Utc::now().date_naive(),
                &stats,
                config.report_top_n,
            );
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_parse_student_and_status() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_mark(&format!("{id}=tardy")),
            Ok((id, AttendanceStatus::Late))
        );
        assert!(parse_mark("nope").is_err());
        assert!(parse_mark(&format!("{id}=gone")).is_err());
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff_date(14), expected);
        assert_eq!(cutoff_date(0), Utc::now().date_naive() - Duration::days(1));
    }
}
