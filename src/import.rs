use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ProfileDetails, Role, UserProfile};

pub const MISSING_FIELDS: &str = "Missing required fields: email, role, displayName.";

/// One candidate row from an import payload or CSV file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUser {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<RowError>,
}

impl ImportOutcome {
    fn fail(&mut self, row: usize, email: &str, error: String) {
        log::warn!("import row {row} ({email}) failed: {error}");
        self.error_count += 1;
        self.errors.push(RowError {
            row,
            email: email.to_string(),
            error,
        });
    }
}

/// The user performing the import.
#[derive(Debug, Clone)]
pub struct Caller {
    pub email: String,
    pub role: Role,
}

/// Failures that abort the whole import before any row is processed.
#[derive(Debug)]
pub enum ImportError {
    PermissionDenied,
    InvalidArgument(String),
    Io(std::io::Error),
    Csv(csv::Error),
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Csv(err)
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::PermissionDenied => {
                write!(f, "Only administrators can create users in bulk.")
            }
            ImportError::InvalidArgument(msg) => write!(f, "Invalid import payload: {}", msg),
            ImportError::Io(e) => write!(f, "IO error: {}", e),
            ImportError::Csv(e) => write!(f, "CSV error: {}", e),
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug)]
pub enum DirectoryError {
    AlreadyExists(String),
    Store(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::AlreadyExists(email) => {
                write!(f, "An account already exists for {}", email)
            }
            DirectoryError::Store(e) => write!(f, "Directory error: {}", e),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Where accounts and their profile documents live.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Create a sign-in account and return its id.
    async fn create_account(
        &self,
        email: &str,
        display_name: &str,
        role: Role,
    ) -> Result<String, DirectoryError>;

    async fn write_profile(&self, account_id: &str, profile: &UserProfile)
        -> Result<(), DirectoryError>;

    /// Remove an account whose profile could not be written.
    async fn delete_account(&self, account_id: &str) -> Result<(), DirectoryError>;
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn validate_row(row: &CandidateUser) -> Result<UserProfile, String> {
    let (Some(email), Some(role), Some(display_name)) = (
        present(&row.email),
        present(&row.role),
        present(&row.display_name),
    ) else {
        return Err(MISSING_FIELDS.to_string());
    };

    let role = Role::parse(role).ok_or_else(|| format!("Invalid role: {role}"))?;
    let employee_id = present(&row.employee_id).unwrap_or_default().to_string();
    let details = match role {
        Role::Student => ProfileDetails::Student {
            student_id: present(&row.student_id).unwrap_or_default().to_string(),
            grade_level: None,
            graduation_year: None,
        },
        Role::Teacher => ProfileDetails::Teacher { employee_id },
        Role::Counselor => ProfileDetails::Counselor {
            employee_id,
            specialization: None,
        },
        Role::Admin => ProfileDetails::Admin {
            employee_id,
            admin_level: "standard".to_string(),
        },
        Role::Specialist => ProfileDetails::Specialist { employee_id },
    };

    Ok(UserProfile {
        display_name: display_name.to_string(),
        email: email.to_string(),
        status: "active".to_string(),
        department: present(&row.department).unwrap_or_default().to_string(),
        details,
    })
}

/// Creates an account and profile for every valid row, one row at a time.
///
/// Row failures are collected into the outcome. When a profile write fails
/// the freshly created account is deleted again so no orphan remains.
pub async fn bulk_create_users<D>(
    directory: &D,
    caller: Option<&Caller>,
    users: &[CandidateUser],
) -> Result<ImportOutcome, ImportError>
where
    D: AccountDirectory + ?Sized,
{
    match caller {
        Some(caller) if caller.role == Role::Admin => {
            log::info!("{} importing {} users", caller.email, users.len());
        }
        _ => return Err(ImportError::PermissionDenied),
    }
    if users.is_empty() {
        return Err(ImportError::InvalidArgument(
            "expected a non-empty array of users".to_string(),
        ));
    }

    let mut outcome = ImportOutcome::default();

    for (index, row) in users.iter().enumerate() {
        let row_number = index + 1;
        let email = present(&row.email).unwrap_or("N/A");

        let profile = match validate_row(row) {
            Ok(profile) => profile,
            Err(error) => {
                outcome.fail(row_number, email, error);
                continue;
            }
        };

        let account_id = match directory
            .create_account(&profile.email, &profile.display_name, profile.role())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                outcome.fail(row_number, email, e.to_string());
                continue;
            }
        };

        if let Err(e) = directory.write_profile(&account_id, &profile).await {
            let mut error = e.to_string();
            if let Err(cleanup) = directory.delete_account(&account_id).await {
                error.push_str(&format!(
                    " (account {account_id} could not be removed: {cleanup})"
                ));
            }
            outcome.fail(row_number, email, error);
            continue;
        }

        outcome.success_count += 1;
    }

    log::info!(
        "import finished: {} created, {} failed",
        outcome.success_count,
        outcome.error_count
    );
    Ok(outcome)
}

/// Reads `{"users": [...]}`. Entries that are not objects become empty rows
/// and fail validation individually.
pub fn parse_payload(json: &str) -> Result<Vec<CandidateUser>, ImportError> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ImportError::InvalidArgument(e.to_string()))?;
    let users = value
        .get("users")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ImportError::InvalidArgument("`users` must be an array".to_string()))?;

    Ok(users
        .iter()
        .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
        .collect())
}

/// Reads rows from a CSV file with a header line
/// (`email,role,displayName,studentId,employeeId,department`).
pub fn read_csv_rows(path: &Path) -> Result<Vec<CandidateUser>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CandidateUser>() {
        rows.push(result?);
    }
    Ok(rows)
}
