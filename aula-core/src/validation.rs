//! Input checks shared by the login gate and the table synchronizer.
//!
//! Account fields come from the login form and the user service. Table and
//! column names end up inside SQL statements and warehouse URLs, so they are
//! restricted to plain identifiers.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LEN: usize = 254;
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 8..=128;
const MAX_NAME_LEN: usize = 100;
const MAX_TABLE_LEN: usize = 64;
const MAX_FIELD_LEN: usize = 300;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

fn required(value: &str, what: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField(format!("{what} is required")));
    }
    Ok(())
}

/// Emails are compared exactly, so no normalization happens here.
///
/// ```rust
/// use aula_core::validation::validate_email;
///
/// assert!(validate_email("ada@school.edu").is_ok());
/// assert!(validate_email("ada.school.edu").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    required(email, "Email")?;

    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::InvalidEmail("Email is too long".to_string()));
    }
    if !EMAIL.is_match(email) {
        return Err(ValidationError::InvalidEmail(format!("Invalid email format: {email}")));
    }
    Ok(())
}

/// A new password must be 8 to 128 bytes and not blank.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    required(password, "Password")?;

    if password.trim().is_empty() {
        return Err(ValidationError::InvalidPassword(
            "Password cannot be only whitespace".to_string(),
        ));
    }
    if !PASSWORD_LEN.contains(&password.len()) {
        return Err(ValidationError::InvalidPassword(format!(
            "Password must be between {} and {} characters long",
            PASSWORD_LEN.start(),
            PASSWORD_LEN.end()
        )));
    }
    Ok(())
}

/// Display names are optional, but a given one must not be blank.
pub fn validate_name(name: Option<&str>) -> Result<(), ValidationError> {
    let Some(name) = name else {
        return Ok(());
    };

    if name.trim().is_empty() {
        return Err(ValidationError::InvalidName(
            "Name cannot be empty or whitespace only".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName(format!(
            "Name must be no more than {MAX_NAME_LEN} characters long"
        )));
    }
    Ok(())
}

/// Source table names are interpolated into `SELECT` statements and
/// warehouse URLs.
///
/// ```rust
/// use aula_core::validation::validate_table_name;
///
/// assert!(validate_table_name("course_grades").is_ok());
/// assert!(validate_table_name("grades; DROP TABLE users").is_err());
/// ```
pub fn validate_table_name(table: &str) -> Result<(), ValidationError> {
    required(table, "Table name")?;

    if table.len() > MAX_TABLE_LEN || !IDENTIFIER.is_match(table) {
        return Err(ValidationError::InvalidTableName(table.to_string()));
    }
    Ok(())
}

/// Column names of a warehouse schema.
pub fn validate_field_name(field: &str) -> Result<(), ValidationError> {
    if field.len() > MAX_FIELD_LEN || !IDENTIFIER.is_match(field) {
        return Err(ValidationError::InvalidField(field.to_string()));
    }
    Ok(())
}
