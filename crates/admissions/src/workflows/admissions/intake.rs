use super::domain::ApplicationSubmission;

/// Validation errors raised before an intake form reaches the repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeViolation {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("parent email '{0}' is not a valid address")]
    InvalidEmail(String),
}

/// Trim the free-text fields and reject incomplete forms.
pub(crate) fn sanitize_submission(
    mut submission: ApplicationSubmission,
) -> Result<ApplicationSubmission, IntakeViolation> {
    submission.student_name = required(&submission.student_name, "student name")?;
    submission.year_group = required(&submission.year_group, "year group")?;
    submission.school_id = required(&submission.school_id, "school id")?;
    let email = required(&submission.parent_email, "parent email")?;

    if !looks_like_email(&email) {
        return Err(IntakeViolation::InvalidEmail(email));
    }
    submission.parent_email = email;

    Ok(submission)
}

fn required(value: &str, field: &'static str) -> Result<String, IntakeViolation> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(IntakeViolation::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}
