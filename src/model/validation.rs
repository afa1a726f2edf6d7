//! Local checks applied before a request leaves the client.

use crate::error::ApiError;
use crate::model::{CreatePlanInput, StartRunInput, UpdatePlanInput};

pub const MAX_PLAN_NAME_CHARS: usize = 255;

fn check_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("Plan name is required".into()));
    }
    if name.chars().count() > MAX_PLAN_NAME_CHARS {
        return Err(ApiError::Validation(format!(
            "Plan name must be {MAX_PLAN_NAME_CHARS} characters or less"
        )));
    }
    Ok(())
}

fn check_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("Plan content is required".into()));
    }
    Ok(())
}

fn check_working_directory(dir: Option<&str>) -> Result<(), ApiError> {
    match dir {
        Some(d) if d.trim().is_empty() => Err(ApiError::Validation(
            "Working directory must not be blank".into(),
        )),
        _ => Ok(()),
    }
}

pub fn validate_create_plan(input: &CreatePlanInput) -> Result<(), ApiError> {
    check_name(&input.name)?;
    check_content(&input.content)?;
    check_working_directory(input.working_directory.as_deref())
}

pub fn validate_update_plan(input: &UpdatePlanInput) -> Result<(), ApiError> {
    if input == &UpdatePlanInput::default() {
        return Err(ApiError::Validation("Nothing to update".into()));
    }
    if let Some(name) = input.name.as_deref() {
        check_name(name)?;
    }
    if let Some(content) = input.content.as_deref() {
        check_content(content)?;
    }
    check_working_directory(input.working_directory.as_deref())
}

pub fn validate_start_run(input: &StartRunInput) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(&input.plan_id)
        .map(|_| ())
        .map_err(|_| ApiError::Validation("Invalid plan ID format".into()))
}
