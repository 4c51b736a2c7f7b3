//! Validation functions for configuration values.

use globset::Glob;
use sanitize_filename::{is_sanitized, sanitize};
use std::path::Path;
use validator::ValidationError;

pub fn validate_non_empty_path<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    if path.as_ref().as_os_str().is_empty() {
        return Err(
            ValidationError::new("EmptyPath").with_message("path must not be empty".into())
        );
    }

    Ok(())
}

pub fn validate_scheduler_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidSchedulerName")
            .with_message("scheduler name must not be empty".into()));
    }
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidSchedulerName").with_message(
            format!("Invalid scheduler name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_glob_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<(), ValidationError> {
    for pattern in patterns {
        let pattern = pattern.as_ref();
        if Glob::new(pattern).is_err() {
            return Err(ValidationError::new("InvalidGlob")
                .with_message(format!("Invalid glob pattern: {pattern:?}").into()));
        }
    }

    Ok(())
}
