//! Suite validation
//!
//! A suite is checked completely before any capture or comparison starts.
//! `parse_suite` walks the raw JSON document so that structural problems
//! (a size without a height, a dialog without an id) are reported with the
//! offending index instead of a generic deserialisation message.
//! `validate_suite` then checks the typed invariants.

use serde_json::Value;
use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{Dialog, DialogSide, Size, Suite, SuiteOptions};

type VResult<T> = std::result::Result<T, ValidationError>;

/// Parse and validate a raw suite document
pub fn parse_suite(doc: &Value) -> VResult<Suite> {
    let root = doc
        .as_object()
        .ok_or_else(|| ValidationError::Malformed("suite must be a JSON object".to_string()))?;

    let options_value = root.get("options").ok_or(ValidationError::MissingOptions)?;
    check_options(options_value)?;

    for side in [DialogSide::Original, DialogSide::Current] {
        let key = side.to_string();
        let dialogs = root
            .get(&key)
            .and_then(Value::as_array)
            .ok_or(ValidationError::MissingDialogs { side })?;
        for (index, dialog) in dialogs.iter().enumerate() {
            check_dialog(side, index, dialog)?;
        }
    }

    let suite: Suite =
        serde_json::from_value(doc.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_suite(&suite)?;
    Ok(suite)
}

/// Check the typed invariants of a suite
pub fn validate_suite(suite: &Suite) -> VResult<()> {
    validate_options(&suite.options)?;
    validate_dialogs(DialogSide::Original, &suite.original, &suite.options.original_version)?;
    validate_dialogs(DialogSide::Current, &suite.current, &suite.options.current_version)?;
    Ok(())
}

pub fn validate_options(options: &SuiteOptions) -> VResult<()> {
    if options.sizes.is_empty() {
        return Err(ValidationError::MissingSizes);
    }
    for (index, size) in options.sizes.iter().enumerate() {
        check_size_bounds(*size).map_err(|reason| ValidationError::InvalidSize { index, reason })?;
    }
    if options.original_version.trim().is_empty() {
        return Err(ValidationError::MissingVersion { field: "originalVersion" });
    }
    if options.current_version.trim().is_empty() {
        return Err(ValidationError::MissingVersion { field: "currentVersion" });
    }
    Ok(())
}

fn validate_dialogs(side: DialogSide, dialogs: &[Dialog], expected_version: &str) -> VResult<()> {
    let mut seen = HashSet::new();

    for (index, dialog) in dialogs.iter().enumerate() {
        let invalid = |field: &str, reason: &str| ValidationError::InvalidDialog {
            side,
            index,
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if dialog.id.trim().is_empty() {
            return Err(invalid("id", "must not be empty"));
        }
        if dialog.url.trim().is_empty() {
            return Err(invalid("url", "must not be empty"));
        }
        if dialog.version != expected_version {
            return Err(ValidationError::VersionMismatch {
                side,
                index,
                found: dialog.version.clone(),
                expected: expected_version.to_string(),
            });
        }
        if let Some(sizes) = &dialog.options.sizes {
            if sizes.is_empty() {
                return Err(invalid("options.sizes", "must not be empty"));
            }
            for (size_index, size) in sizes.iter().enumerate() {
                check_size_bounds(*size)
                    .map_err(|reason| invalid(&format!("options.sizes[{}]", size_index), &reason))?;
            }
        }
        if !seen.insert(dialog.id.as_str()) {
            return Err(ValidationError::DuplicateDialog {
                side,
                index,
                id: dialog.id.clone(),
            });
        }
    }

    Ok(())
}

fn check_options(value: &Value) -> VResult<()> {
    let options = value.as_object().ok_or(ValidationError::MissingOptions)?;

    let sizes = options
        .get("sizes")
        .and_then(Value::as_array)
        .filter(|sizes| !sizes.is_empty())
        .ok_or(ValidationError::MissingSizes)?;
    for (index, size) in sizes.iter().enumerate() {
        check_size_value(size).map_err(|reason| ValidationError::InvalidSize { index, reason })?;
    }

    for field in ["originalVersion", "currentVersion"] {
        match options.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingVersion { field }),
        }
    }

    Ok(())
}

fn check_dialog(side: DialogSide, index: usize, value: &Value) -> VResult<()> {
    let invalid = |field: &str, reason: String| ValidationError::InvalidDialog {
        side,
        index,
        field: field.to_string(),
        reason,
    };

    let dialog = value
        .as_object()
        .ok_or_else(|| invalid("", "must be an object".to_string()))?;

    for field in ["version", "id", "url"] {
        match dialog.get(field) {
            Some(Value::String(_)) => {}
            Some(_) => return Err(invalid(field, "must be a string".to_string())),
            None => return Err(invalid(field, "is missing".to_string())),
        }
    }

    if let Some(sizes) = dialog.get("options").and_then(|o| o.get("sizes")) {
        let sizes = sizes
            .as_array()
            .ok_or_else(|| invalid("options.sizes", "must be an array".to_string()))?;
        for (size_index, size) in sizes.iter().enumerate() {
            check_size_value(size)
                .map_err(|reason| invalid(&format!("options.sizes[{}]", size_index), reason))?;
        }
    }

    Ok(())
}

fn check_size_value(value: &Value) -> std::result::Result<(), String> {
    let size = value.as_object().ok_or_else(|| "must be an object".to_string())?;
    for field in ["width", "height"] {
        match size.get(field) {
            None => return Err(format!("{} is missing", field)),
            Some(v) => {
                let n = v
                    .as_u64()
                    .ok_or_else(|| format!("{} must be a positive integer", field))?;
                if n == 0 || n > u32::MAX as u64 {
                    return Err(format!("{} must be a positive integer", field));
                }
            }
        }
    }
    Ok(())
}

fn check_size_bounds(size: Size) -> std::result::Result<(), String> {
    if size.width == 0 {
        return Err("width must be a positive integer".to_string());
    }
    if size.height == 0 {
        return Err("height must be a positive integer".to_string());
    }
    Ok(())
}
