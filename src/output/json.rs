use anyhow::Result;
use serde::Serialize;

use crate::error::Error;
use crate::notes::StoreError;
use crate::services::ServiceError;

/// Pretty-print any serializable value as JSON to stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Machine-readable form of a command failure, with its category when it
/// came from the library.
pub fn error_json(err: &anyhow::Error) -> serde_json::Value {
    let kind = if let Some(e) = err.downcast_ref::<Error>() {
        e.kind()
    } else if let Some(e) = err.downcast_ref::<StoreError>() {
        match e {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Validation(_) => "invalid_input",
            StoreError::Database(_) => "transient",
        }
    } else if let Some(e) = err.downcast_ref::<ServiceError>() {
        match e {
            ServiceError::InvalidUrl(_) => "invalid_input",
            ServiceError::Fetch(_) | ServiceError::Service(_) => "transient",
        }
    } else {
        "error"
    };
    serde_json::json!({ "error": format!("{err:#}"), "kind": kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_their_kind() {
        let err = anyhow::Error::from(StoreError::folder_not_found("f1"));
        let value = error_json(&err);
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["error"], "folder not found: f1");

        let err = anyhow::Error::from(Error::from(ServiceError::InvalidUrl("x".into())));
        assert_eq!(error_json(&err)["kind"], "invalid_input");

        assert_eq!(error_json(&anyhow::anyhow!("plain"))["kind"], "error");
    }
}
