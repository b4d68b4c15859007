use thiserror::Error;

/// Failures the engine reports to callers.
///
/// These travel inside `anyhow::Error` like every other failure in the crate;
/// callers that need to branch on them use `err.downcast_ref::<ReminderError>()`.
#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("storage is not available; call init() before using the store")]
    StorageUnavailable,

    #[error("import file {file} is malformed: {reason}")]
    ImportMalformed { file: String, reason: String },
}

impl ReminderError {
    pub fn import_malformed(file: impl Into<String>, reason: impl ToString) -> Self {
        Self::ImportMalformed {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReminderError;

    #[test]
    fn import_malformed_names_the_file() {
        let err = ReminderError::import_malformed("extrareminders.json", "expected a sequence");
        assert_eq!(
            err.to_string(),
            "import file extrareminders.json is malformed: expected a sequence"
        );
    }

    #[test]
    fn survives_a_trip_through_anyhow() {
        let err: anyhow::Error = ReminderError::StorageUnavailable.into();
        assert!(matches!(
            err.downcast_ref::<ReminderError>(),
            Some(ReminderError::StorageUnavailable)
        ));
    }
}
