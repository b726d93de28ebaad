use messaging::MessagingError;

/// Errors of the deployment manager
#[derive(Debug, thiserror::Error)]
pub enum DmError {
    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    #[error("Application already managed: {0}")]
    ApplicationExists(String),

    #[error("Unknown root instance '{instance}' in application '{application}'")]
    UnknownInstance {
        application: String,
        instance: String,
    },

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DmError {
    pub fn unknown_instance(application: impl Into<String>, instance: impl Into<String>) -> Self {
        DmError::UnknownInstance {
            application: application.into(),
            instance: instance.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DmError>;
