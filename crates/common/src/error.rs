use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote provisioning failed: {0}")]
    RemoteProvisioningFailed(String),

    #[error("Repository mismatch: workspace is bound to {detected}, but {requested} was requested")]
    RepositoryMismatch { detected: String, requested: String },

    #[error("Repository binding failed: {0}")]
    RepositoryBindingFailed(String),

    #[error("No remote repository configured")]
    NoRemoteConfigured,

    #[error("Template fetch failed: {0}")]
    TemplateFetch(String),

    #[error("Unrecognized remote url: {0}")]
    UnrecognizedRemote(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a collaborator failure as a repository binding failure.
    pub fn binding(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::RepositoryBindingFailed(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
