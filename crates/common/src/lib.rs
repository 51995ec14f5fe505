pub mod credential;
pub mod error;
pub mod service;

pub use credential::{generate_credential, Credential};
pub use error::{Error, Result};
pub use service::{Domain, RepoRef, ServiceDescriptor, ServiceName, ServiceRequest};
