//! Validated service identity
//!
//! Every identifier that ends up in a Unix username, a directory path, a DNS
//! name or a hosted repository coordinate is parsed here before any external
//! system is touched.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Prefix of the OS account created for every service
pub const SERVICE_USER_PREFIX: &str = "svc-";

/// Longest service name that still yields a valid 32-character Unix username
pub const MAX_SERVICE_NAME_LEN: usize = 32 - SERVICE_USER_PREFIX.len();

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Service name: lowercase alphanumerics and inner hyphens
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidArgument("service name is required".into()));
        }

        if raw.len() > MAX_SERVICE_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "service name '{}' is longer than {} characters",
                raw, MAX_SERVICE_NAME_LEN
            )));
        }

        if !is_dns_label(raw) || raw.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidArgument(format!(
                "service name '{}' must contain only lowercase letters, digits and inner hyphens",
                raw
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// OS account owning the service on the target host
    pub fn service_user(&self) -> String {
        format!("{}{}", SERVICE_USER_PREFIX, self.0)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified DNS name the service is published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain(String);

impl Domain {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim_end_matches('.').to_ascii_lowercase();

        if normalized.is_empty() || normalized.len() > MAX_DOMAIN_LEN {
            return Err(Error::InvalidArgument(format!("invalid domain '{}'", raw)));
        }

        if !normalized.split('.').all(is_dns_label) {
            return Err(Error::InvalidArgument(format!(
                "domain '{}' contains an invalid label",
                raw
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hosted repository coordinate (`owner/name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    owner: String,
    name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();

        if !is_repo_segment(&owner) || !is_repo_segment(&name) {
            return Err(Error::InvalidArgument(format!(
                "invalid repository coordinate '{}/{}'",
                owner, name
            )));
        }

        Ok(Self { owner, name })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name),
            _ => Err(Error::InvalidArgument(format!(
                "repository must be given as owner/name, got '{}'",
                raw
            ))),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

macro_rules! serialize_as_display {
    ($($ty:ty),*) => {
        $(impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        })*
    };
}

serialize_as_display!(ServiceName, Domain, RepoRef);

/// Caller-supplied parameters, before validation
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub name: String,
    pub local_path: PathBuf,
    pub domain: Option<String>,
    pub repo: Option<String>,
}

impl ServiceRequest {
    /// Validate every identifier; nothing external has happened yet
    pub fn validate(&self) -> Result<ServiceDescriptor> {
        let name = ServiceName::parse(&self.name)?;

        if self.local_path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("local path is required".into()));
        }

        let domain = self
            .domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(Domain::parse)
            .transpose()?;

        let repo_ref = self
            .repo
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(RepoRef::parse)
            .transpose()?;

        Ok(ServiceDescriptor {
            name,
            domain,
            local_path: self.local_path.clone(),
            repo_ref,
        })
    }
}

/// The validated identity of one service for the duration of a run
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_ref: Option<RepoRef>,
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn is_repo_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
