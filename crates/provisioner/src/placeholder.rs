//! Literal placeholder substitution across the materialized template
//!
//! Replacement is plain substring matching, so it behaves the same in YAML,
//! JSON, Markdown or JavaScript. The domain placeholder contains the name
//! placeholder (`myapp.example.com` vs `myapp`); occurrences of the domain
//! placeholder are therefore carved out before name tokens are replaced.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vps_common::{Domain, Result, ServiceName};
use walkdir::WalkDir;

/// Extensions of files eligible for substitution
pub const DEFAULT_EXTENSIONS: &[&str] = &["yml", "yaml", "json", "md", "js", "toml"];

/// Tokens replaced by the service name
pub const NAME_TOKENS: &[&str] = &["myapp", "app-template"];

/// Token replaced by the service domain
pub const DOMAIN_TOKEN: &str = "myapp.example.com";

/// Token selecting the DNS provider in the template's DNS workflows
pub const DNS_PROVIDER_TOKEN: &str = "provider: cloudflare";

/// The resolved values placed into the template
#[derive(Debug, Clone)]
pub struct Substitutions {
    pub name: ServiceName,
    pub domain: Option<Domain>,
    pub dns_provider: Option<String>,
}

/// Which files are rewritten and which tokens are replaced
#[derive(Debug, Clone)]
pub struct SubstitutionTable {
    pub extensions: Vec<String>,
    pub name_tokens: Vec<String>,
    pub domain_token: String,
    pub dns_provider_token: String,
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            name_tokens: NAME_TOKENS.iter().map(|s| s.to_string()).collect(),
            domain_token: DOMAIN_TOKEN.to_string(),
            dns_provider_token: DNS_PROVIDER_TOKEN.to_string(),
        }
    }
}

impl SubstitutionTable {
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false)
    }

    /// Apply every substitution to one file's content.
    ///
    /// Without a domain the domain token is kept verbatim for the operator.
    pub fn apply(&self, content: &str, values: &Substitutions) -> String {
        let domain = values
            .domain
            .as_ref()
            .map(Domain::as_str)
            .unwrap_or(&self.domain_token);

        let content = content
            .split(self.domain_token.as_str())
            .map(|segment| self.replace_name_tokens(segment, values.name.as_str()))
            .collect::<Vec<_>>()
            .join(domain);

        match (&values.domain, &values.dns_provider) {
            (Some(_), Some(provider)) => {
                content.replace(&self.dns_provider_token, &format!("provider: {}", provider))
            }
            _ => content,
        }
    }

    fn replace_name_tokens(&self, segment: &str, name: &str) -> String {
        // Longest tokens first so overlapping tokens resolve deterministically
        let mut tokens: Vec<&String> = self.name_tokens.iter().collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.len()));

        tokens
            .into_iter()
            .fold(segment.to_string(), |acc, token| acc.replace(token.as_str(), name))
    }
}

/// Rewrite matching files under `root`, returning the files that changed
pub fn substitute_tree(
    root: &Path,
    table: &SubstitutionTable,
    values: &Substitutions,
) -> Result<Vec<PathBuf>> {
    let mut changed = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| vps_common::Error::Io(e.into()))?;
        if !entry.file_type().is_file() || !table.matches(entry.path()) {
            continue;
        }

        let Ok(original) = fs::read_to_string(entry.path()) else {
            debug!("Skipping non UTF-8 file {}", entry.path().display());
            continue;
        };

        let updated = table.apply(&original, values);
        if updated != original {
            fs::write(entry.path(), updated)?;
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            changed.push(relative.to_path_buf());
        }
    }

    if values.domain.is_none() {
        info!(
            "No domain given; '{}' placeholders left for manual follow-up",
            table.domain_token
        );
    }

    info!("Customized {} template files", changed.len());
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(domain: Option<&str>) -> Substitutions {
        Substitutions {
            name: ServiceName::parse("billing").unwrap(),
            domain: domain.map(|d| Domain::parse(d).unwrap()),
            dns_provider: None,
        }
    }

    #[test]
    fn test_name_tokens_replaced() {
        let table = SubstitutionTable::default();
        let out = table.apply(
            "services:\n  myapp:\n    image: app-template:latest\n",
            &values(None),
        );
        assert_eq!(out, "services:\n  billing:\n    image: billing:latest\n");
    }

    #[test]
    fn test_domain_placeholder_kept_without_domain() {
        let table = SubstitutionTable::default();
        let out = table.apply("Host(`myapp.example.com`) -> myapp", &values(None));
        assert_eq!(out, "Host(`myapp.example.com`) -> billing");
    }

    #[test]
    fn test_domain_placeholder_replaced_with_domain() {
        let table = SubstitutionTable::default();
        let out = table.apply(
            "Host(`myapp.example.com`) -> myapp",
            &values(Some("billing.example.com")),
        );
        assert_eq!(out, "Host(`billing.example.com`) -> billing");
    }

    #[test]
    fn test_dns_provider_requires_domain() {
        let table = SubstitutionTable::default();
        let mut with_provider = values(Some("pay.acme.io"));
        with_provider.dns_provider = Some("netlify".into());

        assert_eq!(
            table.apply("provider: cloudflare", &with_provider),
            "provider: netlify"
        );

        let mut without_domain = values(None);
        without_domain.dns_provider = Some("netlify".into());
        assert_eq!(
            table.apply("provider: cloudflare", &without_domain),
            "provider: cloudflare"
        );
    }

    #[test]
    fn test_extension_table() {
        let table = SubstitutionTable::default();
        assert!(table.matches(Path::new("docker-compose.yml")));
        assert!(table.matches(Path::new("docs/README.md")));
        assert!(!table.matches(Path::new("Dockerfile")));
        assert!(!table.matches(Path::new("logo.png")));
    }

    #[test]
    fn test_substitute_tree_only_rewrites_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{\"name\": \"app-template\"}").unwrap();
        fs::write(dir.path().join("notes.md"), "nothing to replace").unwrap();
        fs::write(dir.path().join("Dockerfile"), "LABEL app=myapp").unwrap();
        fs::write(dir.path().join("blob.json"), [0xff, 0xfe, 0x00]).unwrap();

        let table = SubstitutionTable::default();
        let changed = substitute_tree(dir.path(), &table, &values(None)).unwrap();

        assert_eq!(changed, vec![PathBuf::from("package.json")]);
        assert_eq!(
            fs::read_to_string(dir.path().join("package.json")).unwrap(),
            "{\"name\": \"billing\"}"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("Dockerfile")).unwrap(),
            "LABEL app=myapp"
        );
    }
}
