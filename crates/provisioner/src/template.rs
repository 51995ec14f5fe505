//! Template snapshots and merge-don't-clobber materialization
//!
//! A snapshot is fetched once per run, merged into the service workspace and
//! dropped. Files already present in the workspace are never touched.

use crate::config::Config;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use vps_common::{Error, Result};
use walkdir::WalkDir;

/// An extracted template tree, deleted on drop when it was downloaded
#[derive(Debug)]
pub struct TemplateSnapshot {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

impl TemplateSnapshot {
    /// Snapshot backed by an existing directory that outlives the run
    pub fn borrowed(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _scratch: None,
        }
    }

    /// Snapshot extracted into a scratch directory owned by the snapshot
    pub fn owned(scratch: TempDir) -> Self {
        Self {
            root: scratch.path().to_path_buf(),
            _scratch: Some(scratch),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Where template snapshots come from
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch(&self) -> Result<TemplateSnapshot>;

    /// Human readable origin for logs
    fn describe(&self) -> String;
}

/// Downloads a `.tar.gz` archive and extracts one subdirectory of it
pub struct ArchiveTemplateSource {
    url: String,
    subdir: PathBuf,
    http_client: reqwest::Client,
}

impl ArchiveTemplateSource {
    pub fn new(url: impl Into<String>, subdir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            subdir: subdir.into(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.template_archive_url(), &config.template_subdir)
    }
}

#[async_trait]
impl TemplateSource for ArchiveTemplateSource {
    async fn fetch(&self) -> Result<TemplateSnapshot> {
        info!("Downloading template from {}", self.url);

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::TemplateFetch(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        debug!("Downloaded {} bytes", bytes.len());

        let scratch = tempfile::Builder::new().prefix("vps-template-").tempdir()?;
        let dest = scratch.path().to_path_buf();
        let subdir = self.subdir.clone();

        let files = tokio::task::spawn_blocking(move || unpack_archive(&bytes, &subdir, &dest))
            .await
            .map_err(|e| Error::TemplateFetch(e.to_string()))??;

        info!("Extracted {} template files", files);
        Ok(TemplateSnapshot::owned(scratch))
    }

    fn describe(&self) -> String {
        format!("{} ({}/)", self.url, self.subdir.display())
    }
}

/// Uses a local directory as the snapshot
pub struct DirectoryTemplateSource {
    root: PathBuf,
}

impl DirectoryTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TemplateSource for DirectoryTemplateSource {
    async fn fetch(&self) -> Result<TemplateSnapshot> {
        if !self.root.is_dir() {
            return Err(Error::TemplateFetch(format!(
                "template directory {} does not exist",
                self.root.display()
            )));
        }
        Ok(TemplateSnapshot::borrowed(&self.root))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Extract the files under `<top-level>/<subdir>/` of a gzipped tarball into
/// `dest`, returning how many files were written.
pub fn unpack_archive(bytes: &[u8], subdir: &Path, dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut files = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        // Archives from the hosting service wrap everything in `<repo>-<ref>/`
        let mut components = path.components();
        if components.next().is_none() {
            continue;
        }

        let Ok(relative) = components.as_path().strip_prefix(subdir) else {
            continue;
        };

        if relative.as_os_str().is_empty() {
            continue;
        }

        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(Error::TemplateFetch(format!(
                "archive entry {} escapes the template root",
                path.display()
            )));
        }

        let target = dest.join(relative);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
            files += 1;
        } else {
            debug!("Skipping non-regular archive entry {}", path.display());
        }
    }

    if files == 0 {
        return Err(Error::TemplateFetch(format!(
            "archive contains no files under {}/",
            subdir.display()
        )));
    }

    Ok(files)
}

/// Outcome of merging a snapshot into a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    /// Paths (relative to the workspace) copied from the snapshot
    pub copied: Vec<PathBuf>,
    /// Paths left untouched because they already existed
    pub skipped: Vec<PathBuf>,
}

/// Copy every snapshot file into `target`, never overwriting existing paths
pub fn materialize(snapshot: &Path, target: &Path) -> Result<MaterializeReport> {
    let mut report = MaterializeReport::default();

    let walker = WalkDir::new(snapshot)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(snapshot)
            .map_err(|e| Error::Other(e.into()))?
            .to_path_buf();
        let dest = target.join(&relative);

        if dest.symlink_metadata().is_ok() {
            warn!("Skipping existing: {}", relative.display());
            report.skipped.push(relative);
            continue;
        }

        if let Some(blocker) = blocking_ancestor(target, &relative) {
            warn!(
                "Skipping {}: {} is not a directory",
                relative.display(),
                blocker.display()
            );
            report.skipped.push(relative);
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest)?;
        report.copied.push(relative);
    }

    info!(
        "Template materialized: {} copied, {} skipped",
        report.copied.len(),
        report.skipped.len()
    );
    Ok(report)
}

// First parent of `relative` that exists in `target` as something other than a directory
fn blocking_ancestor(target: &Path, relative: &Path) -> Option<PathBuf> {
    let mut ancestors: Vec<&Path> = relative
        .ancestors()
        .skip(1)
        .filter(|a| !a.as_os_str().is_empty())
        .collect();
    ancestors.reverse();

    ancestors.into_iter().map(Path::to_path_buf).find(|ancestor| {
        let path = target.join(ancestor);
        path.symlink_metadata().is_ok() && !path.is_dir()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(enc);

        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpack_archive_strips_prefix_and_subdir() {
        let bytes = tarball(&[
            ("vps-manager-main/README.md", "root readme"),
            ("vps-manager-main/template/docker-compose.yml", "name: myapp"),
            ("vps-manager-main/template/.github/workflows/deploy.yml", "on: push"),
        ]);

        let dest = tempfile::tempdir().unwrap();
        let files = unpack_archive(&bytes, Path::new("template"), dest.path()).unwrap();

        assert_eq!(files, 2);
        assert!(dest.path().join("docker-compose.yml").is_file());
        assert!(dest.path().join(".github/workflows/deploy.yml").is_file());
        assert!(!dest.path().join("README.md").exists());
    }

    #[test]
    fn test_unpack_archive_without_template_files() {
        let bytes = tarball(&[("vps-manager-main/README.md", "root readme")]);
        let dest = tempfile::tempdir().unwrap();

        let err = unpack_archive(&bytes, Path::new("template"), dest.path()).unwrap_err();
        assert!(matches!(err, Error::TemplateFetch(_)));
    }

    #[test]
    fn test_materialize_never_overwrites() {
        let snapshot = tempfile::tempdir().unwrap();
        fs::create_dir_all(snapshot.path().join("src")).unwrap();
        fs::write(snapshot.path().join("package.json"), "{\"name\": \"app-template\"}").unwrap();
        fs::write(snapshot.path().join("src/index.js"), "template").unwrap();

        let target = tempfile::tempdir().unwrap();
        fs::write(target.path().join("package.json"), "customized").unwrap();

        let report = materialize(snapshot.path(), target.path()).unwrap();

        assert_eq!(report.copied, vec![PathBuf::from("src/index.js")]);
        assert_eq!(report.skipped, vec![PathBuf::from("package.json")]);
        assert_eq!(
            fs::read_to_string(target.path().join("package.json")).unwrap(),
            "customized"
        );
    }

    #[test]
    fn test_materialize_skips_entries_under_existing_file() {
        let snapshot = tempfile::tempdir().unwrap();
        fs::create_dir_all(snapshot.path().join("src/routes")).unwrap();
        fs::write(snapshot.path().join("src/index.js"), "template").unwrap();
        fs::write(snapshot.path().join("src/routes/health.js"), "template").unwrap();
        fs::write(snapshot.path().join("Dockerfile"), "FROM node:20").unwrap();

        let target = tempfile::tempdir().unwrap();
        fs::write(target.path().join("src"), "not a directory").unwrap();

        let report = materialize(snapshot.path(), target.path()).unwrap();

        assert_eq!(report.copied, vec![PathBuf::from("Dockerfile")]);
        assert_eq!(
            report.skipped,
            vec![
                PathBuf::from("src/index.js"),
                PathBuf::from("src/routes/health.js")
            ]
        );
        assert_eq!(
            fs::read_to_string(target.path().join("src")).unwrap(),
            "not a directory"
        );
    }

    #[test]
    fn test_materialize_ignores_snapshot_git_dir() {
        let snapshot = tempfile::tempdir().unwrap();
        fs::create_dir_all(snapshot.path().join(".git")).unwrap();
        fs::write(snapshot.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(snapshot.path().join("Dockerfile"), "FROM node:20").unwrap();

        let target = tempfile::tempdir().unwrap();
        let report = materialize(snapshot.path(), target.path()).unwrap();

        assert_eq!(report.copied, vec![PathBuf::from("Dockerfile")]);
        assert!(!target.path().join(".git").exists());
    }

    #[tokio::test]
    async fn test_directory_source_requires_existing_dir() {
        let source = DirectoryTemplateSource::new("/nonexistent/template/dir");
        assert!(matches!(source.fetch().await, Err(Error::TemplateFetch(_))));

        let dir = tempfile::tempdir().unwrap();
        let snapshot = DirectoryTemplateSource::new(dir.path()).fetch().await.unwrap();
        assert_eq!(snapshot.root(), dir.path());
    }
}
