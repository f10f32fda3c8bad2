//! Document sources.
//!
//! A [`Source`] lists the PDFs in a folder and downloads one by id. The
//! sync pipeline only uses these two operations and does not care about the
//! transport behind them.
//!
//! | Source | Folder id | File id | File name (ledger identity) |
//! |--------|-----------|---------|------------------------------|
//! | [`GoogleDriveSource`] | drive folder id | drive file id | drive file name |
//! | [`LocalFolderSource`] | directory path | absolute path | path relative to the folder |

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::config::{DriveConfig, LocalConfig};
use crate::drive_auth::{DriveAuth, ServiceAccountAuth, ServiceAccountKey};
use crate::error::{IngestError, Result};
use crate::extract::MIME_PDF;
use crate::models::SourceFile;

#[async_trait]
pub trait Source: Send + Sync {
    /// Short name used in logs and summaries (e.g. `"drive"`).
    fn kind(&self) -> &str;

    async fn list_files(&self, folder_id: &str) -> Result<Vec<SourceFile>>;

    /// Write the content of file `id` to `dest`.
    async fn download_file(&self, id: &str, dest: &Path) -> Result<()>;
}

// ============ Google Drive ============

/// Environment variable holding an OAuth bearer token for the Drive API.
/// When set it takes precedence over `drive.credentials_path`.
pub const DRIVE_TOKEN_ENV: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";

/// Reads PDFs from a Google Drive folder through the Drive v3 REST API.
pub struct GoogleDriveSource {
    client: reqwest::Client,
    api_base: String,
    auth: DriveAuth,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

impl GoogleDriveSource {
    /// A source authorized by a fixed bearer token.
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_auth(api_base, DriveAuth::Static(token.into()))
    }

    pub fn with_auth(api_base: impl Into<String>, auth: DriveAuth) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Build from `[drive]` config. `GOOGLE_DRIVE_ACCESS_TOKEN` wins over
    /// `drive.credentials_path`; one of them is required.
    pub fn from_config(config: &DriveConfig) -> anyhow::Result<Self> {
        if let Ok(token) = std::env::var(DRIVE_TOKEN_ENV) {
            return Ok(Self::new(config.api_base.clone(), token));
        }
        let Some(path) = config.credentials_path.as_deref() else {
            anyhow::bail!(
                "Drive credentials missing: set {} or drive.credentials_path",
                DRIVE_TOKEN_ENV
            );
        };
        let auth = ServiceAccountAuth::new(ServiceAccountKey::from_file(path)?)?;
        tracing::info!(account = auth.client_email(), "using drive service account");
        Ok(Self::with_auth(
            config.api_base.clone(),
            DriveAuth::ServiceAccount(auth),
        ))
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let token = self.auth.bearer(&self.client).await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| IngestError::Source(format!("drive request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(if status == reqwest::StatusCode::NOT_FOUND {
            IngestError::NotFound(format!("drive: {}", body))
        } else {
            IngestError::Source(format!("drive API error {}: {}", status, body))
        })
    }
}

#[async_trait]
impl Source for GoogleDriveSource {
    fn kind(&self) -> &str {
        "drive"
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<SourceFile>> {
        let url = format!("{}/drive/v3/files", self.api_base);
        let q = format!(
            "'{}' in parents and mimeType='{}'",
            folder_id.replace('\'', "\\'"),
            MIME_PDF
        );

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page: FileList = {
                let mut query = vec![
                    ("q", q.as_str()),
                    ("fields", "nextPageToken, files(id, name)"),
                    ("pageSize", "1000"),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get(&url, &query)
                    .await?
                    .json()
                    .await
                    .map_err(|e| IngestError::Source(format!("invalid drive listing: {}", e)))?
            };

            files.extend(page.files.into_iter().map(|f| SourceFile {
                id: f.id,
                name: f.name,
            }));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn download_file(&self, id: &str, dest: &Path) -> Result<()> {
        let url = format!("{}/drive/v3/files/{}", self.api_base, id);
        let mut response = self.get(&url, &[("alt", "media")]).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| IngestError::Source(format!("drive download interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

// ============ Local folder ============

/// Reads PDFs from a directory tree.
pub struct LocalFolderSource {
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl LocalFolderSource {
    pub fn new(
        include_globs: &[String],
        exclude_globs: &[String],
        follow_symlinks: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(exclude_globs)?,
            follow_symlinks,
        })
    }

    pub fn from_config(config: &LocalConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.include_globs,
            &config.exclude_globs,
            config.follow_symlinks,
        )
    }

    fn scan(&self, root: &Path) -> Result<Vec<SourceFile>> {
        if !root.is_dir() {
            return Err(IngestError::NotFound(format!(
                "folder does not exist: {}",
                root.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.follow_symlinks) {
            let entry = entry.map_err(|e| IngestError::Source(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            files.push(SourceFile {
                id: path.to_string_lossy().to_string(),
                name: rel_str,
            });
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

#[async_trait]
impl Source for LocalFolderSource {
    fn kind(&self) -> &str {
        "local"
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<SourceFile>> {
        self.scan(&PathBuf::from(folder_id))
    }

    async fn download_file(&self, id: &str, dest: &Path) -> Result<()> {
        tokio::fs::copy(id, dest).await?;
        Ok(())
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source() -> LocalFolderSource {
        LocalFolderSource::new(&["**/*.pdf".to_string()], &["drafts/**".to_string()], false).unwrap()
    }

    #[tokio::test]
    async fn local_lists_matching_files_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("q1")).unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"%PDF-").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"%PDF-").unwrap();
        std::fs::write(tmp.path().join("q1/report.pdf"), b"%PDF-").unwrap();
        std::fs::write(tmp.path().join("drafts/wip.pdf"), b"%PDF-").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"text").unwrap();

        let files = source()
            .list_files(&tmp.path().to_string_lossy())
            .await
            .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "q1/report.pdf"]);
    }

    #[tokio::test]
    async fn local_download_copies_bytes() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.pdf");
        std::fs::write(&src, b"%PDF-1.4 body").unwrap();
        let dest = tmp.path().join("copy.pdf");

        source()
            .download_file(&src.to_string_lossy(), &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn local_missing_folder_is_not_found() {
        let err = source().list_files("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }
}
