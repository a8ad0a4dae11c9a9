//! Result bundle extraction
//!
//! A bundle is one zip archive plus an optional manifest describing its
//! members. [`ResultUnpacker::unpack`] extracts the archive into
//! `{results_dir}/{job_id}`, replacing anything a previous attempt left
//! there, and classifies every extracted file.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("bundle corrupt: {0}")]
    Corrupt(String),

    #[error("bundle corrupt: manifest entry '{0}' missing from archive")]
    MissingEntry(String),

    #[error("bundle corrupt: invalid manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    #[error("I/O error while unpacking: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for UnpackError {
    fn from(err: zip::result::ZipError) -> Self {
        UnpackError::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UnpackError>;

/// One file described by the peer's manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub description: String,
}

/// `{task_id}_manifest.json` as written by the peer system
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(default, alias = "batch_id")]
    pub task_id: Option<String>,
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub total_count: Option<usize>,
}

impl BundleManifest {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Archive fetched from the peer for one job
#[derive(Debug, Clone)]
pub struct ResultBundle {
    pub job_id: String,
    pub archive: Bytes,
    pub manifest: Option<BundleManifest>,
}

/// One extracted, classified result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub filename: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub description: String,
    pub url: String,
}

/// Everything a completed job produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub job_id: String,
    pub files: Vec<ResultFile>,
    pub png_files: Vec<String>,
    pub gds_files: Vec<String>,
    pub other_files: Vec<String>,
    pub total_count: usize,
}

impl ResultSet {
    fn from_files(job_id: &str, files: Vec<ResultFile>) -> Self {
        let mut png_files = Vec::new();
        let mut gds_files = Vec::new();
        let mut other_files = Vec::new();

        for file in &files {
            match file.file_type.as_str() {
                "png" => png_files.push(file.filename.clone()),
                "gds" => gds_files.push(file.filename.clone()),
                _ => other_files.push(file.filename.clone()),
            }
        }

        Self {
            job_id: job_id.to_string(),
            total_count: files.len(),
            files,
            png_files,
            gds_files,
            other_files,
        }
    }
}

/// Extracts bundles into job-scoped directories under `results_dir`
#[derive(Debug, Clone)]
pub struct ResultUnpacker {
    results_dir: PathBuf,
    url_prefix: String,
}

impl ResultUnpacker {
    pub fn new(results_dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            results_dir: results_dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.results_dir.join(job_id)
    }

    pub fn unpack(&self, job_id: &str, bundle: &ResultBundle) -> Result<ResultSet> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bundle.archive.as_ref()))?;

        let job_dir = self.job_dir(job_id);
        if job_dir.exists() {
            fs::remove_dir_all(&job_dir)?;
        }
        fs::create_dir_all(&job_dir)?;

        let mut extracted = Vec::new();
        let mut embedded_manifest = None;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }

            let Some(relative) = entry.enclosed_name() else {
                warn!(job_id, name = entry.name(), "Unsafe archive entry skipped");
                continue;
            };
            let name = relative_name(&relative);

            if is_manifest_name(&name) {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                embedded_manifest = Some(BundleManifest::from_slice(&data)?);
                continue;
            }

            let target = job_dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
            debug!(job_id, file = %name, "Extracted result file");
            extracted.push(name);
        }

        let manifest = bundle.manifest.as_ref().or(embedded_manifest.as_ref());
        let files = match manifest {
            Some(manifest) => self.classify_from_manifest(job_id, manifest, &extracted)?,
            None => self.classify_by_suffix(job_id, &extracted),
        };

        let result = ResultSet::from_files(job_id, files);
        info!(
            job_id,
            total = result.total_count,
            png = result.png_files.len(),
            gds = result.gds_files.len(),
            "Result bundle unpacked"
        );
        Ok(result)
    }

    fn classify_from_manifest(
        &self,
        job_id: &str,
        manifest: &BundleManifest,
        extracted: &[String],
    ) -> Result<Vec<ResultFile>> {
        let present: HashSet<&str> = extracted.iter().map(String::as_str).collect();

        manifest
            .files
            .iter()
            .map(|entry| {
                if !present.contains(entry.filename.as_str()) {
                    return Err(UnpackError::MissingEntry(entry.filename.clone()));
                }
                let description = if entry.description.is_empty() {
                    generic_description(&entry.file_type)
                } else {
                    entry.description.clone()
                };
                Ok(ResultFile {
                    filename: entry.filename.clone(),
                    file_type: entry.file_type.to_lowercase(),
                    description,
                    url: self.url_for(job_id, &entry.filename),
                })
            })
            .collect()
    }

    fn classify_by_suffix(&self, job_id: &str, extracted: &[String]) -> Vec<ResultFile> {
        extracted
            .iter()
            .map(|name| {
                let file_type = infer_type(name);
                ResultFile {
                    filename: name.clone(),
                    description: generic_description(&file_type),
                    url: self.url_for(job_id, name),
                    file_type,
                }
            })
            .collect()
    }

    fn url_for(&self, job_id: &str, filename: &str) -> String {
        format!("{}/{}/{}", self.url_prefix, job_id, filename)
    }
}

/// Lowercase file suffix, or `file` when there is none
pub fn infer_type(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "file".to_string())
}

fn generic_description(file_type: &str) -> String {
    format!("{} file", file_type.to_uppercase())
}

fn is_manifest_name(name: &str) -> bool {
    name == "manifest.json" || name.ends_with("_manifest.json")
}

fn relative_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
