// File: manager/src/services/remote_storage.rs
use std::path::Path;
use tracing::{info, instrument};

use crate::artifact::BackupArtifact;
use crate::commands::run_command;
use crate::config::RemoteConfig;
use crate::errors::EngineError;

/// Offsite copies to an S3-compatible bucket through the aws CLI
#[derive(Debug, Clone)]
pub struct RemoteStorage {
    aws_binary: String,
    bucket: String,
    prefix: String,
    endpoint_url: Option<String>,
}

impl RemoteStorage {
    /// `None` when no bucket is configured or the environment check
    /// disabled remote copies
    pub fn from_config(config: &RemoteConfig, enabled: bool) -> Option<Self> {
        if !enabled {
            return None;
        }
        let bucket = config.bucket.as_deref()?.trim();
        if bucket.is_empty() {
            return None;
        }
        Some(Self {
            aws_binary: config.aws_binary.clone(),
            bucket: bucket.to_string(),
            prefix: config.prefix.trim_matches('/').to_string(),
            endpoint_url: config.endpoint_url.clone().filter(|url| !url.is_empty()),
        })
    }

    /// `s3://<bucket>/<prefix>/<tier>/<file>`
    pub fn destination(&self, tier_dir: &str, file_name: &str) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}/{}/{}", self.bucket, tier_dir, file_name)
        } else {
            format!("s3://{}/{}/{}/{}", self.bucket, self.prefix, tier_dir, file_name)
        }
    }

    /// Copy the artifact and, when present, its checksum sibling.
    /// Returns the destinations written.
    #[instrument(skip(self, artifact), fields(artifact = %artifact.file_name()))]
    pub async fn upload(&self, artifact: &BackupArtifact) -> Result<Vec<String>, EngineError> {
        let tier_dir = artifact.tier().dir_name();
        let mut uploaded = Vec::new();

        let destination = self.destination(tier_dir, &artifact.file_name());
        self.copy(artifact.path(), &destination).await?;
        uploaded.push(destination);

        let checksum = artifact.checksum_path();
        if tokio::fs::try_exists(&checksum).await.unwrap_or(false) {
            let name = checksum
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let destination = self.destination(tier_dir, &name);
            self.copy(&checksum, &destination).await?;
            uploaded.push(destination);
        }

        info!("✓ Uploaded {} to {}", artifact.file_name(), uploaded[0]);
        Ok(uploaded)
    }

    async fn copy(&self, source: &Path, destination: &str) -> Result<(), EngineError> {
        let mut args = vec![
            "s3".to_string(),
            "cp".to_string(),
            "--only-show-errors".to_string(),
        ];
        if let Some(endpoint) = &self.endpoint_url {
            args.push("--endpoint-url".to_string());
            args.push(endpoint.clone());
        }
        args.push(source.to_string_lossy().to_string());
        args.push(destination.to_string());

        run_command(&self.aws_binary, &args, &[]).await?;
        Ok(())
    }
}
