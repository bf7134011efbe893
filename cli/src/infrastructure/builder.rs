//! Image builds via `docker build`

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::ImageRef;
use crate::error::BuildError;
use crate::services::publisher::{BuildContext, ImageBuilder};
use crate::tools::{get_tool_path, names};

/// Keep the tail of build output; docker builds can be very chatty
const MAX_LOG_BYTES: usize = 64 * 1024;

pub struct DockerBuilder {
    binary: String,
}

impl DockerBuilder {
    pub fn new() -> Self {
        Self {
            binary: get_tool_path(names::DOCKER),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DockerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    async fn build(&self, context: &BuildContext, image: &ImageRef) -> Result<(), BuildError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("build").arg("-t").arg(image.to_string());
        if let Some(dockerfile) = &context.dockerfile {
            cmd.arg("-f").arg(dockerfile);
        }
        cmd.arg(&context.context_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(image = %image, "Running {:?}", cmd.as_std());

        let output = cmd.output().await.map_err(|e| BuildError {
            exit_code: None,
            logs: format!("failed to run {}: {}", self.binary, e),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(BuildError {
            exit_code: output.status.code(),
            logs: tail(&logs, MAX_LOG_BYTES).to_string(),
        })
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello world", 5), "world");
        // Never splits a multi-byte character
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_failing_build_reports_exit_code() {
        let builder = DockerBuilder::with_binary("false");
        let context = BuildContext {
            repository: "ghcr.io/myorg/shop/api".into(),
            context_dir: PathBuf::from("."),
            dockerfile: None,
        };
        let err = builder
            .build(&context, &ImageRef::new("ghcr.io/myorg/shop/api", "abc123"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_binary_is_build_error() {
        let builder = DockerBuilder::with_binary("/nonexistent/docker");
        let context = BuildContext {
            repository: "r".into(),
            context_dir: PathBuf::from("."),
            dockerfile: None,
        };
        let err = builder
            .build(&context, &ImageRef::new("r", "t"))
            .await
            .unwrap_err();
        assert!(err.exit_code.is_none());
        assert!(err.logs.contains("/nonexistent/docker"));
    }
}
