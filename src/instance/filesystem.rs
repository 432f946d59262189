//! File operations on instance volumes.
//!
//! Instance data lives in a named volume that is only reachable from inside a
//! container. [`HelperContainerMutator`] mounts that volume into a short-lived
//! helper container at `/data`, runs one fixed shell command and removes the
//! helper on every path, including errors and cancellation.

use crate::container::{ContainerConfig, ContainerError, ContainerRuntime};
use crate::env;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Directory holding server plugins, relative to the data root.
pub const PLUGINS_DIR: &str = "plugins";

/// Filesystem operation errors.
#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Helper command `{operation}` exited with code {code}")]
    CommandFailed { operation: String, code: i64 },

    #[error(transparent)]
    Runtime(#[from] ContainerError),
}

pub type Result<T> = std::result::Result<T, FilesystemError>;

/// Operation passed to [`InstanceManager::filesystem_mutate`](crate::instance::InstanceManager::filesystem_mutate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    WriteConfig { path: String, contents: String },
    RemoveFiles { paths: Vec<String> },
    CheckExists { path: String },
    InstallPlugin { file_name: String, url: String },
    RemovePlugin { file_name: String },
    PluginInstalled { file_name: String },
}

/// Result of a [`FileOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Done,
    Exists(bool),
}

/// Reject absolute paths and parent traversal; paths are relative to `/data`.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let invalid = || FilesystemError::InvalidPath(path.to_string());

    if path.trim().is_empty() {
        return Err(invalid());
    }

    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

fn plugin_path(file_name: &str) -> Result<String> {
    if file_name.contains('/') || file_name.contains('\\') {
        return Err(FilesystemError::InvalidPath(file_name.to_string()));
    }
    let path = format!("{}/{}", PLUGINS_DIR, file_name);
    validate_relative_path(&path)?;
    Ok(path)
}

/// Capability to change files in an instance volume.
#[async_trait]
pub trait FilesystemMutator: Send + Sync {
    /// Write `contents` to `path`, creating parent directories.
    async fn write_config(&self, instance_id: &str, path: &str, contents: &str) -> Result<()>;

    /// Remove files or directories. Missing paths are ignored.
    async fn remove_files(&self, instance_id: &str, paths: &[String]) -> Result<()>;

    async fn check_exists(&self, instance_id: &str, path: &str) -> Result<bool>;

    /// Fetch `url` into `path`.
    async fn download(&self, instance_id: &str, url: &str, path: &str) -> Result<()>;

    async fn install_plugin(&self, instance_id: &str, file_name: &str, url: &str) -> Result<()> {
        let path = plugin_path(file_name)?;
        self.download(instance_id, url, &path).await
    }

    async fn remove_plugin(&self, instance_id: &str, file_name: &str) -> Result<()> {
        let path = plugin_path(file_name)?;
        self.remove_files(instance_id, &[path]).await
    }

    async fn plugin_installed(&self, instance_id: &str, file_name: &str) -> Result<bool> {
        let path = plugin_path(file_name)?;
        self.check_exists(instance_id, &path).await
    }

    /// Dispatch a [`FileOperation`].
    async fn apply(&self, instance_id: &str, operation: FileOperation) -> Result<FileOutcome> {
        match operation {
            FileOperation::WriteConfig { path, contents } => {
                self.write_config(instance_id, &path, &contents).await?;
                Ok(FileOutcome::Done)
            }
            FileOperation::RemoveFiles { paths } => {
                self.remove_files(instance_id, &paths).await?;
                Ok(FileOutcome::Done)
            }
            FileOperation::CheckExists { path } => self
                .check_exists(instance_id, &path)
                .await
                .map(FileOutcome::Exists),
            FileOperation::InstallPlugin { file_name, url } => {
                self.install_plugin(instance_id, &file_name, &url).await?;
                Ok(FileOutcome::Done)
            }
            FileOperation::RemovePlugin { file_name } => {
                self.remove_plugin(instance_id, &file_name).await?;
                Ok(FileOutcome::Done)
            }
            FileOperation::PluginInstalled { file_name } => self
                .plugin_installed(instance_id, &file_name)
                .await
                .map(FileOutcome::Exists),
        }
    }
}

/// Removes the helper container when dropped without [`release`](HelperGuard::release).
struct HelperGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: Option<String>,
}

impl HelperGuard {
    async fn release(mut self) {
        if let Some(id) = self.container_id.take() {
            remove_helper(self.runtime.as_ref(), &id).await;
        }
    }
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        let Some(id) = self.container_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                handle.spawn(async move {
                    remove_helper(runtime.as_ref(), &id).await;
                });
            }
            Err(_) => warn!("No async runtime to remove helper container {}", id),
        }
    }
}

async fn remove_helper(runtime: &dyn ContainerRuntime, id: &str) {
    match runtime.remove_container(id, true).await {
        Ok(()) => debug!("Removed helper container: {}", id),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!("Failed to remove helper container {}: {}", id, e),
    }
}

/// [`FilesystemMutator`] running commands in throwaway helper containers.
pub struct HelperContainerMutator {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    timeout: Duration,
}

impl HelperContainerMutator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            image: env::images::HELPER_IMAGE.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `sh -c script args...` against the instance volume and return the exit code.
    async fn run(
        &self,
        instance_id: &str,
        script: &str,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<i64> {
        let mut cmd = vec!["sh", "-c", script, "sh"];
        cmd.extend_from_slice(args);

        let config = ContainerConfig::builder()
            .image(self.image.as_str())
            .cmd(cmd)
            .envs(envs.iter().copied())
            .volume(env::volume_name(instance_id), env::DATA_DIR)
            .label(env::labels::MANAGED, "true")
            .label(env::labels::INSTANCE_ID, instance_id)
            .label(env::labels::ROLE, "helper")
            .build()?;

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let name = env::helper_container_name(instance_id, &nonce[..8]);

        let id = self.runtime.create_container(&name, &config).await?;
        let guard = HelperGuard {
            runtime: Arc::clone(&self.runtime),
            container_id: Some(id.clone()),
        };

        let outcome = async {
            self.runtime.start_container(&id).await?;
            self.runtime.wait_container(&id, self.timeout).await
        }
        .await;

        guard.release().await;
        Ok(outcome?)
    }

    async fn run_checked(
        &self,
        operation: &str,
        instance_id: &str,
        script: &str,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<()> {
        match self.run(instance_id, script, args, envs).await? {
            0 => Ok(()),
            code => Err(FilesystemError::CommandFailed {
                operation: operation.to_string(),
                code,
            }),
        }
    }
}

#[async_trait]
impl FilesystemMutator for HelperContainerMutator {
    async fn write_config(&self, instance_id: &str, path: &str, contents: &str) -> Result<()> {
        validate_relative_path(path)?;
        self.run_checked(
            "write_config",
            instance_id,
            r#"cd /data && mkdir -p "$(dirname "$1")" && printf '%s' "$GSO_CONTENT" > "$1""#,
            &[path],
            &[("GSO_CONTENT", contents)],
        )
        .await
    }

    async fn remove_files(&self, instance_id: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        for path in paths {
            validate_relative_path(path)?;
        }
        let args: Vec<&str> = paths.iter().map(String::as_str).collect();
        self.run_checked(
            "remove_files",
            instance_id,
            r#"cd /data && rm -rf -- "$@""#,
            &args,
            &[],
        )
        .await
    }

    async fn check_exists(&self, instance_id: &str, path: &str) -> Result<bool> {
        validate_relative_path(path)?;
        match self
            .run(instance_id, r#"test -e "/data/$1""#, &[path], &[])
            .await?
        {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(FilesystemError::CommandFailed {
                operation: "check_exists".to_string(),
                code,
            }),
        }
    }

    async fn download(&self, instance_id: &str, url: &str, path: &str) -> Result<()> {
        validate_relative_path(path)?;
        self.run_checked(
            "download",
            instance_id,
            r#"cd /data && mkdir -p "$(dirname "$2")" && wget -q -O "$2" "$1""#,
            &[url, path],
            &[],
        )
        .await
    }
}

/// [`FilesystemMutator`] over an in-memory file map per instance.
///
/// Downloads store the source URL as the file contents.
#[derive(Default)]
pub struct InMemoryFilesystem {
    files: DashMap<String, BTreeMap<String, String>>,
}

impl InMemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a file, if present.
    pub fn read(&self, instance_id: &str, path: &str) -> Option<String> {
        self.files
            .get(instance_id)
            .and_then(|files| files.get(&normalize(path)).cloned())
    }
}

fn normalize(path: &str) -> String {
    Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl FilesystemMutator for InMemoryFilesystem {
    async fn write_config(&self, instance_id: &str, path: &str, contents: &str) -> Result<()> {
        validate_relative_path(path)?;
        self.files
            .entry(instance_id.to_string())
            .or_default()
            .insert(normalize(path), contents.to_string());
        Ok(())
    }

    async fn remove_files(&self, instance_id: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            validate_relative_path(path)?;
        }
        if let Some(mut files) = self.files.get_mut(instance_id) {
            for path in paths {
                let target = normalize(path);
                let prefix = format!("{}/", target);
                files.retain(|existing, _| existing != &target && !existing.starts_with(&prefix));
            }
        }
        Ok(())
    }

    async fn check_exists(&self, instance_id: &str, path: &str) -> Result<bool> {
        validate_relative_path(path)?;
        let target = normalize(path);
        let prefix = format!("{}/", target);
        Ok(self.files.get(instance_id).is_some_and(|files| {
            files
                .keys()
                .any(|existing| existing == &target || existing.starts_with(&prefix))
        }))
    }

    async fn download(&self, instance_id: &str, url: &str, path: &str) -> Result<()> {
        self.write_config(instance_id, path, url).await
    }
}
