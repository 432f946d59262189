//! Environment constants and naming utilities for the game server orchestrator.
//!
//! This module centralizes the hardcoded paths, labels, images and port
//! defaults used throughout the crate, making them easier to maintain.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git)
pub const GSO_DIR_NAME: &str = ".gso";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name when placed directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "gso.toml";

/// Mount point of the per-instance persistent volume inside containers
pub const DATA_DIR: &str = "/data";

/// Container labels used to tag resources owned by this service
pub mod labels {
    /// Marks every container and volume created by the orchestrator
    pub const MANAGED: &str = "gso.managed";

    /// Instance identifier
    pub const INSTANCE_ID: &str = "gso.instance.id";

    /// Human readable instance name
    pub const INSTANCE_NAME: &str = "gso.instance.name";

    /// Role of the container ("server" or "helper")
    pub const ROLE: &str = "gso.role";
}

/// Default port bases used by the allocator
pub mod ports {
    /// First candidate for the game port
    pub const DEFAULT_GAME_PORT: u16 = 25565;

    /// First candidate for the remote console port
    pub const DEFAULT_RCON_PORT: u16 = 25575;

    /// First candidate for the query port
    pub const DEFAULT_QUERY_PORT: u16 = 25585;

    /// Port the game listens on inside the container
    pub const CONTAINER_GAME_PORT: u16 = 25565;

    /// Port the remote console listens on inside the container
    pub const CONTAINER_RCON_PORT: u16 = 25575;
}

/// Container images
pub mod images {
    /// Image used for game server instances when an `InstanceSpec` does not name one
    pub const DEFAULT_SERVER_IMAGE: &str = "itzg/minecraft-server:latest";

    /// Minimal image used for short-lived volume helper containers
    pub const HELPER_IMAGE: &str = "alpine:3";
}

/// Name of the persistent volume owned by an instance.
pub fn volume_name(instance_id: &str) -> String {
    format!("gso-data-{}", instance_id)
}

/// Name of the main server container of an instance.
pub fn container_name(instance_id: &str) -> String {
    format!("gso-{}", instance_id)
}

/// Name of a helper container operating on an instance volume.
pub fn helper_container_name(instance_id: &str, nonce: &str) -> String {
    format!("gso-helper-{}-{}", instance_id, nonce)
}

/// Build the user configuration directory path
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(GSO_DIR_NAME)
}

/// Build the user configuration file path
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the local configuration file path (./.gso/config.toml)
pub fn local_config_file_path(root: &Path) -> PathBuf {
    root.join(GSO_DIR_NAME).join(CONFIG_FILE_NAME)
}
