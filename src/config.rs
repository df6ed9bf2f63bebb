/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};

/// Ambient configuration for a [`crate::Filesystem`] instance, read by the
/// embedding daemon from its own config file and handed to [`crate::Filesystem::new`].
///
/// This crate does not locate or parse a config file itself; it only
/// describes the fields it needs.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerConfig {
    /// Absolute host path that anchors the sandbox. Must already exist.
    pub root_directory: String,
    /// Interval, in seconds, between automatic full [`crate::Accountant::recount`] passes.
    pub disk_check_interval: u16,
    /// Quota in bytes. `0` means unlimited.
    #[serde(default)]
    pub disk_limit_bytes: i64,
    /// Ownership applied to files and directories created through the
    /// operation surface. `None` leaves ownership untouched.
    #[serde(default)]
    pub user: Option<OwnershipConfig>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipConfig {
    pub uid: u32,
    pub gid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            root_directory = "/srv/data/servers/abc"
            disk_check_interval = 60
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.root_directory, "/srv/data/servers/abc");
        assert_eq!(config.disk_check_interval, 60);
        assert_eq!(config.disk_limit_bytes, 0);
        assert!(config.user.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            root_directory = "/srv/data/servers/abc"
            disk_check_interval = 30
            disk_limit_bytes = 1073741824

            [user]
            uid = 988
            gid = 988
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.disk_limit_bytes, 1_073_741_824);
        assert_eq!(config.user, Some(OwnershipConfig { uid: 988, gid: 988 }));
    }
}
