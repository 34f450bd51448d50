// ABOUTME: Parsers for the one-line option formats used by start and list calls.
// ABOUTME: Env, port, volume, device, run-as, capability, and filter strings.

use super::OptionParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `NAME=VALUE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl FromStr for EnvVar {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| OptionParseError::field_count("env", s, "<VAR_NAME>=<VAR_VALUE>"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(OptionParseError::invalid("env", s, "variable name is empty"));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// `internal:external` (container port, host port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
}

impl FromStr for PortMapping {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let [internal, external] = fields.as_slice() else {
            return Err(OptionParseError::field_count(
                "port",
                s,
                "<internal_port>:<external_port>",
            ));
        };
        let parse = |p: &str| {
            p.parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| OptionParseError::invalid("port", s, format!("invalid port: {p}")))
        };
        Ok(Self {
            internal: parse(*internal)?,
            external: parse(*external)?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.internal, self.external)
    }
}

/// `name:mountpoint[:ro]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mountpoint: String,
    pub read_only: bool,
}

impl FromStr for VolumeMount {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let (name, mountpoint, read_only) = match fields.as_slice() {
            [name, mountpoint] => (*name, *mountpoint, false),
            [name, mountpoint, "ro"] => (*name, *mountpoint, true),
            [name, mountpoint, "rw"] => (*name, *mountpoint, false),
            [_, _, mode] => {
                return Err(OptionParseError::invalid(
                    "volume",
                    s,
                    format!("unknown mount mode: {mode}"),
                ));
            }
            _ => {
                return Err(OptionParseError::field_count(
                    "volume",
                    s,
                    "<volume-name>:<mountpoint>[:ro]",
                ));
            }
        };
        if name.is_empty() {
            return Err(OptionParseError::invalid("volume", s, "volume name is empty"));
        }
        if !mountpoint.starts_with('/') {
            return Err(OptionParseError::invalid(
                "volume",
                s,
                "mountpoint must be an absolute path",
            ));
        }
        Ok(Self {
            name: name.to_string(),
            mountpoint: mountpoint.to_string(),
            read_only,
        })
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.mountpoint)?;
        if self.read_only {
            write!(f, ":ro")?;
        }
        Ok(())
    }
}

/// `src-path[:dst-path[:permissions]]`, permissions drawn from `rwm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub source: String,
    pub target: String,
    pub permissions: String,
}

pub const DEFAULT_DEVICE_PERMISSIONS: &str = "rwm";

impl FromStr for DeviceMapping {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let (source, target, permissions) = match fields.as_slice() {
            [src] => (*src, *src, DEFAULT_DEVICE_PERMISSIONS),
            [src, dst] => (*src, *dst, DEFAULT_DEVICE_PERMISSIONS),
            [src, dst, perms] => (*src, *dst, *perms),
            _ => {
                return Err(OptionParseError::field_count(
                    "device",
                    s,
                    "<src-path>[:<dst-path>[:<permissions>]]",
                ));
            }
        };
        if !source.starts_with('/') || !target.starts_with('/') {
            return Err(OptionParseError::invalid(
                "device",
                s,
                "device paths must be absolute",
            ));
        }
        if permissions.is_empty() || !permissions.chars().all(|c| matches!(c, 'r' | 'w' | 'm')) {
            return Err(OptionParseError::invalid(
                "device",
                s,
                format!("invalid permissions: {permissions}"),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            permissions: permissions.to_string(),
        })
    }
}

impl fmt::Display for DeviceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.target, self.permissions)
    }
}

/// `user[:group]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAs {
    pub user: String,
    pub group: Option<String>,
}

impl FromStr for RunAs {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let (user, group) = match fields.as_slice() {
            [user] => (*user, None),
            [user, group] => (*user, Some(*group)),
            _ => return Err(OptionParseError::field_count("run-as", s, "<user>[:<group>]")),
        };
        if user.is_empty() || group.is_some_and(str::is_empty) {
            return Err(OptionParseError::invalid("run-as", s, "user and group cannot be empty"));
        }
        Ok(Self {
            user: user.to_string(),
            group: group.map(str::to_string),
        })
    }
}

impl fmt::Display for RunAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}", self.user, group),
            None => write!(f, "{}", self.user),
        }
    }
}

/// Normalise a capability name to the runtime's `NET_ADMIN` form.
pub fn parse_capability(s: &str) -> Result<String, OptionParseError> {
    let name = s.trim();
    let name = name
        .strip_prefix("CAP_")
        .or_else(|| name.strip_prefix("cap_"))
        .unwrap_or(name);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OptionParseError::invalid("capability", s, "invalid capability name"));
    }
    Ok(name.to_ascii_uppercase())
}

/// `key=value`
pub fn parse_filter(s: &str) -> Result<(String, String), OptionParseError> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| OptionParseError::field_count("filter", s, "<key>=<value>"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(OptionParseError::invalid("filter", s, "filter key is empty"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
