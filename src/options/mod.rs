// ABOUTME: Immutable option sets for start, update, and list calls.
// ABOUTME: Builders parse the one-line option formats and freeze into plain data.

mod mappings;
mod restart_policy;

pub use mappings::{
    DEFAULT_DEVICE_PERMISSIONS, DeviceMapping, EnvVar, PortMapping, RunAs, VolumeMount,
    parse_capability, parse_filter,
};
pub use restart_policy::RestartPolicy;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A malformed option string, rejected before any request is dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OptionParseError {
    #[error("invalid {kind} {value:?}: expected format {expected}")]
    FieldCount {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid {kind} {value:?}: {reason}")]
    Invalid {
        kind: &'static str,
        value: String,
        reason: String,
    },
}

impl OptionParseError {
    pub(crate) fn field_count(kind: &'static str, value: &str, expected: &'static str) -> Self {
        OptionParseError::FieldCount {
            kind,
            value: value.to_string(),
            expected,
        }
    }

    pub(crate) fn invalid(kind: &'static str, value: &str, reason: impl Into<String>) -> Self {
        OptionParseError::Invalid {
            kind,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

fn parse_all<T, I, S>(values: I) -> Result<Vec<T>, OptionParseError>
where
    T: std::str::FromStr<Err = OptionParseError>,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values.into_iter().map(|v| v.as_ref().parse()).collect()
}

/// Capabilities added to and dropped from the runtime's default set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

/// Resolved configuration for a start or update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    env: Vec<EnvVar>,
    ports: Vec<PortMapping>,
    volumes: Vec<VolumeMount>,
    devices: Vec<DeviceMapping>,
    network: Option<String>,
    run_as: Option<RunAs>,
    restart_policy: Option<RestartPolicy>,
    capabilities: Capabilities,
}

impl StartOptions {
    pub fn builder() -> StartOptionsBuilder {
        StartOptionsBuilder::default()
    }

    /// Parse the string form carried on the wire.
    pub fn from_raw(raw: &RawStartOptions) -> Result<Self, OptionParseError> {
        let mut builder = Self::builder()
            .env(&raw.env)?
            .ports(&raw.ports)?
            .volumes(&raw.volumes)?
            .devices(&raw.devices)?
            .capabilities(&raw.cap_add, &raw.cap_drop)?;
        if let Some(network) = raw.network.as_deref() {
            builder = builder.network(network);
        }
        if let Some(run_as) = raw.run_as.as_deref() {
            builder = builder.run_as(run_as)?;
        }
        if let Some(policy) = raw.restart_policy.as_deref() {
            builder = builder.restart_policy(policy)?;
        }
        Ok(builder.build())
    }

    /// Render back into the wire string form.
    pub fn to_raw(&self) -> RawStartOptions {
        RawStartOptions {
            env: self.env.iter().map(ToString::to_string).collect(),
            ports: self.ports.iter().map(ToString::to_string).collect(),
            volumes: self.volumes.iter().map(ToString::to_string).collect(),
            devices: self.devices.iter().map(ToString::to_string).collect(),
            network: self.network.clone(),
            run_as: self.run_as.as_ref().map(ToString::to_string),
            restart_policy: self.restart_policy.map(|p| p.to_string()),
            cap_add: self.capabilities.add.clone(),
            cap_drop: self.capabilities.drop.clone(),
        }
    }

    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    pub fn ports(&self) -> &[PortMapping] {
        &self.ports
    }

    pub fn volumes(&self) -> &[VolumeMount] {
        &self.volumes
    }

    pub fn devices(&self) -> &[DeviceMapping] {
        &self.devices
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn run_as(&self) -> Option<&RunAs> {
        self.run_as.as_ref()
    }

    pub fn restart_policy(&self) -> Option<RestartPolicy> {
        self.restart_policy
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

/// Staging area for [`StartOptions`].
///
/// Every setter replaces the field it targets. List setters never append to a
/// previous call's list.
#[derive(Debug, Clone, Default)]
#[must_use = "builders do nothing until `build` is called"]
pub struct StartOptionsBuilder {
    options: StartOptions,
}

impl StartOptionsBuilder {
    pub fn env<I, S>(mut self, vars: I) -> Result<Self, OptionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.options.env = parse_all(vars)?;
        Ok(self)
    }

    pub fn ports<I, S>(mut self, ports: I) -> Result<Self, OptionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.options.ports = parse_all(ports)?;
        Ok(self)
    }

    pub fn volumes<I, S>(mut self, volumes: I) -> Result<Self, OptionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.options.volumes = parse_all(volumes)?;
        Ok(self)
    }

    pub fn devices<I, S>(mut self, devices: I) -> Result<Self, OptionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.options.devices = parse_all(devices)?;
        Ok(self)
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        let network = network.into();
        self.options.network = (!network.trim().is_empty()).then_some(network);
        self
    }

    pub fn run_as(mut self, run_as: &str) -> Result<Self, OptionParseError> {
        self.options.run_as = Some(run_as.parse()?);
        Ok(self)
    }

    pub fn restart_policy(mut self, policy: &str) -> Result<Self, OptionParseError> {
        self.options.restart_policy = Some(policy.parse()?);
        Ok(self)
    }

    pub fn capabilities<A, D, S, T>(mut self, add: A, drop: D) -> Result<Self, OptionParseError>
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.options.capabilities = Capabilities {
            add: add
                .into_iter()
                .map(|c| parse_capability(c.as_ref()))
                .collect::<Result<_, _>>()?,
            drop: drop
                .into_iter()
                .map(|c| parse_capability(c.as_ref()))
                .collect::<Result<_, _>>()?,
        };
        Ok(self)
    }

    pub fn build(self) -> StartOptions {
        self.options
    }
}

/// Wire form of [`StartOptions`]: repeated one-line strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStartOptions {
    pub env: Vec<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub devices: Vec<String>,
    pub network: Option<String>,
    pub run_as: Option<String>,
    pub restart_policy: Option<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
}

/// Filters keyed by name, each holding one or more accepted values.
pub type Filters = BTreeMap<String, Vec<String>>;

/// Resolved configuration for a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    filters: Filters,
    limit: Option<usize>,
    all: bool,
}

impl ListOptions {
    pub fn builder() -> ListOptionsBuilder {
        ListOptionsBuilder::default()
    }

    pub fn from_raw(raw: &RawListOptions) -> Result<Self, OptionParseError> {
        let mut builder = Self::builder().filters(&raw.filters)?.all(raw.all);
        if let Some(limit) = raw.limit {
            builder = builder.limit(limit as usize);
        }
        Ok(builder.build())
    }

    pub fn to_raw(&self) -> RawListOptions {
        RawListOptions {
            filters: self
                .filters
                .iter()
                .flat_map(|(k, values)| values.iter().map(move |v| format!("{k}={v}")))
                .collect(),
            limit: self.limit.map(|l| u32::try_from(l).unwrap_or(u32::MAX)),
            all: self.all,
        }
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Maximum rows to return; `None` means no limit.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Include stopped containers / intermediate images.
    pub fn all(&self) -> bool {
        self.all
    }
}

#[derive(Debug, Clone, Default)]
#[must_use = "builders do nothing until `build` is called"]
pub struct ListOptionsBuilder {
    options: ListOptions,
}

impl ListOptionsBuilder {
    /// Replace the filter set. Repeated keys within one call accumulate values.
    pub fn filters<I, S>(mut self, filters: I) -> Result<Self, OptionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Filters::new();
        for filter in filters {
            let (key, value) = parse_filter(filter.as_ref())?;
            parsed.entry(key).or_default().push(value);
        }
        self.options.filters = parsed;
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn all(mut self, all: bool) -> Self {
        self.options.all = all;
        self
    }

    pub fn build(self) -> ListOptions {
        self.options
    }
}

/// Wire form of [`ListOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawListOptions {
    pub filters: Vec<String>,
    pub limit: Option<u32>,
    pub all: bool,
}
