// ABOUTME: Container restart policy option.
// ABOUTME: Parses policy[:max_attempts] for always, on-failure, unless-stopped, and none.

use super::OptionParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure {
        max_attempts: Option<u32>,
    },
}

impl FromStr for RestartPolicy {
    type Err = OptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| OptionParseError::invalid("restart policy", s, reason);

        let mut fields = s.trim().split(':');
        let policy = fields.next().unwrap_or_default();
        let attempts = fields.next();
        if fields.next().is_some() {
            return Err(OptionParseError::field_count(
                "restart policy",
                s,
                "<policy>[:<max_attempts>]",
            ));
        }

        let attempts = attempts
            .map(|a| {
                a.parse::<u32>()
                    .map_err(|_| invalid(format!("invalid max attempts: {a}")))
            })
            .transpose()?;

        match (policy, attempts) {
            ("no" | "none", None) => Ok(RestartPolicy::No),
            ("always", None) => Ok(RestartPolicy::Always),
            ("unless-stopped", None) => Ok(RestartPolicy::UnlessStopped),
            ("on-failure", max_attempts) => Ok(RestartPolicy::OnFailure { max_attempts }),
            ("no" | "none" | "always" | "unless-stopped", Some(_)) => Err(invalid(format!(
                "policy {policy} does not accept a maximum number of attempts"
            ))),
            _ => Err(invalid(format!("unknown restart policy: {policy}"))),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "none"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
            RestartPolicy::OnFailure { max_attempts: None } => write!(f, "on-failure"),
            RestartPolicy::OnFailure {
                max_attempts: Some(n),
            } => write!(f, "on-failure:{n}"),
        }
    }
}

impl TryFrom<String> for RestartPolicy {
    type Error = OptionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RestartPolicy> for String {
    fn from(policy: RestartPolicy) -> Self {
        policy.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_policies() {
        assert_eq!("always".parse::<RestartPolicy>().unwrap(), RestartPolicy::Always);
        assert_eq!("none".parse::<RestartPolicy>().unwrap(), RestartPolicy::No);
        assert_eq!(
            "unless-stopped".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::UnlessStopped
        );
        assert_eq!(
            "on-failure:5".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure {
                max_attempts: Some(5)
            }
        );
    }

    #[test]
    fn rejects_attempts_on_other_policies() {
        assert!("always:3".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn rejects_extra_fields_and_garbage() {
        assert!("on-failure:3:4".parse::<RestartPolicy>().is_err());
        assert!("on-failure:x".parse::<RestartPolicy>().is_err());
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["none", "always", "unless-stopped", "on-failure", "on-failure:2"] {
            assert_eq!(s.parse::<RestartPolicy>().unwrap().to_string(), s);
        }
    }
}
