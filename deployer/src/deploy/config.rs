//! Deploy request configuration

use std::collections::HashSet;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::engine::{BindMount, ContainerSpec, RegistryCredential, RestartPolicy};
use crate::errors::DeployerError;

/// Deploy request payload.
///
/// Fields are accepted lowercase or capitalised, and missing or `null`
/// fields fall back to their zero value; [`DeployConfig::validate`] decides
/// what is acceptable.
#[derive(Debug, Deserialize)]
pub struct DeployConfig {
    /// Registry principal
    #[serde(default, alias = "User", deserialize_with = "nullable")]
    pub user: String,

    /// Registry credential
    #[serde(default = "empty_secret", alias = "Token", deserialize_with = "secret")]
    pub token: SecretString,

    /// Container name, also the lookup key of the container being replaced
    #[serde(default, alias = "Name", deserialize_with = "nullable")]
    pub name: String,

    /// Image reference, may carry a tag or digest
    #[serde(default, alias = "Image", deserialize_with = "nullable")]
    pub image: String,

    /// Network to attach, empty for the daemon default
    #[serde(default, alias = "Network", deserialize_with = "nullable")]
    pub network: String,

    #[serde(default, alias = "Env")]
    pub env: EnvVars,

    #[serde(default, alias = "Volumes", deserialize_with = "nullable")]
    pub volumes: Vec<VolumeConfig>,

    #[serde(default, alias = "Tty", deserialize_with = "nullable")]
    pub tty: bool,
}

/// Host path bound into the container
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VolumeConfig {
    #[serde(default, alias = "Source", deserialize_with = "nullable")]
    pub source: String,

    #[serde(default, alias = "Target", deserialize_with = "nullable")]
    pub target: String,
}

/// Simplified form payload without env and volumes
#[derive(Debug, Default, Deserialize)]
pub struct FormDeployConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub network: String,
}

impl From<FormDeployConfig> for DeployConfig {
    fn from(form: FormDeployConfig) -> Self {
        Self {
            user: form.user,
            token: SecretString::from(form.token),
            name: form.name,
            image: form.image,
            network: form.network,
            env: EnvVars::default(),
            volumes: vec![],
            tty: false,
        }
    }
}

impl DeployConfig {
    /// Check the payload invariants before any engine call is made
    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.name.is_empty() {
            return Err(DeployerError::ValidationError(
                "name must not be empty".to_string(),
            ));
        }
        if self.image.is_empty() {
            return Err(DeployerError::ValidationError(
                "image must not be empty".to_string(),
            ));
        }
        if let Some(key) = self.env.duplicate_key() {
            return Err(DeployerError::ValidationError(format!(
                "duplicate env key: {}",
                key
            )));
        }
        for (idx, volume) in self.volumes.iter().enumerate() {
            if volume.source.is_empty() || volume.target.is_empty() {
                return Err(DeployerError::ValidationError(format!(
                    "volume {} needs both source and target",
                    idx
                )));
            }
        }
        Ok(())
    }

    /// Registry credential for the pull, `None` for an anonymous pull
    pub fn credential(&self) -> Option<RegistryCredential> {
        if self.user.is_empty() && self.token.expose_secret().is_empty() {
            return None;
        }
        Some(RegistryCredential {
            username: self.user.clone(),
            password: SecretString::from(self.token.expose_secret().to_string()),
        })
    }

    /// Engine spec of the replacement container
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            tty: self.tty,
            env: self.env.to_env_list(),
            mounts: self
                .volumes
                .iter()
                .map(|volume| BindMount {
                    source: volume.source.clone(),
                    target: volume.target.clone(),
                })
                .collect(),
            restart_policy: RestartPolicy::UnlessStopped,
            network: (!self.network.is_empty()).then(|| self.network.clone()),
        }
    }
}

/// Environment variables in the order they were received.
///
/// Duplicate keys survive decoding so validation can reject them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars(Vec<(String, String)>);

impl EnvVars {
    /// First key that appears more than once
    pub fn duplicate_key(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .map(|(key, _)| key.as_str())
            .find(|key| !seen.insert(*key))
    }

    /// `KEY=VALUE` entries as passed to the engine
    pub fn to_env_list(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }
}

impl<'de> Deserialize<'de> for EnvVars {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EnvVisitor;

        impl<'de> Visitor<'de> for EnvVisitor {
            type Value = EnvVars;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of environment variables")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(EnvVars::default())
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(EnvVars::default())
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserializer.deserialize_map(self)
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut vars = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    vars.push((key, value));
                }
                Ok(EnvVars(vars))
            }
        }

        deserializer.deserialize_option(EnvVisitor)
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(SecretString::from(value))
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}
