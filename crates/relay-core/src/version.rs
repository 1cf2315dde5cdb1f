//! Protocol version parameters.
//!
//! Versions are dotted triples (`major.minor.revision`) encoded into a
//! single integer for comparison. The on-chain params carry target and
//! minimum versions for providers and consumers; providers outside their
//! accepted range are marked unhealthy by the prober.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TARGET_VERSION: &str = "0.33.3";
pub const MIN_VERSION: &str = "0.32.1";

pub const MAX_MINOR: u64 = 10_000;
pub const MAX_REVISION: u64 = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format: {0}")]
    InvalidFormat(String),
    #[error("version component out of range: {0}")]
    ComponentTooLarge(String),
    #[error("min version exceeds target version: {min} > {target}")]
    MinExceedsTarget { min: String, target: String },
    #[error("provider and consumer versions mismatch: {provider} != {consumer}")]
    ProviderConsumerMismatch { provider: String, consumer: String },
}

/// Encodes `major.minor.revision` as
/// `major * MAX_MINOR * MAX_REVISION + minor * MAX_REVISION + revision`.
/// Strings outside dotted-triple form are rejected.
pub fn version_to_integer(version: &str) -> Result<u64, VersionError> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(VersionError::InvalidFormat(version.to_string()));
    }
    let mut components = [0u64; 3];
    for (slot, part) in components.iter_mut().zip(&parts) {
        *slot = part
            .parse::<u64>()
            .map_err(|_| VersionError::InvalidFormat(version.to_string()))?;
    }
    let [major, minor, revision] = components;
    if minor > MAX_MINOR {
        return Err(VersionError::ComponentTooLarge(version.to_string()));
    }
    if revision > MAX_REVISION {
        return Err(VersionError::ComponentTooLarge(version.to_string()));
    }
    Ok(major * MAX_MINOR * MAX_REVISION + minor * MAX_REVISION + revision)
}

/// Protocol version params consumed from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionParams {
    pub provider_target: String,
    pub provider_min: String,
    pub consumer_target: String,
    pub consumer_min: String,
}

impl Default for VersionParams {
    fn default() -> Self {
        Self {
            provider_target: TARGET_VERSION.to_string(),
            provider_min: MIN_VERSION.to_string(),
            consumer_target: TARGET_VERSION.to_string(),
            consumer_min: MIN_VERSION.to_string(),
        }
    }
}

impl VersionParams {
    /// Validates the parameter set: every field is a well-formed version,
    /// min never exceeds target, and provider and consumer versions match.
    pub fn validate(&self) -> Result<(), VersionError> {
        let provider_target = version_to_integer(&self.provider_target)?;
        let provider_min = version_to_integer(&self.provider_min)?;
        let consumer_target = version_to_integer(&self.consumer_target)?;
        let consumer_min = version_to_integer(&self.consumer_min)?;

        if provider_min > provider_target {
            return Err(VersionError::MinExceedsTarget {
                min: self.provider_min.clone(),
                target: self.provider_target.clone(),
            });
        }
        if consumer_min > consumer_target {
            return Err(VersionError::MinExceedsTarget {
                min: self.consumer_min.clone(),
                target: self.consumer_target.clone(),
            });
        }
        if provider_target != consumer_target {
            return Err(VersionError::ProviderConsumerMismatch {
                provider: self.provider_target.clone(),
                consumer: self.consumer_target.clone(),
            });
        }
        if provider_min != consumer_min {
            return Err(VersionError::ProviderConsumerMismatch {
                provider: self.provider_min.clone(),
                consumer: self.consumer_min.clone(),
            });
        }
        Ok(())
    }

    /// Whether a provider's reported version falls inside the accepted
    /// `[provider_min, provider_target]` range. Malformed versions are
    /// rejected.
    pub fn provider_version_accepted(&self, version: &str) -> bool {
        let Ok(reported) = version_to_integer(version.trim_start_matches('v')) else {
            return false;
        };
        let Ok(min) = version_to_integer(&self.provider_min) else {
            return false;
        };
        let Ok(target) = version_to_integer(&self.provider_target) else {
            return false;
        };
        reported >= min && reported <= target
    }
}
