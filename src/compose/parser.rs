//! Docker Compose manifest parser and validator.
//!
//! Validates the structural contract of a compose manifest: parseable YAML,
//! a v3 schema version, and a non-empty services section. Side-effect free;
//! the caller is responsible for reading the raw document.

use super::types::{ComposeFile, ManifestDescriptor};
use crate::error::{Result, StackdError};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Parser for docker-compose.yml manifests.
pub struct ComposeParser;

impl ComposeParser {
    /// Parse a compose manifest from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML is invalid
    /// - The compose version is not in the v3 family
    /// - The services section is missing or empty
    #[instrument(skip(content))]
    pub fn parse(content: &str) -> Result<ComposeFile> {
        let compose: ComposeFile = serde_yaml::from_str(content)
            .map_err(|e| StackdError::ComposeParse { reason: e.to_string() })?;

        Self::validate_version(&compose.version)?;
        Self::validate_services(&compose)?;

        debug!(services = compose.services.len(), "Parsed compose manifest");
        Ok(compose)
    }

    /// Parse and reduce a manifest to its validated descriptor.
    pub fn validate(content: &str) -> Result<ManifestDescriptor> {
        let compose = Self::parse(content)?;
        Ok(Self::describe(&compose))
    }

    /// Build the descriptor for an already-parsed manifest.
    pub fn describe(compose: &ComposeFile) -> ManifestDescriptor {
        let services: BTreeMap<String, u32> = compose
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.container_count()))
            .collect();

        let version =
            if compose.version.is_empty() { "3".to_string() } else { compose.version.clone() };

        ManifestDescriptor { version, services }
    }

    /// Validate that the compose version is in the supported v3 family.
    ///
    /// An absent version defaults to "3", matching docker-compose behavior.
    fn validate_version(version: &str) -> Result<()> {
        if version.is_empty() || version.starts_with('3') {
            Ok(())
        } else {
            Err(StackdError::UnsupportedComposeVersion { version: version.to_string() })
        }
    }

    /// Validate that at least one service is defined.
    fn validate_services(compose: &ComposeFile) -> Result<()> {
        if compose.services.is_empty() {
            return Err(StackdError::MissingServices);
        }
        Ok(())
    }
}
