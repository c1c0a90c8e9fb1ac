//! Resolves an HSM provider identifier to a concrete [`HsmProvider`].
//!
//! Mirrors `KmsFactory::create` (`services/token/src/kms/mod.rs`): a single
//! match on a provider enum, returning a boxed trait object.

use std::sync::Arc;

use crate::hsm::aws::{AwsCloudHsmProvider, AwsHsmConfig};
use crate::hsm::provider::HsmProvider;
use crate::hsm::simulator::SoftwareSimulator;

/// Which backend an HSM provider identifier resolves to.
#[derive(Debug, Clone)]
pub enum HsmProviderKind {
    /// In-process software simulator, for development and tests.
    Software,
    /// AWS CloudHSM.
    AwsCloudHsm(AwsHsmConfig),
}

/// Builds the configured [`HsmProvider`] implementation.
pub struct HsmFactory;

impl HsmFactory {
    /// Construct a provider for the given kind.
    #[must_use]
    pub fn create(kind: &HsmProviderKind) -> Arc<dyn HsmProvider> {
        match kind {
            HsmProviderKind::Software => Arc::new(SoftwareSimulator::new()),
            HsmProviderKind::AwsCloudHsm(config) => {
                Arc::new(AwsCloudHsmProvider::new(config.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_software_provider() {
        let provider = HsmFactory::create(&HsmProviderKind::Software);
        assert!(provider.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_creates_aws_provider() {
        let provider = HsmFactory::create(&HsmProviderKind::AwsCloudHsm(AwsHsmConfig::default()));
        assert!(provider.health_check().await.is_err());
    }
}
