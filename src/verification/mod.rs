//! Paid deliverability verification and the cache in front of it.

pub mod reoon;
pub mod stage;

use crate::core::error::VerificationCallError;
use crate::core::models::VerificationStatus;

use async_trait::async_trait;

pub use reoon::ReoonVerifier;
pub use stage::{VerificationOutcome, VerificationStage};

/// Classifies one email address. Each call is metered by the provider.
#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify(&self, email: &str) -> Result<VerificationStatus, VerificationCallError>;
}
