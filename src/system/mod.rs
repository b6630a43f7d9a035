//! System module: external tool discovery and post-build verification.

pub mod paths;
pub mod verification;

pub use paths::{BundledToolLocator, FixedToolLocator, Tool, ToolLocator};
pub use verification::{VerificationStatus, Verifier};
