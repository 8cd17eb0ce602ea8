//! Reference location, cleaning and resolution.

pub mod cleaner;
pub mod error;
pub mod locator;
pub mod remote;
pub mod resolver;

pub use cleaner::{clean_literal_references, clean_reference_resources_if_bundle};
pub use error::{ErrorCategory, ResolveError};
pub use locator::locate;
pub use remote::{HttpRemoteReferenceChecker, RemoteCheckerConfig, RemoteReferenceChecker};
pub use resolver::{ReferenceResolver, Resolution, ResolvedResource, apply_resolution};
