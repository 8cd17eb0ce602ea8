pub mod error;
pub mod fhir;
pub mod fhir_reference;
pub mod reference;

pub use error::{CoreError, ErrorCategory, Result};
pub use fhir::{ResourceType, is_known_resource_type, resource_id_of, resource_type_of};
pub use fhir_reference::{ConditionalReference, FhirReference, parse_conditional, parse_literal};
pub use reference::{
    Identifier, Reference, ReferenceType, ReferenceValue, ResourceReference,
};
