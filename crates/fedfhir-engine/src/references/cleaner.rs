//! Reference normalization applied to resources read from or imported into the store.
//!
//! Both passes return a cleaned copy and are idempotent.

use fedfhir_core::{ReferenceValue, resource_type_of};
use serde_json::Value;

use super::locator;

/// Drops the literal `reference` string of every reference that also carries
/// an identifier. Bundles are cleaned entry by entry, recursing into nested bundles.
pub fn clean_literal_references(resource: &Value) -> Value {
    let mut cleaned = resource.clone();
    clean_literal_in_place(&mut cleaned);
    cleaned
}

/// Strips resources embedded in `reference.resource` from every entry of a bundle.
///
/// Non-bundle input is returned unchanged.
pub fn clean_reference_resources_if_bundle(resource: &Value) -> Value {
    let mut cleaned = resource.clone();
    if is_bundle(&cleaned) {
        for entry_resource in entry_resources_mut(&mut cleaned) {
            strip_embedded_in_place(entry_resource);
        }
    }
    cleaned
}

fn clean_literal_in_place(resource: &mut Value) {
    if is_bundle(resource) {
        for entry_resource in entry_resources_mut(resource) {
            clean_literal_in_place(entry_resource);
        }
        return;
    }

    let pointers: Vec<String> = locator::locate(resource)
        .into_iter()
        .filter(|occurrence| match &occurrence.value {
            ReferenceValue::Reference(r) => r.reference.is_some() && r.identifier.is_some(),
            _ => false,
        })
        .map(|occurrence| occurrence.pointer)
        .collect();

    for pointer in pointers {
        if let Some(element) = resource.pointer_mut(&pointer).and_then(Value::as_object_mut) {
            element.remove("reference");
        }
    }
}

fn strip_embedded_in_place(resource: &mut Value) {
    if is_bundle(resource) {
        for entry_resource in entry_resources_mut(resource) {
            strip_embedded_in_place(entry_resource);
        }
        return;
    }

    let pointers: Vec<String> = locator::locate(resource)
        .into_iter()
        .filter(|occurrence| matches!(occurrence.value, ReferenceValue::Reference(_)))
        .map(|occurrence| occurrence.pointer)
        .collect();

    for pointer in pointers {
        if let Some(element) = resource.pointer_mut(&pointer).and_then(Value::as_object_mut) {
            element.remove("resource");
        }
    }
}

fn is_bundle(resource: &Value) -> bool {
    resource_type_of(resource) == Some("Bundle")
}

fn entry_resources_mut(bundle: &mut Value) -> impl Iterator<Item = &mut Value> {
    bundle
        .get_mut("entry")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get_mut("resource"))
}
