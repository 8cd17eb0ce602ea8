//! Enumerates the references embedded in a resource.
//!
//! Each supported resource type has a static table of reference-bearing
//! element paths. Arrays are flattened at every step of a path, so
//! `group.population.subjectResults` yields one occurrence per population of
//! every group. Every occurrence carries the JSON pointer of its element.

use fedfhir_core::{Reference, ReferenceValue, ResourceReference, resource_type_of};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Reference,
    RelatedArtifact,
    Attachment,
    /// `extension[*].valueReference` below each element at the path
    Extensions,
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    label: &'static str,
    path: &'static [&'static str],
    targets: &'static [&'static str],
    kind: FieldKind,
}

const fn reference(
    label: &'static str,
    path: &'static [&'static str],
    targets: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        label,
        path,
        targets,
        kind: FieldKind::Reference,
    }
}

const fn related_artifact(label: &'static str) -> FieldSpec {
    FieldSpec {
        label,
        path: &["relatedArtifact"],
        targets: &[],
        kind: FieldKind::RelatedArtifact,
    }
}

const fn attachment(label: &'static str, path: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        label,
        path,
        targets: &[],
        kind: FieldKind::Attachment,
    }
}

const fn extensions_of(label: &'static str, path: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        label,
        path,
        targets: &[],
        kind: FieldKind::Extensions,
    }
}

const AGENT_TARGETS: &[&str] = &[
    "Practitioner",
    "PractitionerRole",
    "RelatedPerson",
    "Patient",
    "Device",
    "Organization",
];

const REQUESTER_TARGETS: &[&str] = &[
    "Device",
    "Organization",
    "Patient",
    "Practitioner",
    "PractitionerRole",
    "RelatedPerson",
];

const ACTIVITY_DEFINITION: &[FieldSpec] = &[
    reference("ActivityDefinition.subjectReference", &["subjectReference"], &["Group"]),
    reference("ActivityDefinition.location", &["location"], &["Location"]),
    reference(
        "ActivityDefinition.productReference",
        &["productReference"],
        &["Medication", "Substance"],
    ),
    reference(
        "ActivityDefinition.specimenRequirement",
        &["specimenRequirement"],
        &["SpecimenDefinition"],
    ),
    reference(
        "ActivityDefinition.observationRequirement",
        &["observationRequirement"],
        &["ObservationDefinition"],
    ),
    reference(
        "ActivityDefinition.observationResultRequirement",
        &["observationResultRequirement"],
        &["ObservationDefinition"],
    ),
    related_artifact("ActivityDefinition.relatedArtifact"),
];

const BINARY: &[FieldSpec] = &[reference("Binary.securityContext", &["securityContext"], &[])];

const DOCUMENT_REFERENCE: &[FieldSpec] = &[
    reference(
        "DocumentReference.subject",
        &["subject"],
        &["Patient", "Practitioner", "Group", "Device"],
    ),
    reference(
        "DocumentReference.author",
        &["author"],
        &[
            "Practitioner",
            "PractitionerRole",
            "Organization",
            "Device",
            "Patient",
            "RelatedPerson",
        ],
    ),
    reference(
        "DocumentReference.authenticator",
        &["authenticator"],
        &["Practitioner", "PractitionerRole", "Organization"],
    ),
    reference("DocumentReference.custodian", &["custodian"], &["Organization"]),
    reference(
        "DocumentReference.relatesTo.target",
        &["relatesTo", "target"],
        &["DocumentReference"],
    ),
    reference(
        "DocumentReference.context.encounter",
        &["context", "encounter"],
        &["Encounter", "EpisodeOfCare"],
    ),
    reference(
        "DocumentReference.context.sourcePatientInfo",
        &["context", "sourcePatientInfo"],
        &["Patient"],
    ),
    reference("DocumentReference.context.related", &["context", "related"], &[]),
    attachment("DocumentReference.content.attachment", &["content", "attachment"]),
];

const ENDPOINT: &[FieldSpec] = &[reference(
    "Endpoint.managingOrganization",
    &["managingOrganization"],
    &["Organization"],
)];

const GROUP: &[FieldSpec] = &[
    reference(
        "Group.managingEntity",
        &["managingEntity"],
        &["Organization", "RelatedPerson", "Practitioner", "PractitionerRole"],
    ),
    reference(
        "Group.member.entity",
        &["member", "entity"],
        &[
            "Patient",
            "Practitioner",
            "PractitionerRole",
            "Device",
            "Medication",
            "Substance",
            "Group",
        ],
    ),
];

const HEALTHCARE_SERVICE: &[FieldSpec] = &[
    reference("HealthcareService.providedBy", &["providedBy"], &["Organization"]),
    reference("HealthcareService.location", &["location"], &["Location"]),
    reference("HealthcareService.coverageArea", &["coverageArea"], &["Location"]),
    reference("HealthcareService.endpoint", &["endpoint"], &["Endpoint"]),
];

const LIBRARY: &[FieldSpec] = &[
    reference("Library.subject", &["subjectReference"], &["Group"]),
    related_artifact("Library.relatedArtifact"),
    attachment("Library.content", &["content"]),
];

const LOCATION: &[FieldSpec] = &[
    reference(
        "Location.managingOrganization",
        &["managingOrganization"],
        &["Organization"],
    ),
    reference("Location.partOf", &["partOf"], &["Location"]),
    reference("Location.endpoint", &["endpoint"], &["Endpoint"]),
];

const MEASURE: &[FieldSpec] = &[
    reference("Measure.subject", &["subjectReference"], &["Group"]),
    related_artifact("Measure.relatedArtifact"),
];

const MEASURE_REPORT: &[FieldSpec] = &[
    reference(
        "MeasureReport.subject",
        &["subject"],
        &[
            "Patient",
            "Practitioner",
            "PractitionerRole",
            "Location",
            "Device",
            "RelatedPerson",
            "Group",
        ],
    ),
    reference(
        "MeasureReport.reporter",
        &["reporter"],
        &["Practitioner", "PractitionerRole", "Location", "Organization"],
    ),
    reference(
        "MeasureReport.group.population.subjectResults",
        &["group", "population", "subjectResults"],
        &["List"],
    ),
    reference(
        "MeasureReport.group.stratifier.stratum.population.subjectResults",
        &["group", "stratifier", "stratum", "population", "subjectResults"],
        &["List"],
    ),
    reference("MeasureReport.evaluatedResource", &["evaluatedResource"], &[]),
];

const ORGANIZATION: &[FieldSpec] = &[
    reference("Organization.partOf", &["partOf"], &["Organization"]),
    reference("Organization.endpoint", &["endpoint"], &["Endpoint"]),
];

const ORGANIZATION_AFFILIATION: &[FieldSpec] = &[
    reference(
        "OrganizationAffiliation.organization",
        &["organization"],
        &["Organization"],
    ),
    reference(
        "OrganizationAffiliation.participatingOrganization",
        &["participatingOrganization"],
        &["Organization"],
    ),
    reference("OrganizationAffiliation.network", &["network"], &["Organization"]),
    reference("OrganizationAffiliation.location", &["location"], &["Location"]),
    reference(
        "OrganizationAffiliation.healthcareService",
        &["healthcareService"],
        &["HealthcareService"],
    ),
    reference("OrganizationAffiliation.endpoint", &["endpoint"], &["Endpoint"]),
];

const PATIENT: &[FieldSpec] = &[
    reference(
        "Patient.contact.organization",
        &["contact", "organization"],
        &["Organization"],
    ),
    reference(
        "Patient.generalPractitioner",
        &["generalPractitioner"],
        &["Organization", "Practitioner", "PractitionerRole"],
    ),
    reference(
        "Patient.managingOrganization",
        &["managingOrganization"],
        &["Organization"],
    ),
    reference(
        "Patient.link.other",
        &["link", "other"],
        &["Patient", "RelatedPerson"],
    ),
];

const PRACTITIONER: &[FieldSpec] = &[reference(
    "Practitioner.qualification.issuer",
    &["qualification", "issuer"],
    &["Organization"],
)];

const PRACTITIONER_ROLE: &[FieldSpec] = &[
    reference("PractitionerRole.practitioner", &["practitioner"], &["Practitioner"]),
    reference("PractitionerRole.organization", &["organization"], &["Organization"]),
    reference("PractitionerRole.location", &["location"], &["Location"]),
    reference(
        "PractitionerRole.healthcareService",
        &["healthcareService"],
        &["HealthcareService"],
    ),
    reference("PractitionerRole.endpoint", &["endpoint"], &["Endpoint"]),
];

const PROVENANCE: &[FieldSpec] = &[
    reference("Provenance.target", &["target"], &[]),
    reference("Provenance.location", &["location"], &["Location"]),
    reference("Provenance.agent.who", &["agent", "who"], AGENT_TARGETS),
    reference("Provenance.agent.onBehalfOf", &["agent", "onBehalfOf"], AGENT_TARGETS),
    reference("Provenance.entity.what", &["entity", "what"], &[]),
];

const QUESTIONNAIRE: &[FieldSpec] = &[
    reference(
        "Questionnaire.item.enableWhen.answerReference",
        &["item", "enableWhen", "answerReference"],
        &[],
    ),
    reference(
        "Questionnaire.item.answerOption.valueReference",
        &["item", "answerOption", "valueReference"],
        &[],
    ),
    reference(
        "Questionnaire.item.initial.valueReference",
        &["item", "initial", "valueReference"],
        &[],
    ),
];

const QUESTIONNAIRE_RESPONSE: &[FieldSpec] = &[
    reference("QuestionnaireResponse.author", &["author"], REQUESTER_TARGETS),
    reference(
        "QuestionnaireResponse.basedOn",
        &["basedOn"],
        &["CarePlan", "ServiceRequest"],
    ),
    reference("QuestionnaireResponse.encounter", &["encounter"], &["Encounter"]),
    reference(
        "QuestionnaireResponse.partOf",
        &["partOf"],
        &["Observation", "Procedure"],
    ),
    reference(
        "QuestionnaireResponse.source",
        &["source"],
        &["Patient", "Practitioner", "PractitionerRole", "RelatedPerson"],
    ),
    reference("QuestionnaireResponse.subject", &["subject"], &[]),
];

const RESEARCH_STUDY: &[FieldSpec] = &[
    reference("ResearchStudy.protocol", &["protocol"], &["PlanDefinition"]),
    reference("ResearchStudy.partOf", &["partOf"], &["ResearchStudy"]),
    reference("ResearchStudy.enrollment", &["enrollment"], &["Group"]),
    reference("ResearchStudy.sponsor", &["sponsor"], &["Organization"]),
    reference(
        "ResearchStudy.principalInvestigator",
        &["principalInvestigator"],
        &["Practitioner", "PractitionerRole"],
    ),
    reference("ResearchStudy.site", &["site"], &["Location"]),
    related_artifact("ResearchStudy.relatedArtifact"),
];

const TASK: &[FieldSpec] = &[
    reference("Task.basedOn", &["basedOn"], &[]),
    reference("Task.partOf", &["partOf"], &["Task"]),
    reference("Task.focus", &["focus"], &[]),
    reference("Task.for", &["for"], &[]),
    reference("Task.encounter", &["encounter"], &["Encounter"]),
    reference("Task.requester", &["requester"], REQUESTER_TARGETS),
    reference(
        "Task.owner",
        &["owner"],
        &[
            "Practitioner",
            "PractitionerRole",
            "Organization",
            "CareTeam",
            "HealthcareService",
            "Patient",
            "Device",
            "RelatedPerson",
        ],
    ),
    reference("Task.location", &["location"], &["Location"]),
    reference("Task.reasonReference", &["reasonReference"], &[]),
    reference("Task.insurance", &["insurance"], &["Coverage", "ClaimResponse"]),
    reference("Task.relevantHistory", &["relevantHistory"], &["Provenance"]),
    reference(
        "Task.restriction.recipient",
        &["restriction", "recipient"],
        &[
            "Patient",
            "Practitioner",
            "PractitionerRole",
            "RelatedPerson",
            "Group",
            "Organization",
        ],
    ),
    reference("Task.input", &["input", "valueReference"], &[]),
    extensions_of("Task.input.extension", &["input"]),
    reference("Task.output", &["output", "valueReference"], &[]),
    extensions_of("Task.output.extension", &["output"]),
];

/// Field table and whether the type carries domain-resource extensions.
fn fields_for(resource_type: &str) -> Option<(&'static [FieldSpec], bool)> {
    let fields: &'static [FieldSpec] = match resource_type {
        "ActivityDefinition" => ACTIVITY_DEFINITION,
        "Binary" => return Some((BINARY, false)),
        "CodeSystem" | "NamingSystem" | "OperationOutcome" | "StructureDefinition"
        | "Subscription" | "ValueSet" => &[],
        "DocumentReference" => DOCUMENT_REFERENCE,
        "Endpoint" => ENDPOINT,
        "Group" => GROUP,
        "HealthcareService" => HEALTHCARE_SERVICE,
        "Library" => LIBRARY,
        "Location" => LOCATION,
        "Measure" => MEASURE,
        "MeasureReport" => MEASURE_REPORT,
        "Organization" => ORGANIZATION,
        "OrganizationAffiliation" => ORGANIZATION_AFFILIATION,
        "Patient" => PATIENT,
        "Practitioner" => PRACTITIONER,
        "PractitionerRole" => PRACTITIONER_ROLE,
        "Provenance" => PROVENANCE,
        "Questionnaire" => QUESTIONNAIRE,
        "QuestionnaireResponse" => QUESTIONNAIRE_RESPONSE,
        "ResearchStudy" => RESEARCH_STUDY,
        "Task" => TASK,
        _ => return None,
    };
    Some((fields, true))
}

fn is_domain_resource(resource_type: &str) -> bool {
    !matches!(resource_type, "Bundle" | "Binary" | "Parameters")
}

/// Returns every reference, related-artifact URL and attachment URL in `resource`.
///
/// Unsupported domain resources yield only their extension references. Bundles,
/// Parameters and values without `resourceType` yield nothing.
pub fn locate(resource: &Value) -> Vec<ResourceReference> {
    let Some(resource_type) = resource_type_of(resource) else {
        return Vec::new();
    };

    let (fields, with_extensions) = match fields_for(resource_type) {
        Some(spec) => spec,
        None => {
            tracing::debug!(
                resource_type = %resource_type,
                "Resource type not supported by reference locator, checking extensions only"
            );
            (&[][..], is_domain_resource(resource_type))
        }
    };

    let mut found = Vec::new();
    for field in fields {
        locate_field(resource, field, &mut found);
    }
    if with_extensions {
        let label = format!("{resource_type}.extension");
        locate_extensions(resource, "", &label, &mut found);
    }
    found
}

fn locate_field(resource: &Value, field: &FieldSpec, found: &mut Vec<ResourceReference>) {
    let mut elements = Vec::new();
    collect(resource, field.path, String::new(), &mut elements);

    for (pointer, element) in elements {
        if field.kind == FieldKind::Extensions {
            locate_extensions(element, &pointer, field.label, found);
            continue;
        }
        if let Some(value) = read_value(field.kind, element) {
            found.push(ResourceReference::new(
                field.label,
                pointer,
                value,
                field.targets.iter().map(|t| (*t).to_string()).collect(),
            ));
        }
    }
}

/// Walks `extension[*].valueReference` below `element`, recursing into
/// nested extensions with `.extension` appended to the label.
fn locate_extensions(
    element: &Value,
    pointer: &str,
    label: &str,
    found: &mut Vec<ResourceReference>,
) {
    let Some(extensions) = element.get("extension").and_then(Value::as_array) else {
        return;
    };

    for (index, extension) in extensions.iter().enumerate() {
        let ext_pointer = format!("{pointer}/extension/{index}");
        if let Some(value) = extension
            .get("valueReference")
            .and_then(|v| read_value(FieldKind::Reference, v))
        {
            found.push(ResourceReference::new(
                label,
                format!("{ext_pointer}/valueReference"),
                value,
                Vec::new(),
            ));
        }
        locate_extensions(extension, &ext_pointer, &format!("{label}.extension"), found);
    }
}

fn collect<'a>(value: &'a Value, path: &[&str], pointer: String, out: &mut Vec<(String, &'a Value)>) {
    if let Value::Array(items) = value {
        for (index, item) in items.iter().enumerate() {
            collect(item, path, format!("{pointer}/{index}"), out);
        }
        return;
    }

    match path.split_first() {
        None => out.push((pointer, value)),
        Some((head, rest)) => {
            if let Some(child) = value.get(*head) {
                collect(child, rest, format!("{pointer}/{}", escape_pointer(head)), out);
            }
        }
    }
}

fn read_value(kind: FieldKind, element: &Value) -> Option<ReferenceValue> {
    if !element.is_object() {
        return None;
    }
    match kind {
        FieldKind::Reference => {
            let reference: Reference = serde_json::from_value(element.clone()).ok()?;
            (reference.reference.is_some() || reference.identifier.is_some())
                .then_some(ReferenceValue::Reference(reference))
        }
        FieldKind::RelatedArtifact => url_of(element).map(|url| ReferenceValue::RelatedArtifact {
            url: Some(url),
        }),
        FieldKind::Attachment => {
            url_of(element).map(|url| ReferenceValue::Attachment { url: Some(url) })
        }
        FieldKind::Extensions => None,
    }
}

fn url_of(element: &Value) -> Option<String> {
    element.get("url").and_then(Value::as_str).map(String::from)
}

/// RFC 6901 escaping of a single pointer token.
pub(crate) fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedfhir_core::fhir::known_resource_types;
    use serde_json::json;

    fn labels(found: &[ResourceReference]) -> Vec<&str> {
        found.iter().map(|r| r.location.as_str()).collect()
    }

    #[test]
    fn test_patient_references() {
        let patient = json!({
            "resourceType": "Patient",
            "generalPractitioner": [
                {"reference": "Practitioner/p1"},
                {"reference": "Organization/o1"}
            ],
            "managingOrganization": {"reference": "Organization/o2"},
            "contact": [{"organization": {"identifier": {"system": "http://sys", "value": "1"}}}],
            "link": [{"other": {"reference": "Patient/p2"}, "type": "seealso"}]
        });

        let found = locate(&patient);
        assert_eq!(
            labels(&found),
            vec![
                "Patient.contact.organization",
                "Patient.generalPractitioner",
                "Patient.generalPractitioner",
                "Patient.managingOrganization",
                "Patient.link.other",
            ]
        );
        assert_eq!(found[1].pointer, "/generalPractitioner/0");
        assert_eq!(found[2].pointer, "/generalPractitioner/1");
        assert_eq!(found[0].pointer, "/contact/0/organization");
        assert_eq!(
            found[1].allowed_target_types,
            vec!["Organization", "Practitioner", "PractitionerRole"]
        );
    }

    #[test]
    fn test_pointer_resolves_to_element() {
        let report = json!({
            "resourceType": "MeasureReport",
            "group": [
                {"population": [
                    {"subjectResults": {"reference": "List/l1"}},
                    {"subjectResults": {"reference": "List/l2"}}
                ]},
                {"stratifier": [{"stratum": [{"population": [
                    {"subjectResults": {"reference": "List/l3"}}
                ]}]}]}
            ]
        });

        let found = locate(&report);
        assert_eq!(found.len(), 3);
        for occurrence in &found {
            let element = report.pointer(&occurrence.pointer).unwrap();
            let reference = occurrence.reference().unwrap().reference.as_deref();
            assert_eq!(element["reference"].as_str(), reference);
            assert_eq!(occurrence.allowed_target_types, vec!["List"]);
        }
        assert_eq!(
            found[2].location,
            "MeasureReport.group.stratifier.stratum.population.subjectResults"
        );
    }

    #[test]
    fn test_extensions_are_walked_recursively() {
        let organization = json!({
            "resourceType": "Organization",
            "extension": [{
                "url": "http://example.org/ext/outer",
                "valueReference": {"reference": "Endpoint/e1"},
                "extension": [{
                    "url": "inner",
                    "valueReference": {"reference": "Organization/o2"}
                }]
            }]
        });

        let found = locate(&organization);
        assert_eq!(
            labels(&found),
            vec!["Organization.extension", "Organization.extension.extension"]
        );
        assert_eq!(found[0].pointer, "/extension/0/valueReference");
        assert_eq!(found[1].pointer, "/extension/0/extension/0/valueReference");
    }

    #[test]
    fn test_task_input_output_and_their_extensions() {
        let task = json!({
            "resourceType": "Task",
            "for": {"reference": "Patient/p1"},
            "input": [{
                "type": {"text": "x"},
                "valueReference": {"reference": "DocumentReference/d1"},
                "extension": [{"url": "u", "valueReference": {"reference": "Organization/o1"}}]
            }, {
                "type": {"text": "y"},
                "valueString": "no reference"
            }],
            "output": [{"valueReference": {"reference": "Binary/b1"}}]
        });

        let found = locate(&task);
        assert_eq!(
            labels(&found),
            vec!["Task.for", "Task.input", "Task.input.extension", "Task.output"]
        );
        assert_eq!(found[2].pointer, "/input/0/extension/0/valueReference");
    }

    #[test]
    fn test_related_artifacts_and_attachments() {
        let library = json!({
            "resourceType": "Library",
            "subjectReference": {"reference": "Group/g1"},
            "relatedArtifact": [
                {"type": "depends-on", "url": "Library/l2"},
                {"type": "citation", "citation": "no url"}
            ],
            "content": [{"contentType": "text/cql", "url": "Binary/b1"}]
        });

        let found = locate(&library);
        assert_eq!(
            labels(&found),
            vec!["Library.subject", "Library.relatedArtifact", "Library.content"]
        );
        assert!(matches!(found[1].value, ReferenceValue::RelatedArtifact { .. }));
        assert!(matches!(found[2].value, ReferenceValue::Attachment { .. }));
    }

    #[test]
    fn test_unsupported_type_yields_extensions_only() {
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"},
            "extension": [{"url": "u", "valueReference": {"reference": "Device/d1"}}]
        });

        let found = locate(&observation);
        assert_eq!(labels(&found), vec!["Observation.extension"]);
    }

    #[test]
    fn test_non_domain_resources() {
        let bundle = json!({
            "resourceType": "Bundle",
            "extension": [{"url": "u", "valueReference": {"reference": "Patient/p1"}}]
        });
        assert!(locate(&bundle).is_empty());

        let binary = json!({
            "resourceType": "Binary",
            "securityContext": {"reference": "Patient/p1"},
            "extension": [{"url": "u", "valueReference": {"reference": "Patient/p2"}}]
        });
        assert_eq!(labels(&locate(&binary)), vec!["Binary.securityContext"]);

        assert!(locate(&json!({"foo": "bar"})).is_empty());
    }

    #[test]
    fn test_display_only_reference_is_skipped() {
        let endpoint = json!({
            "resourceType": "Endpoint",
            "managingOrganization": {"display": "Somewhere"}
        });
        assert!(locate(&endpoint).is_empty());
    }

    #[test]
    fn test_every_catalogue_type_is_total() {
        for resource_type in known_resource_types() {
            let resource = json!({
                "resourceType": resource_type,
                "extension": [{"url": "u", "valueReference": {"reference": "Patient/p1"}}]
            });
            let found = locate(&resource);
            assert!(found.iter().all(|r| !r.location.is_empty()));
            assert_eq!(locate(&resource), found, "{resource_type}");
        }
    }

    #[test]
    fn test_escape_pointer() {
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }
}
