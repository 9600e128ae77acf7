use std::collections::BTreeMap;
use crate::config::DescriptorConfig;
use crate::resolver::mapping::Target;
use crate::resolver::{Origin, OutputMapping, PathReference, Role};
use super::Descriptor;

/// One path-bearing occurrence in the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PathField {
    pub element: usize,
    pub attribute: usize,
    /// Position inside a `;`-separated list attribute.
    pub index: Option<usize>,
    /// `NAME` of a `NAME=value` macro entry; `raw` is then the value alone.
    pub key: Option<String>,
    pub raw: String,
    pub role: Role,
    pub origin: Origin,
}

/// A field together with its classified reference.
#[derive(Debug, Clone)]
pub struct FieldReference {
    pub field: PathField,
    pub reference: PathReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub raw: String,
    pub origin: Origin,
}

impl Descriptor {
    /// Path fields in document order.
    pub fn enumerate_path_fields(&self, config: &DescriptorConfig) -> Vec<PathField> {
        let mut fields = Vec::new();

        for (ei, element) in self.elements.iter().enumerate() {
            for (ai, attr) in element.attributes.iter().enumerate() {
                let name = attr.name.as_str();
                let origin = |index: Option<usize>| Origin::Descriptor {
                    element: element.label(),
                    attribute: attr.name.clone(),
                    index,
                };

                if config.list_attributes.iter().any(|a| a == name) {
                    for (i, entry) in attr.value.split(';').enumerate() {
                        if entry.trim().is_empty() {
                            continue;
                        }
                        fields.push(PathField {
                            element: ei,
                            attribute: ai,
                            index: Some(i),
                            key: None,
                            raw: entry.trim().to_string(),
                            role: Role::Input,
                            origin: origin(Some(i)),
                        });
                    }
                } else if config.macro_attributes.iter().any(|a| a == name) {
                    for (i, entry) in attr.value.split(';').enumerate() {
                        let Some((key, value)) = entry.trim().split_once('=') else {
                            continue;
                        };
                        if !looks_like_path(value) {
                            continue;
                        }
                        fields.push(PathField {
                            element: ei,
                            attribute: ai,
                            index: Some(i),
                            key: Some(key.trim().to_string()),
                            raw: value.trim().to_string(),
                            role: Role::Input,
                            origin: origin(Some(i)),
                        });
                    }
                } else if config.path_attributes.iter().any(|a| a == name) || config.output_attributes.iter().any(|a| a == name) {
                    if attr.value.trim().is_empty() {
                        continue;
                    }
                    let role = if config.output_attributes.iter().any(|a| a == name) {
                        Role::Output
                    } else {
                        Role::Input
                    };
                    fields.push(PathField {
                        element: ei,
                        attribute: ai,
                        index: None,
                        key: None,
                        raw: attr.value.trim().to_string(),
                        role,
                        origin: origin(None),
                    });
                }
            }
        }

        fields
    }

    /// Rewrites every field to its mapped destination.
    /// Fields without a mapping entry keep their text and are returned as unresolved.
    pub fn apply_mapping(&self, references: &[FieldReference], mapping: &OutputMapping) -> (Descriptor, Vec<Unresolved>) {
        let mut rewritten = self.clone();
        let mut unresolved = Vec::new();

        // List attributes are rebuilt once, entry by entry.
        let mut lists: BTreeMap<(usize, usize), Vec<String>> = BTreeMap::new();

        for FieldReference { field, reference } in references {
            let replacement = match mapping.destination_of(reference) {
                Some(Target::Verbatim(raw)) => raw.to_string(),
                Some(Target::Destination(dest)) => dest.to_string(),
                None => {
                    unresolved.push(Unresolved {
                        raw: field.raw.clone(),
                        origin: field.origin.clone(),
                    });
                    continue;
                }
            };

            match field.index {
                Some(i) => {
                    let entries = lists.entry((field.element, field.attribute)).or_insert_with(|| {
                        self.elements[field.element].attributes[field.attribute]
                            .value
                            .split(';')
                            .map(str::to_string)
                            .collect()
                    });
                    let text = match &field.key {
                        Some(key) => format!("{}={}", key, replacement),
                        None => replacement,
                    };
                    if entries[i].trim() != text {
                        entries[i] = text;
                    }
                }
                None => {
                    if field.raw != replacement {
                        rewritten.set_attribute(field.element, field.attribute, replacement);
                    }
                }
            }
        }

        for ((element, attribute), entries) in lists {
            rewritten.set_attribute(element, attribute, entries.join(";"));
        }

        (rewritten, unresolved)
    }
}

/// Macro values are free text; only explicit relative, absolute or variable-rooted paths count.
fn looks_like_path(value: &str) -> bool {
    let value = value.trim().replace('\\', "/");
    ["./", "../", "/", "$(", "${"].iter().any(|p| value.starts_with(p))
}
