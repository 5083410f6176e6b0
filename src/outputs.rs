//! Pure-read extraction of named output values from a converged state
//! record.

use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::graph::{AttrValue, OutputSpec};
use crate::state::{ResourceStatus, StateRecord};

/// Errors raised while extracting an output value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OutputError {
    /// Raised when the manifest declares no output with the given name.
    #[error("output {name} is not declared")]
    UnknownOutput {
        /// Name that was requested.
        name: String,
    },
    /// Raised when the owning declaration has not converged yet.
    #[error("output {name} is not available: resource {resource} is not applied")]
    NotApplied {
        /// Output that was requested.
        name: String,
        /// Declaration owning the output.
        resource: String,
    },
    /// Raised when the resource does not expose the requested attribute.
    #[error("output {name} not found: resource {resource} has no attribute {attribute}")]
    NotFound {
        /// Output that was requested.
        name: String,
        /// Declaration owning the output.
        resource: String,
        /// Attribute the output reads.
        attribute: String,
    },
    /// Raised when an output consumed as a host address does not parse as
    /// one.
    #[error("output {name} is not a host address: {value}")]
    InvalidAddress {
        /// Output that was requested.
        name: String,
        /// Value that failed to parse.
        value: String,
    },
}

/// Returns the current value of the named output.
///
/// Pure read of the state record; no side effects.
///
/// # Errors
///
/// Returns [`OutputError`] when the output is undeclared, its resource has
/// not converged, or the attribute is missing from the snapshot.
pub fn extract(
    record: &StateRecord,
    outputs: &[OutputSpec],
    name: &str,
) -> Result<AttrValue, OutputError> {
    let spec = outputs
        .iter()
        .find(|output| output.name == name)
        .ok_or_else(|| OutputError::UnknownOutput {
            name: name.to_owned(),
        })?;

    let entry = record
        .resource(&spec.resource)
        .filter(|entry| entry.status == ResourceStatus::Applied)
        .ok_or_else(|| OutputError::NotApplied {
            name: name.to_owned(),
            resource: spec.resource.clone(),
        })?;

    entry
        .attrs
        .get(&spec.attribute)
        .cloned()
        .ok_or_else(|| OutputError::NotFound {
            name: name.to_owned(),
            resource: spec.resource.clone(),
            attribute: spec.attribute.clone(),
        })
}

/// Extracts the named output and parses it as a host address.
///
/// # Errors
///
/// Returns any [`extract`] error, plus [`OutputError::InvalidAddress`]
/// when the value is not an IP address.
pub fn extract_host_address(
    record: &StateRecord,
    outputs: &[OutputSpec],
    name: &str,
) -> Result<IpAddr, OutputError> {
    let value = extract(record, outputs, name)?;
    let rendered = value.to_string();
    IpAddr::from_str(&rendered).map_err(|_| OutputError::InvalidAddress {
        name: name.to_owned(),
        value: rendered,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::state::ResourceState;

    fn outputs() -> Vec<OutputSpec> {
        vec![OutputSpec {
            name: String::from("host_address"),
            resource: String::from("host"),
            attribute: String::from("public_ip"),
        }]
    }

    fn applied_record(attrs: BTreeMap<String, AttrValue>) -> StateRecord {
        let mut record = StateRecord::default();
        record.resources.insert(
            String::from("host"),
            ResourceState {
                kind: String::from("instance"),
                status: ResourceStatus::Applied,
                provider_id: Some(String::from("srv-1")),
                attrs,
            },
        );
        record
    }

    #[test]
    fn extracts_declared_output() {
        let record = applied_record(BTreeMap::from([(
            String::from("public_ip"),
            AttrValue::String(String::from("192.0.2.7")),
        )]));

        let value = extract(&record, &outputs(), "host_address")
            .unwrap_or_else(|err| panic!("extract: {err}"));
        assert_eq!(value, AttrValue::String(String::from("192.0.2.7")));
    }

    #[test]
    fn unknown_output_name_is_structured_failure() {
        let record = applied_record(BTreeMap::new());

        let err = extract(&record, &outputs(), "nope").expect_err("unknown output should fail");
        assert_eq!(
            err,
            OutputError::UnknownOutput {
                name: String::from("nope"),
            }
        );
    }

    #[test]
    fn missing_attribute_reports_not_found() {
        let record = applied_record(BTreeMap::new());

        let err =
            extract(&record, &outputs(), "host_address").expect_err("missing attr should fail");
        assert_eq!(
            err,
            OutputError::NotFound {
                name: String::from("host_address"),
                resource: String::from("host"),
                attribute: String::from("public_ip"),
            }
        );
    }

    #[test]
    fn unapplied_resource_reports_not_applied() {
        let mut record = applied_record(BTreeMap::new());
        if let Some(entry) = record.resources.get_mut("host") {
            entry.status = ResourceStatus::Pending;
        }

        let err =
            extract(&record, &outputs(), "host_address").expect_err("pending resource should fail");
        assert!(matches!(err, OutputError::NotApplied { .. }), "got {err}");
    }

    #[test]
    fn host_address_parses_to_ip() {
        let record = applied_record(BTreeMap::from([(
            String::from("public_ip"),
            AttrValue::String(String::from("192.0.2.7")),
        )]));

        let address = extract_host_address(&record, &outputs(), "host_address")
            .unwrap_or_else(|err| panic!("extract: {err}"));
        assert_eq!(address, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
    }

    #[test]
    fn non_address_value_is_rejected() {
        let record = applied_record(BTreeMap::from([(
            String::from("public_ip"),
            AttrValue::String(String::from("not-an-ip")),
        )]));

        let err = extract_host_address(&record, &outputs(), "host_address")
            .expect_err("non address should fail");
        assert!(matches!(err, OutputError::InvalidAddress { .. }), "got {err}");
    }
}
