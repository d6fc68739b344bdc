//! Attribute mapping
//!
//! Assertion attributes are matched by exact `Name`, then by
//! `FriendlyName`, against a name-to-key table. The default table covers
//! the eduPerson and SCHAC vocabularies used by research and education
//! federations, under both their OID names and their friendly names.
//!
//! Multi-valued attributes are comma-joined in `User::extra` and kept as
//! JSON arrays in `User::raw`.

use serde_json::Value;
use std::collections::HashMap;

/// Key of the mail attribute.
pub const EMAIL: &str = "email";
/// Key of eduPersonPrincipalName; overrides the NameID as the user id.
pub const PRINCIPAL_NAME: &str = "eppn";
/// Key of displayName.
pub const DISPLAY_NAME: &str = "display_name";
/// Key of givenName.
pub const GIVEN_NAME: &str = "given_name";
/// Key of sn.
pub const SURNAME: &str = "surname";
/// Key of cn.
pub const COMMON_NAME: &str = "common_name";

const DEFAULT_TABLE: &[(&str, &str, &str)] = &[
    ("urn:oid:0.9.2342.19200300.100.1.3", "mail", EMAIL),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.6", "eduPersonPrincipalName", PRINCIPAL_NAME),
    ("urn:oid:2.16.840.1.113730.3.1.241", "displayName", DISPLAY_NAME),
    ("urn:oid:2.5.4.42", "givenName", GIVEN_NAME),
    ("urn:oid:2.5.4.4", "sn", SURNAME),
    ("urn:oid:2.5.4.3", "cn", COMMON_NAME),
    ("urn:oid:0.9.2342.19200300.100.1.1", "uid", "uid"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.1", "eduPersonAffiliation", "affiliation"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.5", "eduPersonPrimaryAffiliation", "primary_affiliation"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.9", "eduPersonScopedAffiliation", "scoped_affiliation"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.7", "eduPersonEntitlement", "entitlement"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.10", "eduPersonTargetedID", "targeted_id"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.13", "eduPersonUniqueId", "unique_id"),
    ("urn:oid:1.3.6.1.4.1.5923.1.1.1.16", "eduPersonOrcid", "orcid"),
    ("urn:oid:1.3.6.1.4.1.25178.1.2.9", "schacHomeOrganization", "home_organization"),
    ("urn:oid:1.3.6.1.4.1.25178.1.2.10", "schacHomeOrganizationType", "home_organization_type"),
    ("urn:oid:1.3.6.1.4.1.25178.1.2.14", "schacPersonalUniqueCode", "personal_unique_code"),
    ("urn:oid:2.5.4.10", "o", "organization"),
    ("urn:oid:2.5.4.11", "ou", "organizational_unit"),
];

/// Default attribute table, keyed by both OID and friendly name.
pub fn default_attribute_map() -> HashMap<String, String> {
    DEFAULT_TABLE
        .iter()
        .flat_map(|(oid, friendly, key)| {
            [
                (oid.to_string(), key.to_string()),
                (friendly.to_string(), key.to_string()),
            ]
        })
        .collect()
}

/// One `<Attribute>` from an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAttribute {
    /// `Name`
    pub name: Option<String>,
    /// `FriendlyName`
    pub friendly_name: Option<String>,
    /// Text of each `<AttributeValue>`
    pub values: Vec<String>,
}

impl SamlAttribute {
    /// Resolve the internal key: exact name first, then friendly name.
    pub fn key<'a>(&self, table: &'a HashMap<String, String>) -> Option<&'a str> {
        self.name
            .as_ref()
            .and_then(|n| table.get(n))
            .or_else(|| self.friendly_name.as_ref().and_then(|n| table.get(n)))
            .map(String::as_str)
    }
}

/// Attributes after mapping.
#[derive(Debug, Default, Clone)]
pub struct MappedAttributes {
    /// Internal key to comma-joined values
    pub extra: HashMap<String, String>,
    /// Internal key to values as sent
    pub values: HashMap<String, Vec<String>>,
    /// Attribute name to list of values
    pub raw: HashMap<String, Value>,
}

impl MappedAttributes {
    /// First non-blank value of a mapped attribute. Commas inside a value
    /// are part of it.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Map every attribute through `table`.
///
/// Unmapped attributes only land in `raw`. When two attributes map to the
/// same key, their values are merged in document order.
pub fn map_attributes(attributes: &[SamlAttribute], table: &HashMap<String, String>) -> MappedAttributes {
    let mut mapped = MappedAttributes::default();
    let mut grouped: HashMap<&str, Vec<String>> = HashMap::new();

    for attribute in attributes {
        if attribute.values.is_empty() {
            continue;
        }

        let raw_key = attribute
            .name
            .clone()
            .or_else(|| attribute.friendly_name.clone());
        if let Some(raw_key) = raw_key {
            let entry = mapped
                .raw
                .entry(raw_key)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = entry {
                list.extend(attribute.values.iter().cloned().map(Value::String));
            }
        }

        if let Some(key) = attribute.key(table) {
            grouped
                .entry(key)
                .or_default()
                .extend(attribute.values.iter().cloned());
        }
    }

    for (key, values) in grouped {
        mapped.extra.insert(key.to_string(), values.join(","));
        mapped.values.insert(key.to_string(), values);
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: Option<&str>, friendly: Option<&str>, values: &[&str]) -> SamlAttribute {
        SamlAttribute {
            name: name.map(String::from),
            friendly_name: friendly.map(String::from),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_table_has_both_names() {
        let table = default_attribute_map();
        assert_eq!(table["urn:oid:0.9.2342.19200300.100.1.3"], EMAIL);
        assert_eq!(table["mail"], EMAIL);
        assert_eq!(table["eduPersonPrincipalName"], PRINCIPAL_NAME);
        assert_eq!(table["schacHomeOrganization"], "home_organization");
    }

    #[test]
    fn test_exact_name_wins_over_friendly_name() {
        let mut table = HashMap::new();
        table.insert("urn:example:name".to_string(), "by_name".to_string());
        table.insert("friendly".to_string(), "by_friendly".to_string());

        let attribute = attr(Some("urn:example:name"), Some("friendly"), &["v"]);
        assert_eq!(attribute.key(&table), Some("by_name"));

        let attribute = attr(Some("urn:example:other"), Some("friendly"), &["v"]);
        assert_eq!(attribute.key(&table), Some("by_friendly"));
    }

    #[test]
    fn test_multi_valued_joined_and_listed() {
        let table = default_attribute_map();
        let attributes = vec![attr(
            Some("urn:oid:1.3.6.1.4.1.5923.1.1.1.1"),
            Some("eduPersonAffiliation"),
            &["member", "staff"],
        )];

        let mapped = map_attributes(&attributes, &table);
        assert_eq!(mapped.extra["affiliation"], "member,staff");
        assert_eq!(
            mapped.raw["urn:oid:1.3.6.1.4.1.5923.1.1.1.1"],
            serde_json::json!(["member", "staff"])
        );
    }

    #[test]
    fn test_unmapped_attribute_kept_raw_only() {
        let table = default_attribute_map();
        let attributes = vec![attr(Some("urn:example:shoe-size"), None, &["42"])];

        let mapped = map_attributes(&attributes, &table);
        assert!(mapped.extra.is_empty());
        assert_eq!(mapped.raw["urn:example:shoe-size"], serde_json::json!(["42"]));
    }

    #[test]
    fn test_friendly_name_only_attribute() {
        let table = default_attribute_map();
        let attributes = vec![attr(None, Some("mail"), &["ada@example.edu"])];

        let mapped = map_attributes(&attributes, &table);
        assert_eq!(mapped.first(EMAIL), Some("ada@example.edu"));
        assert!(mapped.raw.contains_key("mail"));
    }

    #[test]
    fn test_first_keeps_commas_inside_a_value() {
        let table = default_attribute_map();
        let attributes = vec![
            attr(Some("urn:oid:2.16.840.1.113730.3.1.241"), None, &["Hopper, Grace"]),
            attr(Some("ou"), None, &[" ", "Computing, Data Science"]),
        ];

        let mapped = map_attributes(&attributes, &table);
        assert_eq!(mapped.first(DISPLAY_NAME), Some("Hopper, Grace"));
        assert_eq!(mapped.first("organizational_unit"), Some("Computing, Data Science"));
        assert_eq!(mapped.extra[DISPLAY_NAME], "Hopper, Grace");
    }

    #[test]
    fn test_empty_values_skipped() {
        let table = default_attribute_map();
        let mapped = map_attributes(&[attr(Some("mail"), None, &[])], &table);
        assert!(mapped.extra.is_empty());
        assert!(mapped.raw.is_empty());
    }
}
