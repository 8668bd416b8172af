//! Field-mapping configuration and the import-side record resolver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{external_id, ExternalField, LocalField, SyncEntityType};
use crate::errors::MappingError;

/// Which sync direction a mapping participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    FromExternal,
    ToExternal,
    Bidirectional,
}

impl MappingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromExternal => "from_external",
            Self::ToExternal => "to_external",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "from_external" | "inbound" => Some(Self::FromExternal),
            "to_external" | "outbound" => Some(Self::ToExternal),
            "bidirectional" | "both" => Some(Self::Bidirectional),
            _ => None,
        }
    }

    pub fn applies_on_import(&self) -> bool {
        matches!(self, Self::FromExternal | Self::Bidirectional)
    }

    pub fn applies_on_export(&self) -> bool {
        matches!(self, Self::ToExternal | Self::Bidirectional)
    }
}

/// One configured correspondence between an external attribute and a local
/// column. Rows are user-scoped in storage; the user id stays at the
/// repository layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub id: String,
    pub entity_type: SyncEntityType,
    pub local_field: LocalField,
    pub external_field: ExternalField,
    pub direction: MappingDirection,
    pub enabled: bool,
}

/// Default mapping set seeded for an entity type on first use.
pub fn default_mappings(entity: SyncEntityType) -> Vec<(ExternalField, LocalField)> {
    use ExternalField as E;
    use LocalField as L;
    match entity {
        SyncEntityType::Contact => vec![
            (E::FullName, L::Name),
            (E::Email, L::Email),
            (E::Phone, L::Phone),
            (E::EmployerName, L::Company),
        ],
        SyncEntityType::Company => vec![
            (E::CompanyName, L::Name),
            (E::Email, L::Email),
            (E::Phone, L::Phone),
            (E::Website, L::Website),
            (E::VatNumber, L::VatNumber),
            (E::City, L::City),
        ],
        SyncEntityType::Deal => vec![
            (E::Title, L::Name),
            (E::Phase, L::Stage),
            (E::EstimatedValue, L::Amount),
            (E::Currency, L::Currency),
            (E::EstimatedCloseDate, L::CloseDate),
        ],
        SyncEntityType::Invoice => vec![
            (E::InvoiceNumber, L::Number),
            (E::Status, L::Status),
            (E::Total, L::Amount),
            (E::Currency, L::Currency),
            (E::InvoiceDate, L::IssuedOn),
            (E::DueOn, L::DueOn),
        ],
        SyncEntityType::Quote => vec![
            (E::QuoteNumber, L::Number),
            (E::Status, L::Status),
            (E::Total, L::Amount),
            (E::Currency, L::Currency),
            (E::ValidUntil, L::ValidUntil),
        ],
        SyncEntityType::Project => vec![
            (E::Title, L::Name),
            (E::Status, L::Status),
            (E::StartsOn, L::StartsOn),
            (E::EndsOn, L::EndsOn),
            (E::Description, L::Notes),
        ],
    }
}

/// An external record after mapping: the local field set keyed for upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedRecord {
    pub external_id: String,
    pub display_name: String,
    pub fields: BTreeMap<LocalField, String>,
}

/// Maps one external record through the enabled import-direction mappings.
///
/// Mappings whose fields fall outside the entity's supported dispatch are
/// skipped rather than failing the record; a record without an external id
/// cannot be keyed and fails. The display name is always derived, because the
/// downstream upsert depends on having one.
pub fn map_record(
    entity: SyncEntityType,
    mappings: &[FieldMapping],
    record: &Value,
) -> Result<MappedRecord, MappingError> {
    if !record.is_object() {
        return Err(MappingError::NotAnObject { entity });
    }
    let external_id =
        external_id(record).ok_or(MappingError::MissingExternalId { entity })?;

    let mut fields = BTreeMap::new();
    for mapping in mappings {
        if mapping.entity_type != entity
            || !mapping.enabled
            || !mapping.direction.applies_on_import()
        {
            continue;
        }
        if let Some(value) = mapping.external_field.extract(record) {
            fields.insert(mapping.local_field, value);
        }
    }

    let display_name = synthesize_display_name(entity, record, &fields, &external_id);
    fields.entry(LocalField::Name).or_insert_with(|| display_name.clone());

    Ok(MappedRecord { external_id, display_name, fields })
}

/// Display-name derivation: explicit name mapping, then the entity's natural
/// name attribute, then email, then a generated placeholder.
fn synthesize_display_name(
    entity: SyncEntityType,
    record: &Value,
    fields: &BTreeMap<LocalField, String>,
    external_id: &str,
) -> String {
    if let Some(name) = fields.get(&LocalField::Name).filter(|name| !name.trim().is_empty()) {
        return name.clone();
    }

    let natural = match entity {
        SyncEntityType::Contact => ExternalField::FullName.extract(record),
        SyncEntityType::Company => ExternalField::CompanyName.extract(record),
        SyncEntityType::Deal | SyncEntityType::Project => ExternalField::Title.extract(record),
        SyncEntityType::Invoice => ExternalField::InvoiceNumber.extract(record),
        SyncEntityType::Quote => ExternalField::QuoteNumber.extract(record),
    };
    if let Some(name) = natural {
        return name;
    }

    if let Some(email) = ExternalField::Email.extract(record) {
        return email;
    }

    let short_id: String = external_id.chars().take(8).collect();
    format!("{} {}", entity.as_str(), short_id)
}
