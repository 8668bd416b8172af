//! Entity-type dispatch for the CRM synchronization engine.
//!
//! Every external attribute the engine can read is an explicit
//! [`ExternalField`] variant with its own extraction logic, and every local
//! column a mapping may target is a [`LocalField`] variant. Adding an entity
//! type or attribute is a compile-time-checked extension of these tables,
//! never a string-keyed lookup into arbitrary payload properties.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity types the external CRM exposes for synchronization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    Contact,
    Company,
    Deal,
    Invoice,
    Quote,
    Project,
}

/// Fixed processing order for multi-entity runs. Companies come before
/// contacts so employer lookups hit already-imported rows; the rest follow
/// rough dependency order. Determinism matters more than the ordering itself.
pub const SYNC_ORDER: [SyncEntityType; 6] = [
    SyncEntityType::Company,
    SyncEntityType::Contact,
    SyncEntityType::Deal,
    SyncEntityType::Quote,
    SyncEntityType::Invoice,
    SyncEntityType::Project,
];

impl std::fmt::Display for SyncEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SyncEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Company => "company",
            Self::Deal => "deal",
            Self::Invoice => "invoice",
            Self::Quote => "quote",
            Self::Project => "project",
        }
    }

    /// Accepts both the singular storage form and the plural request form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Some(Self::Contact),
            "company" | "companies" => Some(Self::Company),
            "deal" | "deals" => Some(Self::Deal),
            "invoice" | "invoices" => Some(Self::Invoice),
            "quote" | "quotes" | "quotations" => Some(Self::Quote),
            "project" | "projects" => Some(Self::Project),
            _ => None,
        }
    }

    /// External API list endpoint for this entity type.
    pub fn list_endpoint(&self) -> &'static str {
        match self {
            Self::Contact => "contacts.list",
            Self::Company => "companies.list",
            Self::Deal => "deals.list",
            Self::Invoice => "invoices.list",
            Self::Quote => "quotations.list",
            Self::Project => "projects.list",
        }
    }

    /// External attributes explicitly supported for this entity type.
    pub fn supported_external_fields(&self) -> &'static [ExternalField] {
        use ExternalField::*;
        match self {
            Self::Contact => &[FirstName, LastName, FullName, Email, Phone, EmployerName],
            Self::Company => &[CompanyName, Email, Phone, Website, VatNumber, City],
            Self::Deal => &[Title, Summary, Phase, EstimatedValue, Currency, EstimatedCloseDate],
            Self::Invoice => &[InvoiceNumber, Status, Total, Currency, InvoiceDate, DueOn],
            Self::Quote => &[QuoteNumber, Status, Total, Currency, ValidUntil],
            Self::Project => &[Title, Status, StartsOn, EndsOn, Description],
        }
    }

    /// Local columns a mapping may target for this entity type.
    pub fn supported_local_fields(&self) -> &'static [LocalField] {
        use LocalField::*;
        match self {
            Self::Contact => &[Name, Email, Phone, Company],
            Self::Company => &[Name, Email, Phone, Website, VatNumber, City],
            Self::Deal => &[Name, Notes, Stage, Amount, Currency, CloseDate],
            Self::Invoice => &[Number, Status, Amount, Currency, IssuedOn, DueOn],
            Self::Quote => &[Number, Status, Amount, Currency, ValidUntil],
            Self::Project => &[Name, Status, StartsOn, EndsOn, Notes],
        }
    }
}

/// One supported attribute of an external record, with explicit extraction
/// from the provider's payload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalField {
    // contact
    FirstName,
    LastName,
    FullName,
    EmployerName,
    // company
    CompanyName,
    Website,
    VatNumber,
    City,
    // deal
    Title,
    Summary,
    Phase,
    EstimatedValue,
    EstimatedCloseDate,
    // invoice / quote
    InvoiceNumber,
    QuoteNumber,
    Total,
    InvoiceDate,
    DueOn,
    ValidUntil,
    // project
    StartsOn,
    EndsOn,
    Description,
    // shared
    Email,
    Phone,
    Status,
    Currency,
}

impl std::fmt::Display for ExternalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl ExternalField {
    /// Attribute name as it appears in mapping configuration.
    pub fn key(&self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::FullName => "full_name",
            Self::EmployerName => "company_name",
            Self::CompanyName => "name",
            Self::Website => "website",
            Self::VatNumber => "vat_number",
            Self::City => "city",
            Self::Title => "title",
            Self::Summary => "summary",
            Self::Phase => "phase",
            Self::EstimatedValue => "estimated_value",
            Self::EstimatedCloseDate => "estimated_closing_date",
            Self::InvoiceNumber => "invoice_number",
            Self::QuoteNumber => "quote_number",
            Self::Total => "total",
            Self::InvoiceDate => "invoice_date",
            Self::DueOn => "due_on",
            Self::ValidUntil => "valid_until",
            Self::StartsOn => "starts_on",
            Self::EndsOn => "ends_on",
            Self::Description => "description",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Status => "status",
            Self::Currency => "currency",
        }
    }

    /// Resolves an attribute name within one entity type's supported set.
    /// The same name can mean different variants per entity (`name` is the
    /// legal company name only for companies), so parsing is entity-scoped.
    pub fn parse(entity: SyncEntityType, raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        entity
            .supported_external_fields()
            .iter()
            .copied()
            .find(|field| field.key() == normalized)
    }

    /// Extracts this attribute from an external record as a plain string.
    /// Returns `None` when absent or empty; nested shapes are unwrapped
    /// explicitly per attribute.
    pub fn extract(&self, record: &Value) -> Option<String> {
        match self {
            Self::FirstName => string_at(record, &["first_name"]),
            Self::LastName => string_at(record, &["last_name"]),
            Self::FullName => {
                let first = string_at(record, &["first_name"]);
                let last = string_at(record, &["last_name"]);
                match (first, last) {
                    (Some(first), Some(last)) => Some(format!("{first} {last}")),
                    (Some(one), None) | (None, Some(one)) => Some(one),
                    (None, None) => string_at(record, &["full_name"]),
                }
            }
            Self::EmployerName => string_at(record, &["company", "name"])
                .or_else(|| string_at(record, &["company_name"])),
            Self::CompanyName => string_at(record, &["name"]),
            Self::Website => string_at(record, &["website"]),
            Self::VatNumber => string_at(record, &["vat_number"]),
            Self::City => string_at(record, &["primary_address", "city"])
                .or_else(|| string_at(record, &["city"])),
            Self::Title => string_at(record, &["title"]),
            Self::Summary => string_at(record, &["summary"]),
            Self::Phase => {
                string_at(record, &["phase"]).or_else(|| string_at(record, &["phase", "name"]))
            }
            Self::EstimatedValue => scalar_at(record, &["estimated_value", "amount"])
                .or_else(|| scalar_at(record, &["estimated_value"])),
            Self::EstimatedCloseDate => string_at(record, &["estimated_closing_date"]),
            Self::InvoiceNumber => string_at(record, &["invoice_number"]),
            Self::QuoteNumber => string_at(record, &["quote_number"])
                .or_else(|| string_at(record, &["number"])),
            Self::Total => scalar_at(record, &["total", "tax_inclusive", "amount"])
                .or_else(|| scalar_at(record, &["total", "amount"]))
                .or_else(|| scalar_at(record, &["total"])),
            Self::InvoiceDate => string_at(record, &["invoice_date"]),
            Self::DueOn => string_at(record, &["due_on"]),
            Self::ValidUntil => string_at(record, &["valid_until"]),
            Self::StartsOn => string_at(record, &["starts_on"]),
            Self::EndsOn => string_at(record, &["ends_on"]),
            Self::Description => string_at(record, &["description"]),
            Self::Email => first_in_list(record, "emails", "email")
                .or_else(|| string_at(record, &["email"])),
            Self::Phone => first_in_list(record, "telephones", "number")
                .or_else(|| string_at(record, &["phone"]))
                .or_else(|| string_at(record, &["telephone"])),
            Self::Status => string_at(record, &["status"]),
            Self::Currency => string_at(record, &["currency"])
                .or_else(|| string_at(record, &["estimated_value", "currency"]))
                .or_else(|| string_at(record, &["total", "currency"])),
        }
    }
}

/// One column of the local record shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalField {
    Name,
    Email,
    Phone,
    Company,
    Website,
    VatNumber,
    City,
    Stage,
    Amount,
    Currency,
    CloseDate,
    Number,
    Status,
    IssuedOn,
    DueOn,
    ValidUntil,
    StartsOn,
    EndsOn,
    Notes,
}

impl std::fmt::Display for LocalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl LocalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Company => "company",
            Self::Website => "website",
            Self::VatNumber => "vat_number",
            Self::City => "city",
            Self::Stage => "stage",
            Self::Amount => "amount",
            Self::Currency => "currency",
            Self::CloseDate => "close_date",
            Self::Number => "number",
            Self::Status => "status",
            Self::IssuedOn => "issued_on",
            Self::DueOn => "due_on",
            Self::ValidUntil => "valid_until",
            Self::StartsOn => "starts_on",
            Self::EndsOn => "ends_on",
            Self::Notes => "notes",
        }
    }

    pub fn parse(entity: SyncEntityType, raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        entity
            .supported_local_fields()
            .iter()
            .copied()
            .find(|field| field.as_str() == normalized)
    }
}

/// Stable identifier of an external record, required on every payload.
pub fn external_id(record: &Value) -> Option<String> {
    match record.get("id") {
        Some(Value::String(id)) => {
            let trimmed = id.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

fn string_at(record: &Value, path: &[&str]) -> Option<String> {
    let mut current = record;
    for segment in path {
        current = current.get(segment)?;
    }
    current
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn scalar_at(record: &Value, path: &[&str]) -> Option<String> {
    let mut current = record;
    for segment in path {
        current = current.get(segment)?;
    }
    match current {
        Value::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Providers return contact points as `[{ "type": ..., "<key>": ... }]`;
/// the first entry wins.
fn first_in_list(record: &Value, list: &str, key: &str) -> Option<String> {
    let entries = record.get(list)?.as_array()?;
    for entry in entries {
        if let Some(value) = string_at(entry, &[key]) {
            return Some(value);
        }
    }
    None
}
