// ── Resource key families ──
//
// Every patient record type shares the same key layout:
//
//   [root]                      family root, the invalidation pattern
//   [root, "list", {params}]    one page of a filtered list
//   [root, "detail", id]        a single record
//
// Writes invalidate the family root, which refreshes every list and detail
// subscription of that type, plus the touched record's detail key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::config::QueryDefaults;
use crate::key::{KeyPart, QueryKey};

const LIST: &str = "list";
const DETAIL: &str = "detail";

// ── ResourceKind ────────────────────────────────────────────────────

/// Patient record types exposed by the portal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Allergies,
    Conditions,
    Medications,
    Prescriptions,
    Immunizations,
    Surgeries,
    FamilyHistory,
    VitalSigns,
    Sleep,
    EmergencyContacts,
    Caregivers,
    Dependents,
}

impl ResourceKind {
    /// First key segment shared by every key of this family.
    pub fn family_root(self) -> &'static str {
        match self {
            Self::Allergies => "allergies",
            Self::Conditions => "conditions",
            Self::Medications => "medications",
            Self::Prescriptions => "prescriptions",
            Self::Immunizations => "immunizations",
            Self::Surgeries => "surgeries",
            Self::FamilyHistory => "family-history",
            Self::VitalSigns => "vitalSigns",
            Self::Sleep => "sleep",
            Self::EmergencyContacts => "emergency-contacts",
            Self::Caregivers => "caregivers",
            Self::Dependents => "dependents",
        }
    }

    /// Collection path on the patient API.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Allergies => "/api/patient/medical-history/allergies",
            Self::Conditions => "/api/patient/medical-history/conditions",
            Self::FamilyHistory => "/api/patient/medical-history/family-history",
            Self::Immunizations => "/api/patient/medical-history/immunizations",
            Self::Surgeries => "/api/patient/medhist/surgeries",
            Self::Medications => "/api/patient/medications/active",
            Self::Prescriptions => "/api/patient/presc/prescriptions",
            Self::VitalSigns => "/api/patient/vitality/vital-signs",
            Self::Sleep => "/api/patient/vitality/sleep",
            Self::EmergencyContacts => "/api/patient/persinfo/emergency-contacts",
            Self::Dependents => "/api/patient/personal-info/dependents",
            Self::Caregivers => "/api/patient/carenet/caregivers",
        }
    }

    pub fn detail_endpoint(self, id: &str) -> String {
        format!("{}/{id}", self.endpoint())
    }

    /// Human-readable name for tables and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Allergies => "Allergies",
            Self::Conditions => "Conditions",
            Self::Medications => "Medications",
            Self::Prescriptions => "Prescriptions",
            Self::Immunizations => "Immunizations",
            Self::Surgeries => "Surgeries",
            Self::FamilyHistory => "Family history",
            Self::VitalSigns => "Vital signs",
            Self::Sleep => "Sleep",
            Self::EmergencyContacts => "Emergency contacts",
            Self::Caregivers => "Caregivers",
            Self::Dependents => "Dependents",
        }
    }
}

// ── ListParams ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Paging, search, filter and sort state of one list screen.
///
/// The whole value becomes the third segment of the list key, so any change
/// to it moves the subscription to a different key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    /// Resource-specific filters such as `severity` or `current_status`.
    pub filters: BTreeMap<String, String>,
    pub sort: Option<Sort>,
}

impl ListParams {
    /// First page with the configured page size.
    pub fn new(defaults: &QueryDefaults) -> Self {
        Self {
            page: 1,
            page_size: defaults.page_size,
            search: None,
            filters: BTreeMap::new(),
            sort: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: u32, defaults: &QueryDefaults) -> Self {
        self.page_size = defaults.clamp_page_size(page_size);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.set_search(Some(search.into()));
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self.page = 1;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Change the search term and return to the first page. Blank terms
    /// clear the search.
    pub fn set_search(&mut self, search: Option<String>) {
        self.search = search.filter(|s| !s.trim().is_empty());
        self.page = 1;
    }

    /// Replace all filters and return to the first page.
    pub fn set_filters(&mut self, filters: BTreeMap<String, String>) {
        self.filters = filters;
        self.page = 1;
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    /// Key segment for this parameter set. Absent options are omitted
    /// rather than stored as nulls.
    pub fn to_key_part(&self) -> KeyPart {
        let mut fields: BTreeMap<String, KeyPart> = BTreeMap::new();
        fields.insert("page".into(), self.page.into());
        fields.insert("pageSize".into(), self.page_size.into());
        if let Some(search) = &self.search {
            fields.insert("search".into(), search.into());
        }
        for (field, value) in &self.filters {
            fields.insert(field.clone(), value.into());
        }
        if let Some(sort) = &self.sort {
            fields.insert("sort_by".into(), sort.field.as_str().into());
            fields.insert("sort_dir".into(), sort.direction.to_string().into());
        }
        KeyPart::Record(fields)
    }

    /// Request query-string pairs in the order the patient API expects.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_owned(), self.page.to_string()),
            ("pageSize".to_owned(), self.page_size.to_string()),
        ];
        if let Some(search) = &self.search {
            pairs.push(("search".to_owned(), search.clone()));
        }
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(sort) = &self.sort {
            pairs.push(("sort_by".to_owned(), sort.field.clone()));
            pairs.push(("sort_dir".to_owned(), sort.direction.to_string()));
        }
        pairs
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(&QueryDefaults::default())
    }
}

// ── ResourceKeys ────────────────────────────────────────────────────

/// Key constructors for a resource family.
pub struct ResourceKeys;

impl ResourceKeys {
    pub fn all(kind: ResourceKind) -> QueryKey {
        QueryKey::new().with(kind.family_root())
    }

    pub fn list(kind: ResourceKind, params: &ListParams) -> QueryKey {
        Self::all(kind).with(LIST).with(params.to_key_part())
    }

    pub fn detail(kind: ResourceKind, id: &str) -> QueryKey {
        Self::all(kind).with(DETAIL).with(id)
    }
}

// ── Writes ──────────────────────────────────────────────────────────

/// Write operation against a resource family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    Create,
    Update { id: String },
    Delete { id: String },
}

impl WriteOp {
    /// Id of the record touched, when the write targets one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Create => None,
            Self::Update { id } | Self::Delete { id } => Some(id),
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update { id } => write!(f, "update {id}"),
            Self::Delete { id } => write!(f, "delete {id}"),
        }
    }
}

/// Patterns to invalidate once `op` succeeds.
///
/// The detail key is already covered by the family root; it is listed so the
/// intent stays visible, and [`KeyRegistry::invalidate_all`] refreshes each
/// detail subscriber once regardless.
///
/// [`KeyRegistry::invalidate_all`]: crate::KeyRegistry::invalidate_all
pub fn invalidation_patterns(kind: ResourceKind, op: &WriteOp) -> Vec<QueryKey> {
    let mut patterns = vec![ResourceKeys::all(kind)];
    if let Some(id) = op.id() {
        patterns.push(ResourceKeys::detail(kind, id));
    }
    patterns
}
