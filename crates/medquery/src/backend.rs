// ── In-memory record backend ──
//
// Stands in for the patient API behind the demo: paginated, searchable
// lists, soft delete, simulated latency, and injectable failures. Records
// are generic across resource families.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use medquery_core::{ListParams, QueryError, ResourceKind, SortDirection};

/// Filter fields the backend understands.
const FILTER_FIELDS: &[&str] = &["category"];

// ── Record types ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub note: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInput {
    pub title: Option<String>,
    pub note: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub data: Vec<Record>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

// ── MemoryBackend ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    pub latency: Duration,
    /// Fail every Nth request with a 503; 0 never fails.
    pub fail_every: u32,
}

/// Cheaply cloneable handle to one resource family's records.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    kind: ResourceKind,
    options: BackendOptions,
    records: Mutex<BTreeMap<String, Record>>,
    requests: AtomicU64,
}

impl MemoryBackend {
    pub fn new(kind: ResourceKind, options: BackendOptions) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                kind,
                options,
                records: Mutex::new(BTreeMap::new()),
                requests: AtomicU64::new(0),
            }),
        }
    }

    /// Backend pre-filled with `count` active records.
    pub async fn seeded(kind: ResourceKind, options: BackendOptions, count: u32) -> Self {
        let backend = Self::new(kind, options);
        {
            let mut records = backend.inner.records.lock().await;
            let base = Utc::now();
            for n in 0..count {
                let created_at = base - chrono::Duration::minutes(i64::from(count - n));
                let record = Record {
                    id: Uuid::new_v4().to_string(),
                    title: sample_title(kind, n),
                    note: Some(format!("seeded entry {}", n + 1)),
                    category: Some(sample_category(n).into()),
                    is_active: true,
                    created_at,
                    updated_at: created_at,
                };
                records.insert(record.id.clone(), record);
            }
        }
        debug!(resource = %kind, count, "seeded backend");
        backend
    }

    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    /// Requests served so far, failed ones included.
    pub fn request_count(&self) -> u64 {
        self.inner.requests.load(Ordering::Relaxed)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn list(&self, params: &ListParams) -> Result<ListPage, QueryError> {
        self.begin_request("list").await?;

        if let Some(field) = params
            .filters
            .keys()
            .find(|f| !FILTER_FIELDS.contains(&f.as_str()))
        {
            return Err(QueryError::Validation {
                message: format!("unknown filter '{field}'"),
            });
        }

        let records = self.inner.records.lock().await;
        let needle = params.search.as_deref().map(str::to_lowercase);
        let mut matches: Vec<&Record> = records
            .values()
            .filter(|r| r.is_active)
            .filter(|r| needle.as_deref().is_none_or(|n| r.matches_search(n)))
            .filter(|r| {
                params
                    .filters
                    .get("category")
                    .is_none_or(|c| r.category.as_deref() == Some(c.as_str()))
            })
            .collect();

        let (field, direction) = params
            .sort
            .as_ref()
            .map_or(("created_at", SortDirection::Desc), |s| {
                (s.field.as_str(), s.direction)
            });
        match field {
            "title" => matches.sort_by(|a, b| a.title.cmp(&b.title)),
            _ => matches.sort_by_key(|r| r.created_at),
        }
        if direction == SortDirection::Desc {
            matches.reverse();
        }

        let total = matches.len();
        let page_size = usize::try_from(params.page_size.max(1)).unwrap_or(usize::MAX);
        let from = usize::try_from(params.page.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .saturating_mul(page_size);
        let data = matches
            .into_iter()
            .skip(from)
            .take(page_size)
            .cloned()
            .collect();

        Ok(ListPage {
            data,
            total,
            page: params.page,
            page_size: params.page_size,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Record, QueryError> {
        self.begin_request("get").await?;
        let records = self.inner.records.lock().await;
        records
            .get(id)
            .filter(|r| r.is_active)
            .cloned()
            .ok_or_else(|| self.not_found(id))
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub async fn create(&self, input: RecordInput) -> Result<Record, QueryError> {
        self.begin_request("create").await?;
        let title = input
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| QueryError::Validation {
                message: "title is required".into(),
            })?;

        let now = Utc::now();
        let record = Record {
            id: Uuid::new_v4().to_string(),
            title,
            note: input.note,
            category: input.category,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .records
            .lock()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    pub async fn update(&self, id: &str, input: RecordInput) -> Result<Record, QueryError> {
        self.begin_request("update").await?;
        let mut records = self.inner.records.lock().await;
        let record = records
            .get_mut(id)
            .filter(|r| r.is_active)
            .ok_or_else(|| self.not_found(id))?;

        if let Some(title) = input.title {
            if title.trim().is_empty() {
                return Err(QueryError::Validation {
                    message: "title cannot be empty".into(),
                });
            }
            record.title = title;
        }
        if input.note.is_some() {
            record.note = input.note;
        }
        if input.category.is_some() {
            record.category = input.category;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    /// Soft delete: the record stays stored but disappears from reads.
    pub async fn delete(&self, id: &str) -> Result<Record, QueryError> {
        self.begin_request("delete").await?;
        let mut records = self.inner.records.lock().await;
        let record = records
            .get_mut(id)
            .filter(|r| r.is_active)
            .ok_or_else(|| self.not_found(id))?;
        record.is_active = false;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn begin_request(&self, op: &'static str) -> Result<(), QueryError> {
        let n = self.inner.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.inner.options.latency.is_zero() {
            tokio::time::sleep(self.inner.options.latency).await;
        }
        let fail_every = u64::from(self.inner.options.fail_every);
        if fail_every > 0 && n % fail_every == 0 {
            trace!(op, request = n, "injecting backend failure");
            return Err(QueryError::api(503, format!("{op} request {n} rejected")));
        }
        trace!(op, request = n, resource = %self.inner.kind, "backend request");
        Ok(())
    }

    fn not_found(&self, id: &str) -> QueryError {
        QueryError::NotFound {
            resource: self.inner.kind.to_string(),
            id: id.into(),
        }
    }
}

impl Record {
    fn matches_search(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .note
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(needle))
    }
}

fn sample_title(kind: ResourceKind, n: u32) -> String {
    let names: &[&str] = match kind {
        ResourceKind::Allergies => &["Peanuts", "Penicillin", "Pollen", "Latex", "Shellfish"],
        ResourceKind::Conditions => &["Asthma", "Hypertension", "Migraine", "Eczema"],
        ResourceKind::Medications | ResourceKind::Prescriptions => {
            &["Amoxicillin", "Lisinopril", "Metformin", "Salbutamol"]
        }
        ResourceKind::Immunizations => &["Influenza", "Tetanus", "Hepatitis B", "MMR"],
        _ => &[],
    };
    let index = usize::try_from(n).unwrap_or(0);
    match names.get(index % names.len().max(1)) {
        Some(name) => format!("{name} #{}", n + 1),
        None => format!("{} #{}", kind.label(), n + 1),
    }
}

fn sample_category(n: u32) -> &'static str {
    match n % 3 {
        0 => "mild",
        1 => "moderate",
        _ => "severe",
    }
}
