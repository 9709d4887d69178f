//! `medquery demo`: a list screen and a detail screen kept fresh through a
//! series of writes.
//!
//! Mounts a list subscription and a detail subscription on an in-memory
//! backend, runs create/update/delete through mutation controllers that
//! invalidate the resource family, and reports how often each subscription
//! refetched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tracing::info;

use medquery_config::{self as config, Config};
use medquery_core::{
    Fetcher, KeyPart, KeyRegistry, ListParams, MutationCallbacks, MutationController,
    QueryDefaults, QueryError, QueryKey, ResourceKeys, ResourceKind, Subscription, WriteOp,
    invalidation_patterns,
};

use crate::backend::{BackendOptions, ListPage, MemoryBackend, Record, RecordInput};
use crate::cli::{DemoArgs, GlobalOpts};
use crate::config::output_format;
use crate::error::CliError;
use crate::output;

// ── Plan ────────────────────────────────────────────────────────────

/// Demo settings after merging flags over the config file.
#[derive(Debug)]
struct Plan {
    kind: ResourceKind,
    writes: u32,
    seed: u32,
    backend: BackendOptions,
    params: ListParams,
    search: Option<String>,
}

impl Plan {
    fn resolve(args: DemoArgs, cfg: &Config, defaults: &QueryDefaults) -> Result<Self, CliError> {
        let kind = match args.resource {
            Some(kind) => kind,
            None => cfg
                .demo
                .resource
                .parse()
                .map_err(|_| CliError::Validation {
                    field: "demo.resource".into(),
                    reason: format!("unknown resource '{}'", cfg.demo.resource),
                })?,
        };

        let mut params = ListParams::new(defaults);
        if let Some(size) = args.page_size {
            params = params.with_page_size(size, defaults);
        }

        Ok(Self {
            kind,
            writes: args.writes,
            seed: args.seed.unwrap_or(cfg.demo.seed_records),
            backend: BackendOptions {
                latency: Duration::from_millis(args.latency_ms.unwrap_or(cfg.demo.latency_ms)),
                fail_every: args.fail_every.unwrap_or(cfg.demo.fail_every),
            },
            params,
            search: args.search,
        })
    }
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DemoReport {
    resource: ResourceKind,
    steps: Vec<StepEntry>,
    subscriptions: Vec<SubscriptionEntry>,
    backend_requests: u64,
    registered_keys: usize,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct StepEntry {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "List fetches")]
    list_fetches: usize,
    #[tabled(rename = "Detail fetches")]
    detail_fetches: usize,
    #[tabled(rename = "Listed")]
    listed: usize,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct SubscriptionEntry {
    #[tabled(rename = "Screen")]
    screen: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Fetches")]
    fetches: usize,
    #[tabled(rename = "Error")]
    #[serde(skip_serializing_if = "String::is_empty")]
    error: String,
}

// ── Screens ─────────────────────────────────────────────────────────

/// A subscription plus the number of times its fetcher ran.
struct Screen<T> {
    name: &'static str,
    subscription: Subscription<T>,
    fetches: Arc<AtomicUsize>,
}

impl<T: Send + Sync + 'static> Screen<T> {
    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn entry(&self) -> SubscriptionEntry {
        let state = self.subscription.state();
        SubscriptionEntry {
            screen: self.name.into(),
            key: self.subscription.key().to_string(),
            status: state.status.to_string(),
            fetches: self.fetches(),
            error: state.error.map(|e| e.user_message()).unwrap_or_default(),
        }
    }
}

fn list_fetcher(
    backend: &MemoryBackend,
    params: ListParams,
    fetches: &Arc<AtomicUsize>,
) -> impl Fetcher<ListPage> {
    let backend = backend.clone();
    let fetches = Arc::clone(fetches);
    move |_: &QueryKey| {
        fetches.fetch_add(1, Ordering::Relaxed);
        let backend = backend.clone();
        let params = params.clone();
        async move { backend.list(&params).await }
    }
}

/// Detail fetcher reading the record id from the last key segment.
fn detail_fetcher(backend: &MemoryBackend, fetches: &Arc<AtomicUsize>) -> impl Fetcher<Record> {
    let backend = backend.clone();
    let fetches = Arc::clone(fetches);
    move |key: &QueryKey| {
        fetches.fetch_add(1, Ordering::Relaxed);
        let backend = backend.clone();
        let id = key.parts().last().and_then(KeyPart::as_str).map(str::to_owned);
        async move {
            let id = id.ok_or_else(|| QueryError::Internal("detail key has no id".into()))?;
            backend.get(&id).await
        }
    }
}

// ── Writers ─────────────────────────────────────────────────────────

struct Writers {
    create: MutationController<RecordInput, Record>,
    update: MutationController<(String, RecordInput), Record>,
    delete: MutationController<String, Record>,
}

impl Writers {
    fn new(backend: &MemoryBackend, registry: &KeyRegistry) -> Self {
        let kind = backend.kind();

        let b = backend.clone();
        let create = MutationController::new(move |input: RecordInput| {
            let backend = b.clone();
            async move { backend.create(input).await }
        })
        .invalidates(registry, move |_, _| {
            invalidation_patterns(kind, &WriteOp::Create)
        });

        let b = backend.clone();
        let update = MutationController::new(move |(id, input): (String, RecordInput)| {
            let backend = b.clone();
            async move { backend.update(&id, input).await }
        })
        .invalidates(registry, move |record: &Record, _| {
            invalidation_patterns(kind, &WriteOp::Update {
                id: record.id.clone(),
            })
        });

        let b = backend.clone();
        let delete = MutationController::new(move |id: String| {
            let backend = b.clone();
            async move { backend.delete(&id).await }
        })
        .invalidates(registry, move |record: &Record, _| {
            invalidation_patterns(kind, &WriteOp::Delete {
                id: record.id.clone(),
            })
        });

        Self {
            create,
            update,
            delete,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: DemoArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let defaults = config::to_query_defaults(cfg)?;
    let format = output_format(global, cfg)?;
    let plan = Plan::resolve(args, cfg, &defaults)?;
    let report = run(plan).await?;

    let out = output::render_single(format, &report, render_report, |r| {
        r.subscriptions
            .iter()
            .map(|s| format!("{} {}", s.screen, s.fetches))
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn run(plan: Plan) -> Result<DemoReport, CliError> {
    let kind = plan.kind;
    let backend = MemoryBackend::seeded(kind, plan.backend, plan.seed).await;
    let registry = KeyRegistry::new();
    let mut params = plan.params.clone();

    // ── Mount the list screen, then the detail screen for its first row
    let list_fetches = Arc::new(AtomicUsize::new(0));
    let mut list = Screen {
        name: "list",
        subscription: Subscription::new(
            &registry,
            ResourceKeys::list(kind, &params),
            list_fetcher(&backend, params.clone(), &list_fetches),
        )?,
        fetches: list_fetches,
    };
    let first_page = list.subscription.settled().await;
    let detail_id = first_page
        .data
        .as_ref()
        .and_then(|page| page.data.first())
        .map(|r| r.id.clone());

    let detail = match &detail_id {
        Some(id) => {
            let fetches = Arc::new(AtomicUsize::new(0));
            let subscription = Subscription::new(
                &registry,
                ResourceKeys::detail(kind, id),
                detail_fetcher(&backend, &fetches),
            )?;
            subscription.settled().await;
            Some(Screen {
                name: "detail",
                subscription,
                fetches,
            })
        }
        None => None,
    };

    let mut steps = Vec::new();
    let mut record_step = |action: String, outcome: String, list: &Screen<ListPage>| {
        let step = StepEntry {
            step: steps.len(),
            action,
            outcome,
            list_fetches: list.fetches(),
            detail_fetches: detail.as_ref().map_or(0, Screen::fetches),
            listed: list.subscription.data().map_or(0, |page| page.total),
        };
        info!(
            step = step.step,
            action = %step.action,
            list_fetches = step.list_fetches,
            detail_fetches = step.detail_fetches,
            "demo step"
        );
        steps.push(step);
    };
    record_step(
        "mount".into(),
        match &detail_id {
            Some(id) => format!("list + detail {id}"),
            None => "list only (no records)".into(),
        },
        &list,
    );

    // ── Writes
    let writers = Writers::new(&backend, &registry);
    let mut created: Vec<String> = Vec::new();
    for n in 0..plan.writes {
        let (action, outcome) = match n % 3 {
            0 => {
                let input = RecordInput {
                    title: Some(format!("{} entry {}", kind.label(), n + 1)),
                    note: Some("added during demo".into()),
                    category: Some("moderate".into()),
                };
                match writers.create.invoke_and_wait(input).await {
                    Ok(record) => {
                        let outcome = format!("created {}", record.id);
                        created.push(record.id);
                        ("create".to_owned(), outcome)
                    }
                    Err(err) => ("create".to_owned(), err.user_message()),
                }
            }
            1 => match detail_id.clone().or_else(|| created.last().cloned()) {
                Some(id) => {
                    let outcome = Arc::new(OnceLock::new());
                    let (ok, failed) = (Arc::clone(&outcome), Arc::clone(&outcome));
                    let callbacks = MutationCallbacks::new()
                        .on_success(move |record: &Record, _: &(String, RecordInput)| {
                            let _ = ok.set(format!("updated {}", record.id));
                        })
                        .on_error(move |err: &QueryError| {
                            let _ = failed.set(err.user_message());
                        });
                    let input = RecordInput {
                        note: Some(format!("revised at write {}", n + 1)),
                        ..RecordInput::default()
                    };
                    writers.update.invoke((id.clone(), input), callbacks).await;
                    let outcome = outcome.get().cloned().unwrap_or_default();
                    (format!("update {id}"), outcome)
                }
                None => ("update".to_owned(), "skipped: nothing to update".to_owned()),
            },
            _ => match created.pop().or_else(|| deletable(&list, detail_id.as_deref())) {
                Some(id) => match writers.delete.invoke_and_wait(id.clone()).await {
                    Ok(_) => (format!("delete {id}"), "soft-deleted".to_owned()),
                    Err(err) => (format!("delete {id}"), err.user_message()),
                },
                None => ("delete".to_owned(), "skipped: nothing to delete".to_owned()),
            },
        };

        list.subscription.settled().await;
        if let Some(detail) = &detail {
            detail.subscription.settled().await;
        }
        record_step(action, outcome, &list);
    }

    // ── Search: new parameters move the list screen to a new key
    if let Some(search) = plan.search {
        params.set_search(Some(search.clone()));
        list.subscription.set_query(
            ResourceKeys::list(kind, &params),
            list_fetcher(&backend, params.clone(), &list.fetches),
        );
        list.subscription.settled().await;
        record_step(format!("search '{search}'"), "list key changed".into(), &list);
    }

    let mut subscriptions = vec![list.entry()];
    subscriptions.extend(detail.as_ref().map(Screen::entry));

    Ok(DemoReport {
        resource: kind,
        steps,
        subscriptions,
        backend_requests: backend.request_count(),
        registered_keys: registry.entry_count(),
    })
}

/// A listed record other than the one on the detail screen.
fn deletable(list: &Screen<ListPage>, keep: Option<&str>) -> Option<String> {
    let page = list.subscription.data()?;
    page.data
        .iter()
        .rev()
        .find(|r| Some(r.id.as_str()) != keep)
        .map(|r| r.id.clone())
}

fn render_report(report: &DemoReport) -> String {
    format!(
        "{} ({})\n{}\n{}\nbackend requests: {}  registered keys: {}",
        report.resource.label(),
        report.resource.endpoint(),
        output::render_table(&report.steps),
        output::render_table(&report.subscriptions),
        report.backend_requests,
        report.registered_keys,
    )
}
