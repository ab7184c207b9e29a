// src/main.rs
//
// =============================================================================
// WEAVE: CLI ENTRY POINT
// =============================================================================
//
// `wv` is a thin dispatcher: every subcommand resolves a `Runtime` + opens
// the hot/cold store, calls straight into `weave::{graph, workflow_engine,
// context, health, learning, ingest, persistence}`, prints either plain
// text or one JSON value (`--json`), and maps the returned `WeaveError`
// to an exit code via `WeaveError::is_fatal()`.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use weave::bridge::{resolve_bridge, NullBridge};
use weave::context::ContextBuilder;
use weave::core::Direction;
use weave::error::{WeaveError, WeaveResult};
use weave::graph::{GraphEngine, ResolveMode};
use weave::id::{AgeSpec, EdgeType, NodeId, NodeStatus};
use weave::journal::Journal;
use weave::learning::{find_duplicate_pairs, list_learnings, LearningCategory, LearningQuery};
use weave::runtime::Runtime;
use weave::workflow_engine::{BulkPatch, WorkflowEngine};
use weave::{health, ingest, persistence, rpc, StorageEngine};

#[derive(Parser)]
#[command(name = "wv", about = "Task-graph workflow engine for AI coding agents", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the hot store, recovering from `.weave/state.sql` if the hot zone is gone.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Create a node.
    Add {
        text: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        gh: bool,
        #[arg(long)]
        force: bool,
    },
    /// Modify a node; `--metadata` is merged shallowly.
    Update {
        id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long = "remove-key")]
        remove_key: Option<String>,
    },
    /// Close a node, auto-unblocking its dependents.
    Done {
        id: String,
        #[arg(long)]
        learning: Option<String>,
        #[arg(long)]
        no_warn: bool,
        #[arg(long)]
        skip_verification: bool,
    },
    /// Close several nodes with the same learning note.
    BatchDone {
        ids: Vec<String>,
        #[arg(long)]
        learning: Option<String>,
    },
    /// Apply status/text/metadata patches from a JSON array on stdin.
    BulkUpdate {
        #[arg(long)]
        dry_run: bool,
    },
    /// Claim a node (status -> active).
    Work {
        id: String,
        #[arg(long)]
        quiet: bool,
    },
    /// List nodes with `status='todo'` and no open blocker.
    Ready {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        count: Option<i64>,
    },
    /// List nodes, optionally filtered.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        #[arg(long = "type")]
        node_type: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show one node in full.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// A one-line summary of the graph and its health bucket.
    Status,
    /// A one-line health summary with alerts.
    Digest {
        #[arg(long)]
        json: bool,
    },
    /// Node/edge/ready counts.
    Overview {
        #[arg(long)]
        json: bool,
    },
    /// Record a `blocks` edge and mark `id` blocked.
    Block {
        id: String,
        #[arg(long)]
        by: String,
    },
    /// Create a typed edge.
    Link {
        from: String,
        to: String,
        #[arg(long = "type")]
        edge_type: String,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        context: Option<String>,
    },
    /// Resolve a pair of contradictory/duplicate nodes.
    Resolve {
        n1: String,
        n2: String,
        #[arg(long)]
        winner: Option<String>,
        #[arg(long)]
        merge: bool,
        #[arg(long)]
        defer: bool,
        #[arg(long)]
        rationale: Option<String>,
    },
    /// Edges touching a node, resolved to node summaries.
    Related {
        id: String,
        #[arg(long = "type")]
        edge_type: Option<String>,
        #[arg(long)]
        direction: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Raw edges touching a node.
    Edges {
        id: String,
        #[arg(long = "type")]
        edge_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// The `implements` chain from a node to its root.
    Path {
        id: String,
        #[arg(long)]
        format: Option<String>,
    },
    /// The `implements` hierarchy from a root (or every root).
    Tree {
        root: Option<String>,
        #[arg(long)]
        active: bool,
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        mermaid: bool,
    },
    /// The context pack for a node (blockers, ancestors, related, pitfalls, contradictions).
    Context {
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Full-text search.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the FTS index from `nodes.text`.
    Reindex,
    /// List learning-bearing nodes (decisions/patterns/pitfalls/learnings).
    Learnings {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        grep: Option<String>,
        #[arg(long)]
        recent: Option<i64>,
        #[arg(long = "min-quality")]
        min_quality: Option<i64>,
        #[arg(long)]
        dedup: bool,
        #[arg(long)]
        json: bool,
    },
    /// Integrity score, bucket, and optional trailing history.
    Health {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        history: Option<Option<usize>>,
    },
    /// Diff live counts against the snapshot taken at `load`.
    SessionSummary {
        #[arg(long)]
        json: bool,
    },
    /// List nodes with an unresolved `pitfall`.
    AuditPitfalls {
        #[arg(long)]
        only_unaddressed: bool,
        #[arg(long)]
        only_addressed: bool,
        #[arg(long)]
        json: bool,
    },
    /// Archive and delete `done` nodes older than `age`.
    Prune {
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete edges whose endpoint no longer exists.
    CleanGhosts {
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a node and its incident edges.
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_gh: bool,
    },
    /// Dump the hot store to `.weave/`.
    Sync {
        #[arg(long)]
        gh: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the hot store from `.weave/state.sql`.
    Load,
    /// Close a node, then sync/commit/push, as one resumable journal op.
    Ship {
        id: String,
        #[arg(long)]
        learning: Option<String>,
        #[arg(long)]
        gh: bool,
    },
    /// Atomic create-and-close.
    Quick {
        text: String,
        #[arg(long)]
        learning: Option<String>,
    },
    /// Report and clear an interrupted journal operation.
    Recover {
        #[arg(long)]
        json: bool,
    },
    /// Integrity checks plus environment checks.
    Doctor {
        #[arg(long)]
        json: bool,
    },
    /// Alias for `doctor`.
    Selftest {
        #[arg(long)]
        json: bool,
    },
    /// Whether the stdio RPC adaptor's tool manifest is reachable.
    McpStatus {
        #[arg(long)]
        json: bool,
    },
    /// Serve the stdio RPC adaptor until EOF.
    Mcp,
    /// Extract node-id and file-path references from text.
    Refs {
        file: Option<String>,
        #[arg(short = 't', long)]
        text: Option<String>,
        #[arg(long)]
        max: Option<usize>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        link: bool,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        interactive: bool,
    },
    /// Import a JSONL dump of nodes.
    Import {
        file: PathBuf,
        #[arg(long)]
        filter: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Import a Markdown checklist as an epic plus tasks.
    Plan {
        file: PathBuf,
        #[arg(long)]
        sprint: Option<u32>,
        #[arg(long)]
        gh: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        template: bool,
    },
    /// Bulk-create edges from a JSONL relation spec.
    EnrichTopology {
        spec: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        sync_gh: bool,
    },
    /// Read, append to, or clear `.weave/breadcrumbs.md`.
    Breadcrumbs {
        action: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
    /// List the closed set of edge types.
    EdgeTypes,
    /// Print usage guidance, optionally for one topic.
    Guide {
        topic: Option<String>,
    },
    /// Print full help.
    Help,
    /// Generate shell completions (hidden: `wv completions <shell>`).
    #[command(hide = true)]
    Completions {
        shell: String,
    },
}

struct Context {
    storage: StorageEngine,
    cold: persistence::ColdZone,
    runtime: Runtime,
    journal: Journal,
    hot_zone: PathBuf,
}

fn project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "default".to_string())
}

fn open_context(force_init: bool) -> WeaveResult<Context> {
    let runtime = Runtime::from_env();
    let cold = persistence::ColdZone::new(Path::new(".weave"));
    let hot_zone = runtime.resolve_hot_zone(&project_name());
    let hot_db = runtime.db_path.clone().unwrap_or_else(|| hot_zone.join("hot.db"));
    let storage = persistence::init(&hot_db, &cold, force_init)?;
    let journal = Journal::new(&hot_zone);
    Ok(Context { storage, cold, runtime, journal, hot_zone })
}

/// Best-effort: a throttled sync never fails the command that triggered it.
fn maybe_auto_sync(ctx: &Context) {
    let throttle = persistence::Throttle::new(&ctx.hot_zone);
    if let Err(e) = persistence::auto_sync(&ctx.storage, &ctx.cold, &throttle, &ctx.runtime) {
        log::warn!("auto-sync skipped: {e}");
    }
}

fn print_json(value: &impl serde::Serialize) -> WeaveResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_metadata(raw: Option<&str>) -> WeaveResult<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).map_err(WeaveError::from)).transpose()
}

fn parse_status(raw: Option<&str>) -> WeaveResult<Option<NodeStatus>> {
    raw.map(|s| s.parse()).transpose()
}

fn parse_direction(raw: Option<&str>) -> WeaveResult<Direction> {
    Ok(match raw {
        None => Direction::Both,
        Some(s) => s.parse().map_err(|_| WeaveError::InvalidInput(format!("invalid direction `{s}`")))?,
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.suggestion() {
                eprintln!("  {hint}");
            }
            if e.is_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}

fn run() -> WeaveResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Add { text, status, metadata, alias, parent, gh, force } => {
            cmd_add(text, status, metadata, alias, parent, gh, force)
        }
        Commands::Update { id, status, text, metadata, alias, remove_key } => {
            cmd_update(id, status, text, metadata, alias, remove_key)
        }
        Commands::Done { id, learning, no_warn, skip_verification } => cmd_done(id, learning, no_warn, skip_verification),
        Commands::BatchDone { ids, learning } => cmd_batch_done(ids, learning),
        Commands::BulkUpdate { dry_run } => cmd_bulk_update(dry_run),
        Commands::Work { id, quiet } => cmd_work(id, quiet),
        Commands::Ready { json, count } => cmd_ready(json, count),
        Commands::List { status, priority, node_type, all, json } => cmd_list(status, priority, node_type, all, json),
        Commands::Show { id, json } => cmd_show(id, json),
        Commands::Status => cmd_status(),
        Commands::Digest { json } => cmd_digest(json),
        Commands::Overview { json } => cmd_overview(json),
        Commands::Block { id, by } => cmd_block(id, by),
        Commands::Link { from, to, edge_type, weight, context } => cmd_link(from, to, edge_type, weight, context),
        Commands::Resolve { n1, n2, winner, merge, defer, rationale } => cmd_resolve(n1, n2, winner, merge, defer, rationale),
        Commands::Related { id, edge_type, direction, json } => cmd_related(id, edge_type, direction, json),
        Commands::Edges { id, edge_type, json } => cmd_edges(id, edge_type, json),
        Commands::Path { id, format } => cmd_path(id, format),
        Commands::Tree { root, active, depth, json, mermaid } => cmd_tree(root, active, depth, json, mermaid),
        Commands::Context { id, json } => cmd_context(id, json),
        Commands::Search { query, limit, status, json } => cmd_search(query, limit, status, json),
        Commands::Reindex => cmd_reindex(),
        Commands::Learnings { category, grep, recent, min_quality, dedup, json } => {
            cmd_learnings(category, grep, recent, min_quality, dedup, json)
        }
        Commands::Health { json, verbose, history } => cmd_health(json, verbose, history),
        Commands::SessionSummary { json } => cmd_session_summary(json),
        Commands::AuditPitfalls { only_unaddressed, only_addressed, json } => {
            cmd_audit_pitfalls(only_unaddressed, only_addressed, json)
        }
        Commands::Prune { age, dry_run } => cmd_prune(age, dry_run),
        Commands::CleanGhosts { dry_run } => cmd_clean_ghosts(dry_run),
        Commands::Delete { id, force, dry_run, no_gh } => cmd_delete(id, force, dry_run, no_gh),
        Commands::Sync { gh, dry_run } => cmd_sync(gh, dry_run),
        Commands::Load => cmd_load(),
        Commands::Ship { id, learning, gh } => cmd_ship(id, learning, gh),
        Commands::Quick { text, learning } => cmd_quick(text, learning),
        Commands::Recover { json } => cmd_recover(json),
        Commands::Doctor { json } => cmd_doctor(json),
        Commands::Selftest { json } => cmd_doctor(json),
        Commands::McpStatus { json } => cmd_mcp_status(json),
        Commands::Mcp => cmd_mcp(),
        Commands::Refs { file, text, max, json, link, from, interactive } => {
            cmd_refs(file, text, max, json, link, from, interactive)
        }
        Commands::Import { file, filter, dry_run } => cmd_import(file, filter, dry_run),
        Commands::Plan { file, sprint, gh, dry_run, template } => cmd_plan(file, sprint, gh, dry_run, template),
        Commands::EnrichTopology { spec, dry_run, sync_gh } => cmd_enrich_topology(spec, dry_run, sync_gh),
        Commands::Breadcrumbs { action, message } => cmd_breadcrumbs(action, message),
        Commands::EdgeTypes => cmd_edge_types(),
        Commands::Guide { topic } => cmd_guide(topic),
        Commands::Help => {
            use clap::CommandFactory;
            Cli::command().print_long_help().ok();
            Ok(())
        }
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

fn cmd_init(force: bool) -> WeaveResult<()> {
    let runtime = Runtime::from_env();
    let cold = persistence::ColdZone::new(Path::new(".weave"));
    let hot_zone = runtime.resolve_hot_zone(&project_name());
    let hot_db = runtime.db_path.clone().unwrap_or_else(|| hot_zone.join("hot.db"));
    let storage = persistence::init(&hot_db, &cold, force)?;
    println!("initialized weave store: hot={} cold=.weave/", hot_db.display());
    drop(storage);
    Ok(())
}

fn cmd_add(
    text: String,
    status: Option<String>,
    metadata: Option<String>,
    alias: Option<String>,
    parent: Option<String>,
    gh: bool,
    force: bool,
) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let status = parse_status(status.as_deref())?;
    let metadata = parse_metadata(metadata.as_deref())?;
    let parent = parent.map(|p| ctx.storage.resolve(&p)).transpose()?.map(|n| n.id);
    let id = graph.add(&text, status, metadata, alias.as_deref(), parent.as_ref(), force)?;

    if gh {
        let bridge = resolve_bridge(true, None);
        let (number, _) = bridge.create_issue(&text, &[], &text);
        if let Some(number) = number {
            let mut node = ctx.storage.get_node(&id)?;
            node.metadata.set("gh_issue", json!(number));
            ctx.storage.replace_metadata(&id, &node.metadata)?;
        }
    }

    println!("{id}");
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_update(
    id: String,
    status: Option<String>,
    text: Option<String>,
    metadata: Option<String>,
    alias: Option<String>,
    remove_key: Option<String>,
) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let status = parse_status(status.as_deref())?;
    let metadata = parse_metadata(metadata.as_deref())?;
    graph.update(&id, status, text.as_deref(), metadata, alias.as_deref(), remove_key.as_deref())?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_done(id: String, learning: Option<String>, no_warn: bool, skip_verification: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = resolve_bridge(ctx.runtime.gh_sync, None);
    let workflow = WorkflowEngine::new(&ctx.storage, bridge.as_ref());
    let repo_root = std::env::current_dir().ok();
    let outcome = workflow.done(
        &ctx.storage.resolve(&id)?.id,
        learning.as_deref(),
        skip_verification,
        no_warn || ctx.runtime.no_warn,
        repo_root.as_deref(),
    )?;
    print_json(&outcome)?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_batch_done(ids: Vec<String>, learning: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = NullBridge;
    let workflow = WorkflowEngine::new(&ctx.storage, &bridge);
    let ids: Vec<NodeId> = ids.iter().map(|i| ctx.storage.resolve(i).map(|n| n.id)).collect::<WeaveResult<Vec<_>>>()?;
    let outcomes = workflow.batch_done(&ids, learning.as_deref())?;
    print_json(&outcomes)?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_bulk_update(dry_run: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = NullBridge;
    let workflow = WorkflowEngine::new(&ctx.storage, &bridge);

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf).map_err(|e| WeaveError::InvalidInput(format!("reading stdin: {e}")))?;
    let raw: Vec<Value> = serde_json::from_str(&buf)?;

    let mut patches = Vec::with_capacity(raw.len());
    for entry in raw {
        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| WeaveError::InvalidInput("patch missing `id`".into()))?;
        let id = NodeId::parse(id)?;
        let status = entry.get("status").and_then(Value::as_str).map(str::parse::<NodeStatus>).transpose()?;
        let text = entry.get("text").and_then(Value::as_str).map(str::to_string);
        let metadata = entry.get("metadata").cloned();
        patches.push(BulkPatch { id, status, text, metadata });
    }

    let applied = workflow.bulk_update(&patches, dry_run)?;
    print_json(&json!({"applied": applied, "dry_run": dry_run}))?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_work(id: String, quiet: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = resolve_bridge(ctx.runtime.gh_sync, None);
    let workflow = WorkflowEngine::new(&ctx.storage, bridge.as_ref());
    let id = ctx.storage.resolve(&id)?.id;
    workflow.work(&id)?;
    if !quiet {
        println!("export WV_ACTIVE={id}");
    }
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_ready(json: bool, count: Option<i64>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let rows = graph.ready(count)?;
    if json {
        print_json(&rows)
    } else {
        for row in rows {
            println!("{} [{}] {}", row.id, row.status, row.text);
        }
        Ok(())
    }
}

fn cmd_list(status: Option<String>, priority: Option<i64>, node_type: Option<String>, all: bool, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let status = parse_status(status.as_deref())?;
    let mut rows = graph.list(status, node_type.as_deref(), all)?;
    if let Some(p) = priority {
        rows.retain(|r| r.priority == Some(p));
    }
    if json {
        print_json(&rows)
    } else {
        for row in rows {
            println!("{} [{}] {}", row.id, row.status, row.text);
        }
        Ok(())
    }
}

fn cmd_show(id: String, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let node = ctx.storage.resolve(&id)?;
    if json {
        print_json(&vec![node])
    } else {
        println!("{} [{}] {}", node.id, node.status, node.text);
        println!("metadata: {}", serde_json::to_string(&node.metadata.0)?);
        if let Some(alias) = &node.alias {
            println!("alias: {alias}");
        }
        Ok(())
    }
}

fn cmd_status() -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let report = health::compute_health(&ctx.storage, &ctx.cold.health_log())?;
    println!(
        "{} nodes, {} edges, health {} ({:?})",
        report.nodes, report.edges, report.score, report.bucket
    );
    Ok(())
}

fn cmd_digest(json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let report = health::compute_health(&ctx.storage, &ctx.cold.health_log())?;
    if json {
        print_json(&report)
    } else {
        println!("{}", health::digest(&report));
        Ok(())
    }
}

fn cmd_overview(json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let nodes = ctx.storage.node_count()?;
    let edges = ctx.storage.edge_count()?;
    let ready = graph.ready(Some(5))?;
    if json {
        print_json(&json!({"nodes": nodes, "edges": edges, "ready": ready}))
    } else {
        println!("{nodes} nodes, {edges} edges, {} ready", ready.len());
        Ok(())
    }
}

fn cmd_block(id: String, by: String) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let by = ctx.storage.resolve(&by)?.id;
    graph.block(&id, &by)?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_link(from: String, to: String, edge_type: String, weight: Option<f64>, context: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let from = ctx.storage.resolve(&from)?.id;
    let to = ctx.storage.resolve(&to)?.id;
    let edge_type: EdgeType = edge_type.parse()?;
    let context = parse_metadata(context.as_deref())?;
    graph.link(&from, &to, edge_type, weight, context)?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_resolve(n1: String, n2: String, winner: Option<String>, merge: bool, defer: bool, rationale: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let n1 = ctx.storage.resolve(&n1)?.id;
    let n2 = ctx.storage.resolve(&n2)?.id;
    let winner_id = winner.map(|w| ctx.storage.resolve(&w)).transpose()?.map(|n| n.id);

    let mode = if let Some(w) = &winner_id {
        ResolveMode::Winner(w)
    } else if merge {
        ResolveMode::Merge
    } else if defer {
        ResolveMode::Defer
    } else {
        return Err(WeaveError::InvalidInput("resolve requires one of --winner, --merge, --defer".into()));
    };

    let outcome = graph.resolve(&n1, &n2, mode, rationale.as_deref())?;
    print_json(&outcome)?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_related(id: String, edge_type: Option<String>, direction: Option<String>, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let edge_type: Option<EdgeType> = edge_type.map(|s| s.parse()).transpose()?;
    let direction = parse_direction(direction.as_deref())?;
    let edges = graph.related(&id, edge_type, direction)?;
    if json {
        print_json(&edges)
    } else {
        for edge in edges {
            println!("{} -[{}]-> {}", edge.source, edge.edge_type, edge.target);
        }
        Ok(())
    }
}

fn cmd_edges(id: String, edge_type: Option<String>, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let edge_type: Option<EdgeType> = edge_type.map(|s| s.parse()).transpose()?;
    let edges = graph.edges(&id, edge_type)?;
    if json {
        print_json(&edges)
    } else {
        for edge in edges {
            println!("{} -[{}]-> {}", edge.source, edge.edge_type, edge.target);
        }
        Ok(())
    }
}

fn cmd_path(id: String, format: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let chain = graph.path(&id)?;
    if format.as_deref() == Some("chain") {
        println!("{}", chain.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" -> "));
    } else {
        print_json(&chain)?;
    }
    Ok(())
}

fn cmd_tree(root: Option<String>, active: bool, depth: Option<usize>, json: bool, mermaid: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let root = root.map(|r| ctx.storage.resolve(&r)).transpose()?.map(|n| n.id);
    let rows = graph.tree(root.as_ref(), active, depth)?;
    if mermaid {
        println!("graph TD");
        for row in &rows {
            println!("  {}[\"{}\"]", row.id, row.text.replace('"', "'"));
        }
    } else if json {
        print_json(&rows)?;
    } else {
        for row in &rows {
            println!("{}{} [{}] {}", "  ".repeat(row.depth), row.id, row.status, row.text);
        }
    }
    Ok(())
}

fn cmd_context(id: Option<String>, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let id = match id {
        Some(i) => ctx.storage.resolve(&i)?.id,
        None => ctx
            .runtime
            .active_node
            .as_deref()
            .map(NodeId::parse)
            .transpose()?
            .ok_or_else(|| WeaveError::InvalidInput("no node given and WV_ACTIVE is unset".into()))?,
    };
    let pack = ContextBuilder::new(&ctx.storage).build(&id)?;
    let _ = json;
    println!("{}", serde_json::to_string_pretty(&pack)?);
    Ok(())
}

fn cmd_search(query: String, limit: Option<i64>, status: Option<String>, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let status = parse_status(status.as_deref())?;
    let rows = graph.search(&query, limit.unwrap_or(20), status)?;
    if json {
        print_json(&rows)
    } else {
        for row in rows {
            println!("{} [{}] {}", row.id, row.status, row.text);
        }
        Ok(())
    }
}

fn cmd_reindex() -> WeaveResult<()> {
    let ctx = open_context(false)?;
    ctx.storage.reindex()?;
    println!("reindexed");
    Ok(())
}

fn cmd_learnings(
    category: Option<String>,
    grep: Option<String>,
    recent: Option<i64>,
    min_quality: Option<i64>,
    dedup: bool,
    json: bool,
) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let category: Option<LearningCategory> = category.map(|s| s.parse()).transpose()?;
    let query = LearningQuery { node: None, category, grep: grep.as_deref(), recent, min_quality };
    let nodes = list_learnings(&ctx.storage, &query)?;

    if dedup {
        let pairs = find_duplicate_pairs(&nodes);
        return if json {
            print_json(&pairs)
        } else {
            for (a, b, score) in pairs {
                println!("{a} ~ {b} ({score:.2})");
            }
            Ok(())
        };
    }

    if json {
        print_json(&nodes)
    } else {
        for node in nodes {
            println!("{} [{}] {}", node.id, node.status, node.metadata.learning_text());
        }
        Ok(())
    }
}

fn cmd_health(json: bool, verbose: bool, history: Option<Option<usize>>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let report = health::compute_health(&ctx.storage, &ctx.cold.health_log())?;

    if let Some(limit) = history {
        let rows = health::read_history(&ctx.cold.health_log(), limit.unwrap_or(20))?;
        return if json {
            print_json(&rows)
        } else {
            for row in rows {
                println!("{} score={} nodes={} edges={}", row.timestamp, row.score, row.nodes, row.edges);
            }
            Ok(())
        };
    }

    if json {
        print_json(&report)
    } else {
        println!("score={} bucket={:?}", report.score, report.bucket);
        if verbose {
            println!(
                "nodes={} edges={} orphans={} ghost_edges={} invalid_statuses={} unaddressed_pitfalls={} stale_active={} unresolved_contradicts={}",
                report.nodes,
                report.edges,
                report.orphans,
                report.ghost_edges,
                report.invalid_statuses,
                report.unaddressed_pitfalls,
                report.stale_active,
                report.unresolved_contradicts
            );
        }
        Ok(())
    }
}

fn cmd_session_summary(json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let snapshot_path = ctx.hot_zone.join("session_snapshot.json");
    let snapshot = match std::fs::read_to_string(&snapshot_path) {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(_) => {
            let fresh = health::take_snapshot(&ctx.storage)?;
            std::fs::write(&snapshot_path, serde_json::to_string(&fresh)?).ok();
            fresh
        }
    };
    let summary = health::diff_session(&ctx.storage, &snapshot)?;
    if json {
        print_json(&summary)
    } else {
        println!(
            "{}s elapsed, {} created, {} completed, {} new learnings",
            summary.duration_secs, summary.nodes_created, summary.nodes_completed, summary.new_learnings
        );
        Ok(())
    }
}

fn cmd_audit_pitfalls(only_unaddressed: bool, only_addressed: bool, json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let query = LearningQuery { node: None, category: Some(LearningCategory::Pitfall), grep: None, recent: None, min_quality: None };
    let nodes = list_learnings(&ctx.storage, &query)?;
    let mut rows = Vec::new();
    for node in nodes {
        let addressed = ctx
            .storage
            .edges_of(&node.id, None, Direction::Inbound)?
            .iter()
            .any(|e| matches!(e.edge_type, EdgeType::Addresses | EdgeType::Implements | EdgeType::Supersedes));
        if only_unaddressed && addressed {
            continue;
        }
        if only_addressed && !addressed {
            continue;
        }
        rows.push(json!({"id": node.id, "text": node.text, "pitfall": node.metadata.pitfall(), "addressed": addressed}));
    }
    if json {
        print_json(&rows)
    } else {
        for row in &rows {
            println!("{} addressed={}: {}", row["id"], row["addressed"], row["pitfall"]);
        }
        Ok(())
    }
}

fn cmd_prune(age: Option<String>, dry_run: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let age: AgeSpec = age.as_deref().unwrap_or("30d").parse()?;
    let pruned = persistence::prune(&ctx.storage, &ctx.cold, age, dry_run)?;
    print_json(&pruned)?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_clean_ghosts(dry_run: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    if dry_run {
        let ghosts = ctx.storage.ghost_edges()?;
        print_json(&ghosts)
    } else {
        let removed = ctx.storage.clean_ghost_edges()?;
        println!("removed {removed} ghost edge(s)");
        maybe_auto_sync(&ctx);
        Ok(())
    }
}

fn cmd_delete(id: String, force: bool, dry_run: bool, no_gh: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let id = ctx.storage.resolve(&id)?.id;
    let node = graph.delete(&id, force, dry_run)?;

    if !dry_run {
        persistence::archive_deleted_node(&ctx.cold, &node)?;
        if !no_gh {
            if let Some(issue) = node.metadata.gh_issue() {
                let bridge = resolve_bridge(ctx.runtime.gh_sync, None);
                bridge.close_issue(issue, "Deleted.");
            }
        }
    }

    print_json(&node)?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_sync(gh: bool, dry_run: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    if dry_run {
        println!("would sync to {}", ctx.cold.state_sql().display());
        return Ok(());
    }
    persistence::sync(&ctx.storage, &ctx.cold)?;
    if gh {
        log::info!("gh sync requested; no outstanding issue reconciliation to perform at sync time");
    }
    println!("synced");
    Ok(())
}

fn cmd_load() -> WeaveResult<()> {
    let runtime = Runtime::from_env();
    let cold = persistence::ColdZone::new(Path::new(".weave"));
    let hot_zone = runtime.resolve_hot_zone(&project_name());
    let hot_db = runtime.db_path.clone().unwrap_or_else(|| hot_zone.join("hot.db"));

    let previous_count = if hot_db.exists() {
        StorageEngine::open(&hot_db).ok().and_then(|s| s.node_count().ok())
    } else {
        None
    };
    persistence::backup_hot_db(&hot_db)?;
    let outcome = persistence::load(&cold, previous_count)?;
    for warning in &outcome.warnings {
        eprintln!("Warning: {warning}");
    }

    std::fs::create_dir_all(&hot_zone).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
    if hot_db.exists() {
        std::fs::remove_file(&hot_db).ok();
    }
    let fresh = StorageEngine::open(&hot_db)?;
    fresh.restore_sql(&outcome.store.dump_sql()?)?;

    let snapshot = health::take_snapshot(&fresh)?;
    std::fs::write(hot_zone.join("session_snapshot.json"), serde_json::to_string(&snapshot)?).ok();

    println!("loaded {} node(s)", fresh.node_count()?);
    Ok(())
}

fn cmd_ship(id: String, learning: Option<String>, gh: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = resolve_bridge(gh || ctx.runtime.gh_sync, None);
    let workflow = WorkflowEngine::new(&ctx.storage, bridge.as_ref());
    let id = ctx.storage.resolve(&id)?.id;
    let cold = &ctx.cold;
    let storage = &ctx.storage;

    let outcome = workflow.ship(
        &id,
        learning.as_deref(),
        &ctx.journal,
        &ctx.runtime,
        || persistence::sync(storage, cold),
        || {
            let status = std::process::Command::new("git")
                .args(["commit", "-am", &format!("wv: ship {id}\n\nWeave-ID: {id}")])
                .status();
            match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(WeaveError::ExternalTool(format!("git commit exited with {s}"))),
                Err(e) => Err(WeaveError::ExternalTool(format!("git commit not runnable: {e}"))),
            }
        },
        || {
            if !gh && !ctx.runtime.gh_sync {
                return Ok(());
            }
            let status = std::process::Command::new("git").args(["push"]).status();
            match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(WeaveError::ExternalTool(format!("git push exited with {s}"))),
                Err(e) => Err(WeaveError::ExternalTool(format!("git push not runnable: {e}"))),
            }
        },
    )?;

    ctx.journal.clean()?;
    print_json(&outcome)
}

fn cmd_quick(text: String, learning: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = NullBridge;
    let workflow = WorkflowEngine::new(&ctx.storage, &bridge);
    let id = workflow.quick(&text, learning.as_deref())?;
    println!("{id}");
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_recover(json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    match ctx.journal.incomplete_op()? {
        None => {
            if json {
                print_json(&json!({"status": "clean"}))
            } else {
                println!("no incomplete operation");
                Ok(())
            }
        }
        Some(op) => {
            if json {
                print_json(&op)
            } else {
                println!(
                    "incomplete op {} ({}): completed steps {:?}, pending {:?}",
                    op.op_id, op.op, op.completed_steps, op.pending_action
                );
                Ok(())
            }
        }
    }
}

fn cmd_doctor(json: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let mut checks = Vec::new();

    checks.push(("hot zone writable".to_string(), ctx.hot_zone.exists() || std::fs::create_dir_all(&ctx.hot_zone).is_ok()));
    checks.push(("integrity_check".to_string(), ctx.storage.integrity_check()?));
    checks.push(("ghost edges".to_string(), ctx.storage.ghost_edges()?.is_empty()));
    checks.push(("invalid statuses".to_string(), ctx.storage.invalid_status_count()? == 0));
    checks.push(("git present".to_string(), std::process::Command::new("git").arg("--version").output().is_ok()));
    checks.push(("gh present".to_string(), std::process::Command::new("gh").arg("--version").output().is_ok()));
    checks.push(("journal clean".to_string(), !ctx.journal.has_incomplete()?));

    let all_ok = checks.iter().all(|(_, ok)| *ok);
    if json {
        let rows: Vec<Value> = checks.iter().map(|(name, ok)| json!({"check": name, "ok": ok})).collect();
        print_json(&json!({"ok": all_ok, "checks": rows}))
    } else {
        for (name, ok) in &checks {
            println!("[{}] {}", if *ok { "ok" } else { "FAIL" }, name);
        }
        Ok(())
    }
}

fn cmd_mcp_status(json: bool) -> WeaveResult<()> {
    let report = json!({
        "reachable": true,
        "scopes": {"session": rpc::SESSION_TOOLS, "graph": rpc::GRAPH_TOOLS},
        "tools": rpc::all_tools(),
    });
    if json {
        print_json(&report)
    } else {
        println!("mcp: {} tool(s) across 2 scopes", rpc::all_tools().len());
        Ok(())
    }
}

fn cmd_mcp() -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let bridge = resolve_bridge(ctx.runtime.gh_sync, None);
    rpc::serve_stdio(&ctx.storage, bridge.as_ref())?;
    maybe_auto_sync(&ctx);
    Ok(())
}

fn cmd_refs(
    file: Option<String>,
    text_arg: Option<String>,
    max: Option<usize>,
    json: bool,
    link: bool,
    from: Option<String>,
    interactive: bool,
) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let text = match (file, text_arg) {
        (Some(path), _) => std::fs::read_to_string(&path).map_err(|e| WeaveError::InvalidInput(format!("reading {path}: {e}")))?,
        (None, Some(t)) => t,
        (None, None) => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).map_err(|e| WeaveError::InvalidInput(format!("reading stdin: {e}")))?;
            buf
        }
    };

    let hits = ingest::extract_refs(&text, max.unwrap_or(50));

    if link {
        let graph = GraphEngine::new(&ctx.storage);
        let from = from.ok_or_else(|| WeaveError::InvalidInput("--link requires --from=ID".into()))?;
        let from = ctx.storage.resolve(&from)?.id;
        let linked = ingest::link_refs(&graph, &from, &hits)?;
        if interactive {
            println!("linked {linked} of {} hit(s)", hits.len());
        }
        maybe_auto_sync(&ctx);
    }

    if json {
        print_json(&hits)
    } else {
        for hit in hits {
            println!("{} [{}]", hit.target, hit.kind);
        }
        Ok(())
    }
}

fn cmd_import(file: PathBuf, filter: Vec<String>, dry_run: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let filters: Vec<(String, String)> = filter
        .iter()
        .map(|f| {
            f.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| WeaveError::InvalidInput(format!("malformed filter `{f}`, expected K=V")))
        })
        .collect::<WeaveResult<Vec<_>>>()?;
    let outcome = ingest::import_jsonl(&graph, &file, &filters, dry_run)?;
    print_json(&outcome)?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_plan(file: PathBuf, sprint: Option<u32>, gh: bool, dry_run: bool, template: bool) -> WeaveResult<()> {
    if template {
        println!("# Sprint Title\n\n- [ ] first task\n- [ ] second task\n");
        return Ok(());
    }
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let outcome = ingest::import_plan(&graph, &file, sprint, dry_run)?;

    if gh && !dry_run {
        let bridge = resolve_bridge(true, None);
        let epic = ctx.storage.get_node(&outcome.epic)?;
        let (number, _) = bridge.create_issue(&epic.text, &[], &epic.text);
        if let Some(number) = number {
            let mut node = epic;
            node.metadata.set("gh_issue", json!(number));
            ctx.storage.replace_metadata(&outcome.epic, &node.metadata)?;
        }
    }

    print_json(&outcome)?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_enrich_topology(spec: PathBuf, dry_run: bool, sync_gh: bool) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let graph = GraphEngine::new(&ctx.storage);
    let content = std::fs::read_to_string(&spec).map_err(|e| WeaveError::InvalidInput(format!("reading {}: {e}", spec.display())))?;

    let mut created = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rel: Value =
            serde_json::from_str(line).map_err(|e| WeaveError::InvalidInput(format!("{}:{}: {e}", spec.display(), line_no + 1)))?;
        let from = rel.get("from").and_then(Value::as_str).ok_or_else(|| WeaveError::InvalidInput("relation missing `from`".into()))?;
        let to = rel.get("to").and_then(Value::as_str).ok_or_else(|| WeaveError::InvalidInput("relation missing `to`".into()))?;
        let edge_type: EdgeType = rel
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WeaveError::InvalidInput("relation missing `type`".into()))?
            .parse()?;
        let weight = rel.get("weight").and_then(Value::as_f64);
        let context = rel.get("context").cloned();

        if dry_run {
            created += 1;
            continue;
        }
        let from = ctx.storage.resolve(from)?.id;
        let to = ctx.storage.resolve(to)?.id;
        graph.link(&from, &to, edge_type, weight, context)?;
        created += 1;
    }

    if sync_gh {
        log::info!("sync_gh requested; enrich-topology only materializes graph edges, no issue-tracker side effects apply");
    }

    print_json(&json!({"edges_created": created, "dry_run": dry_run}))?;
    if !dry_run {
        maybe_auto_sync(&ctx);
    }
    Ok(())
}

fn cmd_breadcrumbs(action: Option<String>, message: Option<String>) -> WeaveResult<()> {
    let ctx = open_context(false)?;
    let path = ctx.cold.breadcrumbs();

    match action.as_deref().unwrap_or("show") {
        "clear" => {
            std::fs::create_dir_all(path.parent().unwrap()).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
            std::fs::write(&path, "").map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
            println!("cleared");
        }
        "save" => {
            let message = message.ok_or_else(|| WeaveError::InvalidInput("breadcrumbs save requires --message".into()))?;
            std::fs::create_dir_all(path.parent().unwrap()).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
            use std::io::Write as _;
            writeln!(file, "- {} {message}", chrono::Utc::now().to_rfc3339()).map_err(|e| WeaveError::Persistence(anyhow::anyhow!(e)))?;
        }
        _ => {
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            print!("{content}");
        }
    }
    Ok(())
}

fn cmd_edge_types() -> WeaveResult<()> {
    for edge_type in EdgeType::ALL {
        println!("{edge_type}");
    }
    Ok(())
}

fn cmd_guide(topic: Option<String>) -> WeaveResult<()> {
    let text = match topic.as_deref() {
        Some("status") => "Statuses: todo, active, blocked, blocked-external, done, pending. done is terminal.",
        Some("edges") => "Edge types: blocks, relates_to, implements, contradicts, supersedes, references, obsoletes, addresses.",
        Some("ship") => {
            "ship closes a node then syncs/commits/pushes as one resumable journal operation; re-run `wv recover` after a crash."
        }
        Some(other) => {
            println!("no guide entry for `{other}`; try `wv guide` for the overview");
            return Ok(());
        }
        None => {
            "wv tracks work as a graph of nodes (add/update/done) linked by typed edges (link/block/resolve). \
             Use `ready`/`work`/`done` for the day-to-day loop, `context ID` to prime an agent, `health`/`doctor` to check integrity, \
             and `sync`/`ship` to persist to .weave/ and version control."
        }
    };
    println!("{text}");
    Ok(())
}

fn cmd_completions(shell: String) -> WeaveResult<()> {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell};
    let shell: Shell = shell.parse().map_err(|_| WeaveError::InvalidInput(format!("unknown shell `{shell}`")))?;
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
