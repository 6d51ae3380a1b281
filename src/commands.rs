use crate::{emit_success, Commands, OutputMode};
use anyhow::Context as _;
use repoctx::config::{self, RepoctxConfig};
use repoctx::query::{
    batch_query, context_query, diff_report, file_query, outline_query, search_query, BatchItem,
    FileSelector, OutlineNode, QueryMeta,
};
use repoctx::symbol::SymbolKind;
use repoctx::storage::IndexStore;
use repoctx::sync::{PushEvent, RunStatus, SyncCoordinator, SyncOutcome, SyncQueue};
use repoctx::ui::{self, Icons};
use repoctx::RepoId;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Config and open store shared by every command except `init`
struct App {
    config: RepoctxConfig,
    store: Arc<IndexStore>,
    db_path: PathBuf,
}

impl App {
    fn open(config_path: &Path) -> anyhow::Result<Self> {
        let config = config::load_effective(Some(config_path))?;
        let db_path = config.database_path(&std::env::current_dir()?);
        config::ensure_db_dir(&db_path)?;
        let store = IndexStore::open(&db_path)
            .with_context(|| format!("failed to open index at {}", db_path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            db_path,
        })
    }

    fn coordinator(&self) -> anyhow::Result<Arc<SyncCoordinator>> {
        Ok(Arc::new(SyncCoordinator::new(
            self.store.clone(),
            Arc::new(self.config.github_client()),
            self.config.build_extractor()?,
            self.config.sync_options(),
        )))
    }
}

pub async fn run(command: Commands, config_path: &Path, mode: OutputMode) -> anyhow::Result<()> {
    if let Commands::Init { force } = &command {
        return run_init(config_path, *force, mode);
    }

    let app = App::open(config_path)?;
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Sync { repo, force, all } => run_sync(&app, repo.as_deref(), force, all, mode).await,
        Commands::Webhook { payload } => run_webhook(&app, &payload, mode).await,
        Commands::Cron { interval } => run_cron(&app, interval).await,
        Commands::Status { repo } => run_status(&app, &repo, mode),
        Commands::Repos => run_repos(&app, mode),
        Commands::Files { repo } => run_files(&app, &repo, mode),
        Commands::Context {
            repo,
            path,
            name,
            budget,
        } => {
            let budget = budget.unwrap_or(app.config.budget.context_budget);
            let result = context_query(&app.store, &RepoId::parse(&repo)?, &path, &name, budget)?;
            if !mode.is_human() {
                return emit_success(mode, "context", &result);
            }
            let target = &result.data.target;
            ui::header(&format!(
                "{} {} ({}:{}-{})",
                target.kind, target.name, path, target.start_line, target.end_line
            ));
            println!("{}", target.content);
            for referenced in &result.data.referenced_types {
                ui::section(&format!(" {} {} ", referenced.kind, referenced.name));
                println!("{}", referenced.content);
            }
            if !result.data.called_functions.is_empty() {
                ui::section(" calls ");
                for callee in &result.data.called_functions {
                    let signature = callee.signature.as_deref().unwrap_or(&callee.name);
                    println!("{} {}", Icons::SYMBOL, signature);
                }
            }
            print_meta(&result.meta);
            Ok(())
        }
        Commands::File {
            repo,
            path,
            function,
            start,
            end,
            max_tokens,
        } => {
            let selector = match (function, start, end) {
                (Some(name), _, _) => FileSelector::Function(name),
                (None, Some(start), Some(end)) => FileSelector::Lines { start, end },
                _ => FileSelector::Whole,
            };
            let max_tokens = max_tokens.unwrap_or(app.config.budget.default_max_tokens);
            let result = file_query(&app.store, &RepoId::parse(&repo)?, &path, &selector, max_tokens)?;
            if !mode.is_human() {
                return emit_success(mode, "file", &result);
            }
            let slice = &result.data;
            ui::header(&format!(
                "{} [{}] lines {}-{} of {}",
                slice.path, slice.language, slice.start_line, slice.end_line, slice.line_count
            ));
            println!("{}", slice.content);
            print_meta(&result.meta);
            Ok(())
        }
        Commands::Batch {
            repo,
            requests,
            max_tokens,
        } => {
            let items: Vec<BatchItem> = serde_json::from_str(&read_input(&requests)?)
                .context("requests must be a JSON array of {path, startLine?, endLine?}")?;
            let max_tokens = max_tokens.unwrap_or(app.config.budget.default_max_tokens);
            let result = batch_query(&app.store, &RepoId::parse(&repo)?, &items, max_tokens)?;
            if !mode.is_human() {
                return emit_success(mode, "batch", &result);
            }
            for entry in &result.data.results {
                match &entry.error {
                    Some(err) => ui::warn(&format!("{}: {}", entry.path, err)),
                    None => {
                        ui::section(&format!(" {}:{}-{} ", entry.path, entry.start_line, entry.end_line));
                        println!("{}", entry.content);
                    }
                }
            }
            print_meta(&result.meta);
            Ok(())
        }
        Commands::Outline { repo, path } => {
            let result = outline_query(&app.store, &RepoId::parse(&repo)?, &path)?;
            if !mode.is_human() {
                return emit_success(mode, "outline", &result);
            }
            let outline = &result.data;
            ui::header(&format!(
                "{} [{}] {} lines, ~{} tokens",
                outline.path, outline.language, outline.line_count, outline.total_tokens
            ));
            print_outline(&outline.outline, 0);
            let stats = &outline.stats;
            println!();
            ui::summary_row(
                "Symbols:",
                &format!(
                    "{} ({} functions, {} classes, {} structs, {} types)",
                    stats.total_symbols, stats.functions, stats.classes, stats.structs, stats.types
                ),
            );
            Ok(())
        }
        Commands::Search {
            repo,
            query,
            kind,
            limit,
        } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            let result = search_query(&app.store, &RepoId::parse(&repo)?, &query, kind, limit)?;
            if !mode.is_human() {
                return emit_success(mode, "search", &result);
            }
            ui::header(&format!("{} symbols matching \"{}\"", result.data.len(), query));
            for found in &result.data {
                println!(
                    "{} {} {} {}",
                    Icons::SYMBOL,
                    found.kind,
                    found.name,
                    ui::muted(&format!(
                        "{}:{}-{} ~{}t",
                        found.path, found.start_line, found.end_line, found.token_count
                    ))
                );
            }
            print_meta(&result.meta);
            Ok(())
        }
        Commands::Diff { repo, since, branch } => {
            let repo = RepoId::parse(&repo)?;
            let branch = branch.unwrap_or_else(|| app.config.github.branch.clone());
            let remote = app.config.github_client();
            let result = diff_report(&app.store, &remote, &repo, &branch, since.as_deref()).await?;
            if !mode.is_human() {
                return emit_success(mode, "diff", &result);
            }
            let report = &result.data;
            ui::header(&format!("{} since {}", repo, report.since));
            if report.commits.is_empty() {
                ui::success("No new commits");
                return Ok(());
            }
            for commit in &report.commits {
                let title = commit.message.lines().next().unwrap_or_default();
                println!("  {} {}", ui::muted(&commit.sha), title);
            }
            ui::section(" changed files ");
            for path in &report.changed_files {
                println!("{} {}", Icons::FILE, path);
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = app.store.stats()?;
            if !mode.is_human() {
                return emit_success(mode, "stats", &stats);
            }
            ui::status(Icons::DATABASE, "Database", &app.db_path.display().to_string());
            let mut table = ui::TableBuilder::new();
            table.add_row("Repositories", stats.repos);
            table.add_row("Files", stats.files);
            table.add_row("Symbols", stats.symbols);
            table.add_row("Tokens", stats.tokens);
            table.add_row("Active leases", stats.active_leases);
            println!("{}", table.build());
            Ok(())
        }
    }
}

fn run_init(config_path: &Path, force: bool, mode: OutputMode) -> anyhow::Result<()> {
    let config = RepoctxConfig::default();
    config::write_config(config_path, &config, force)?;

    let root = std::env::current_dir()?;
    let db_path = config.database_path(&root);
    config::ensure_db_dir(&db_path)?;
    IndexStore::open(&db_path)?;
    config::ensure_gitignore(&root)?;

    if !mode.is_human() {
        return emit_success(
            mode,
            "init",
            serde_json::json!({ "config": config_path, "database": db_path }),
        );
    }
    ui::success(&format!("Wrote {}", config_path.display()));
    ui::status(Icons::DATABASE, "Database", &db_path.display().to_string());
    Ok(())
}

async fn run_sync(app: &App, repo: Option<&str>, force: bool, all: bool, mode: OutputMode) -> anyhow::Result<()> {
    let coordinator = app.coordinator()?;
    let started = Instant::now();

    if all {
        let results = coordinator.sync_all().await?;
        if !mode.is_human() {
            let data: Vec<_> = results
                .iter()
                .map(|(name, outcome)| match outcome {
                    Ok(outcome) => serde_json::json!({ "repo": name, "result": outcome }),
                    Err(e) => serde_json::json!({ "repo": name, "error": e }),
                })
                .collect();
            return emit_success(mode, "sync", data);
        }
        for (name, outcome) in &results {
            ui::section(&format!(" {} ", name));
            match outcome {
                Ok(outcome) => print_outcome(name, outcome),
                Err(e) => ui::error(e),
            }
        }
        ui::timing(started.elapsed());
        return Ok(());
    }

    let Some(repo) = repo else {
        anyhow::bail!("a repository (owner/name) or --all is required");
    };
    let repo = RepoId::parse(repo)?;
    if mode.is_human() {
        ui::header(&format!("Syncing {}", repo));
    }
    let outcome = coordinator.full_sync(&repo, force).await?;
    finish_sync(&repo, &outcome, mode, started)
}

async fn run_webhook(app: &App, payload: &Path, mode: OutputMode) -> anyhow::Result<()> {
    let event = PushEvent::parse(&read_input(payload)?)?;
    let repo = event.repo_id()?;
    let branch = &app.config.github.branch;

    let changes = event.change_set();
    if !event.targets_branch(branch) || changes.is_empty() {
        let reason = if changes.is_empty() {
            format!("push to {} changed no files", repo)
        } else {
            format!("push to {} is not on {}", repo, branch)
        };
        if !mode.is_human() {
            return emit_success(mode, "webhook", serde_json::json!({ "ignored": reason }));
        }
        ui::info("Ignored", &reason);
        return Ok(());
    }

    let started = Instant::now();
    if mode.is_human() {
        ui::header(&format!(
            "Applying push to {} ({} changed, {} removed)",
            repo,
            changes.changed.len(),
            changes.deleted.len()
        ));
    }
    let outcome = app.coordinator()?.partial_sync(&repo, &changes).await?;
    finish_sync(&repo, &outcome, mode, started)
}

async fn run_cron(app: &App, interval: u64) -> anyhow::Result<()> {
    let queue = SyncQueue::start(app.coordinator()?);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ui::header(&format!("Sweeping tracked repositories every {}s (Ctrl-C to stop)", interval));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.trigger_all()?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ui::info("Stopping", "waiting for running syncs to finish");
    queue.shutdown().await;
    Ok(())
}

fn run_status(app: &App, repo: &str, mode: OutputMode) -> anyhow::Result<()> {
    let repo = RepoId::parse(repo)?;
    let record = app
        .store
        .get_repo(&repo)?
        .ok_or_else(|| repoctx::Error::RepoNotFound(repo.full_name()))?;
    let files = app.store.count_files(record.id)?;
    let lease = app
        .store
        .get_lease(&repo.full_name())?
        .filter(|lease| !lease.is_expired(chrono::Utc::now()));

    if !mode.is_human() {
        return emit_success(
            mode,
            "status",
            serde_json::json!({ "repository": record, "files": files, "lease": lease }),
        );
    }

    ui::status(Icons::REPO, "Repository", &record.full_name);
    ui::summary_row("Files:", &files.to_string());
    ui::summary_row("Revision:", record.last_revision.as_deref().unwrap_or("-"));
    ui::summary_row(
        "Last synced:",
        &record
            .last_synced_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    );
    match lease {
        Some(lease) => ui::status(
            Icons::HOURGLASS,
            "Sync running",
            &format!("held by {} since {}", lease.holder, lease.acquired_at.to_rfc3339()),
        ),
        None => ui::status(Icons::SYNC, "State", "idle"),
    }
    Ok(())
}

fn run_repos(app: &App, mode: OutputMode) -> anyhow::Result<()> {
    let repos = app.store.list_repos()?;
    if !mode.is_human() {
        return emit_success(mode, "repos", &repos);
    }
    if repos.is_empty() {
        ui::info("No repositories tracked yet", "run `repoctx sync owner/name`");
        return Ok(());
    }
    println!("{}", ui::repos_table(&repos));
    Ok(())
}

fn run_files(app: &App, repo: &str, mode: OutputMode) -> anyhow::Result<()> {
    let repo = RepoId::parse(repo)?;
    let record = app
        .store
        .get_repo(&repo)?
        .ok_or_else(|| repoctx::Error::RepoNotFound(repo.full_name()))?;
    let files = app.store.list_files(record.id)?;
    if !mode.is_human() {
        return emit_success(mode, "files", &files);
    }
    println!("{}", ui::files_table(&files));
    Ok(())
}

fn finish_sync(repo: &RepoId, outcome: &SyncOutcome, mode: OutputMode, started: Instant) -> anyhow::Result<()> {
    if mode.is_human() {
        print_outcome(&repo.full_name(), outcome);
        ui::timing(started.elapsed());
    } else {
        emit_success(mode, "sync", outcome)?;
    }
    if let SyncOutcome::Completed(report) = outcome {
        if report.status() == RunStatus::Failed {
            anyhow::bail!("every file of {} failed to index", repo);
        }
    }
    Ok(())
}

fn print_outcome(repo: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => ui::success(&format!("{} is up to date", repo)),
        SyncOutcome::Completed(report) => ui::sync_report(report),
        SyncOutcome::AlreadyRunning(progress) => {
            ui::warn(&format!("A sync of {} is already running", repo));
            ui::progress(repo, progress);
        }
    }
}

fn parse_kind(kind: &str) -> anyhow::Result<SymbolKind> {
    kind.parse().map_err(|_| {
        let known: Vec<&str> = SymbolKind::all().iter().map(|k| k.as_str()).collect();
        anyhow::anyhow!("unknown symbol kind '{}' (expected one of: {})", kind, known.join(", "))
    })
}

fn print_meta(meta: &QueryMeta) {
    println!();
    ui::summary_row("Tokens:", &meta.total_tokens.to_string());
    if meta.truncated {
        ui::warn(meta.hint.as_deref().unwrap_or("Response truncated"));
    }
}

fn print_outline(nodes: &[OutlineNode], depth: usize) {
    for node in nodes {
        println!(
            "{}{} {} {} {}",
            "  ".repeat(depth),
            Icons::SYMBOL,
            node.kind,
            node.name,
            ui::muted(&format!("L{}-{} ~{}t", node.start_line, node.end_line, node.token_count))
        );
        print_outline(&node.children, depth + 1);
    }
}

/// Contents of `path`, or stdin when `path` is `-`
fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
