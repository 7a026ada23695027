use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use indicatif::{ProgressBar, ProgressStyle};
use scopewalk_core::crawl::{CrawlOptions, execute_crawl};
use scopewalk_core::data::Database;
use scopewalk_core::model::{Target, TargetPatch, UrlRecord};
use scopewalk_engine::Kind;
use scopewalk_engine::engine::CrawlStatus;
use scopewalk_engine::url::QueryMode;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let matches = cmd.get_matches();

    match matches.subcommand() {
        Some(("init", sub)) => handle_init(sub),
        Some(("crawl", sub)) => handle_crawl(sub).await,
        Some(("resume", sub)) => handle_resume(sub).await,
        Some(("targets", sub)) => handle_targets(sub),
        Some(("list", sub)) => handle_list(sub),
        Some(("set", sub)) => handle_set(sub),
        Some(("reset", sub)) => handle_reset(sub),
        None => {
            println!("scopewalk {} - run with --help for usage", env!("CARGO_PKG_VERSION"));
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

fn database_path(args: &ArgMatches) -> PathBuf {
    let dir = args
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.config/scopewalk/");
    let expanded = shellexpand::tilde(dir);
    PathBuf::from(expanded.as_ref()).join("scopewalk.db")
}

fn open_database(args: &ArgMatches) -> Arc<Database> {
    let path = database_path(args);
    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("{} cannot create {}: {}", "error:".red(), parent.display(), e);
        std::process::exit(1);
    }
    match Database::new(&path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("{} cannot open {}: {}", "error:".red(), path.display(), e);
            std::process::exit(1);
        }
    }
}

// Handler functions

fn handle_init(args: &ArgMatches) {
    let path = database_path(args);
    let force = args.get_flag("force");

    if Database::exists(&path) && !force {
        println!("Database already exists at {}", path.display());
        println!("Re-run with --force to recreate it.");
        return;
    }
    if Database::exists(&path) && force
        && let Err(e) = fs::remove_file(&path)
    {
        eprintln!("{} cannot remove {}: {}", "error:".red(), path.display(), e);
        std::process::exit(1);
    }

    let db = open_database(args);
    drop(db);
    println!("{} database initialized at {}", "ok:".green(), path.display());
}

async fn handle_crawl(args: &ArgMatches) {
    tracing_subscriber::fmt::init();
    let db = open_database(args);

    let url = args.get_one::<Url>("url").unwrap();
    let scope = args.get_one::<String>("scope").cloned();
    let depth = *args.get_one::<u32>("depth").unwrap();
    let rate = *args.get_one::<u64>("rate").unwrap();
    let timeout = *args.get_one::<u64>("timeout").unwrap();
    let quiet = args.get_flag("quiet");

    let spinner = crawl_spinner(quiet, format!("Crawling {}", url));
    let progress = spinner_progress(&spinner);

    let options = CrawlOptions {
        seed_url: url.to_string(),
        scope_path: scope,
        max_depth: depth,
        rate_ms: rate,
        timeout_secs: timeout,
    };

    match execute_crawl(db, options, progress).await {
        Ok(summary) => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            println!("\n{} crawl of {} finished", "ok:".green(), summary.target_id.bold());
            println!("  visited: {}", summary.visited);
            println!(
                "  cataloged: {} total ({} pages, {} api, {} assets)",
                summary.counters.total,
                summary.counters.page.to_string().green(),
                summary.counters.api.to_string().cyan(),
                summary.counters.asset.to_string().dimmed(),
            );
            if let Some(reason) = summary.reason {
                println!("  stopped early: {}", reason.as_str().yellow());
            }
        }
        Err(e) => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            eprintln!("{} crawl failed: {}", "error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn crawl_spinner(quiet: bool, message: String) -> Option<Arc<ProgressBar>> {
    if quiet {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    Some(Arc::new(pb))
}

fn spinner_progress(
    spinner: &Option<Arc<ProgressBar>>,
) -> Option<scopewalk_core::crawl::CrawlProgressCallback> {
    spinner.clone().map(|pb| {
        Arc::new(move |status: CrawlStatus| {
            pb.set_message(format!(
                "visited {}, queued {}{}",
                status.visited,
                status.queue_len,
                status
                    .visiting
                    .as_ref()
                    .map(|v| format!(": {}", v.url))
                    .unwrap_or_default()
            ));
        }) as scopewalk_core::crawl::CrawlProgressCallback
    })
}

async fn handle_resume(args: &ArgMatches) {
    tracing_subscriber::fmt::init();
    let db = open_database(args);
    let quiet = args.get_flag("quiet");

    let spinner = crawl_spinner(quiet, "Resuming interrupted crawls".to_string());
    let progress = spinner_progress(&spinner);

    match scopewalk_core::resume_crawls(db, progress).await {
        Ok(0) => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            println!("Nothing to resume.");
        }
        Ok(resumed) => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            println!(
                "{} resumed {} crawl{} to completion",
                "ok:".green(),
                resumed,
                if resumed == 1 { "" } else { "s" },
            );
        }
        Err(e) => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            eprintln!("{} resume failed: {}", "error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn handle_targets(args: &ArgMatches) {
    let db = open_database(args);
    let targets = match db.list_targets() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            std::process::exit(1);
        }
    };
    if targets.is_empty() {
        println!("No targets yet. Run a crawl first.");
        return;
    }
    for target in targets {
        print_target(&target);
    }
}

fn print_target(target: &Target) {
    println!("{}", target.id.bold());
    println!(
        "  {} total ({} pages, {} api, {} assets), cap {}",
        target.counters.total,
        target.counters.page,
        target.counters.api,
        target.counters.asset,
        if target.settings.max_urls == 0 {
            "unlimited".to_string()
        } else {
            target.settings.max_urls.to_string()
        },
    );
    println!(
        "  created {}, query {}, hash {}, assets {}{}",
        format_ts(target.created_at),
        target.settings.normalize_query.as_str(),
        if target.settings.ignore_hash { "ignored" } else { "kept" },
        if target.settings.exclude_assets { "excluded" } else { "stored" },
        if target.settings.deep_mode { ", deep mode" } else { "" },
    );
}

fn handle_list(args: &ArgMatches) {
    let db = open_database(args);
    let target_id = args.get_one::<String>("target").unwrap();
    let contains = args.get_one::<String>("contains").map(String::as_str);
    let kinds = args.get_one::<String>("kind").map(|raw| parse_kinds(raw));
    let as_json = args.get_flag("json");

    let records = match db.list_records(target_id, kinds.as_deref(), contains) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            std::process::exit(1);
        }
    };

    if as_json {
        match serde_json::to_string_pretty(&records) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{} {}", "error:".red(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    if records.is_empty() {
        println!("No records match.");
        return;
    }
    for rec in &records {
        print_record(rec);
    }
    println!("\n{} records", records.len());
}

fn print_record(rec: &UrlRecord) {
    let kind = match rec.kind {
        Kind::Page => "page ".green(),
        Kind::Api => "api  ".cyan(),
        Kind::Asset => "asset".dimmed(),
    };
    let status = rec
        .status
        .map(|s| format!(" [{}]", s))
        .unwrap_or_default();
    println!(
        "  {} {}{} {} {}",
        kind,
        rec.canonical_href,
        status,
        rec.discovered_via.dimmed(),
        format_ts(rec.ts).dimmed(),
    );
}

fn handle_set(args: &ArgMatches) {
    let db = open_database(args);
    let target_id = args.get_one::<String>("target").unwrap();

    let patch = TargetPatch {
        ignore_hash: args.get_one::<bool>("ignore-hash").copied(),
        exclude_assets: args.get_one::<bool>("exclude-assets").copied(),
        normalize_query: args
            .get_one::<String>("query")
            .and_then(|s| QueryMode::parse(s)),
        max_urls: args.get_one::<u32>("max-urls").copied(),
        deep_mode: args.get_one::<bool>("deep").copied(),
    };
    if patch.is_empty() {
        println!("Nothing to change. Pass at least one setting flag.");
        return;
    }

    match db.update_target(target_id, &patch) {
        Ok(Some(target)) => {
            println!("{} settings updated", "ok:".green());
            print_target(&target);
        }
        Ok(None) => {
            eprintln!("{} unknown target: {}", "error:".red(), target_id);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn handle_reset(args: &ArgMatches) {
    let db = open_database(args);
    let target_id = args.get_one::<String>("target").unwrap();
    match db.reset_target(target_id) {
        Ok(()) => println!("{} records cleared for {}", "ok:".green(), target_id),
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            std::process::exit(1);
        }
    }
}

fn parse_kinds(raw: &str) -> Vec<Kind> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Kind::parse(s) {
            Some(kind) => Some(kind),
            None => {
                eprintln!("{} unknown kind: {} (expected page, api or asset)", "error:".red(), s);
                std::process::exit(1);
            }
        })
        .collect()
}

fn format_ts(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
