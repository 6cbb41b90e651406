use std::{io, process};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn, LevelFilter};
use torrent_file_tree::{
    config::{build_config, AppConfig, Cli},
    flatten::ExpansionState,
    model::{NameOverride, NoOverride, PrivacyMask},
    render,
    search::{flatten_matching, MatchCache},
    source,
    tree::build_tree_with,
    tui,
};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    init_logging(config.log_level);
    if config.print {
        print_tree(&config)
    } else {
        tui::run(config)
    }
}

fn print_tree(config: &AppConfig) -> Result<()> {
    let items = source::load_items(&config.input)
        .with_context(|| format!("failed to load {}", config.input.display()))?;
    let overrides: &dyn NameOverride = if config.privacy {
        &PrivacyMask
    } else {
        &NoOverride
    };
    let tree = build_tree_with(items.iter(), overrides);
    for skipped in &tree.skipped {
        warn!("skipping {:?}: {}", skipped.path, skipped.reason.label());
    }
    let expansion = ExpansionState::new(config.expand_new).reconcile(&tree.branch_ids);
    let matches = MatchCache::new(&tree.roots, config.search.as_deref().unwrap_or_default());
    let rows = flatten_matching(&tree.roots, &expansion, &matches);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render::write_rows(&mut out, &rows, &expansion).context("failed to write tree")?;

    let total = tree.total();
    info!(
        "{} files, {} rows, {}/{} included",
        total.total,
        rows.len(),
        total.included,
        total.total
    );
    Ok(())
}

fn init_logging(level: LevelFilter) {
    let env = Env::default().default_filter_or(level.to_string());
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
