use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tokio::sync::mpsc;

use crate::engine::{Dispatch, Engine, EngineConfig};
use crate::logging;
use crate::runtime::ListView;
use crate::watch::render;

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    /// JSON-lines capture, one feed message per line
    pub file: PathBuf,

    /// List to rebuild; repeat for several (defaults to every list in the capture)
    #[arg(short = 'L', long = "list")]
    pub list: Vec<String>,

    /// Rows printed per list
    #[arg(short, long, default_value_t = 25)]
    pub limit: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: usize,
    pub dropped: usize,
    pub discarded: usize,
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let lists = if args.list.is_empty() {
        discover_lists(&args.file)?
    } else {
        args.list.clone()
    };

    let (outbound, _control) = mpsc::unbounded_channel();
    let mut engine = Engine::new(EngineConfig::default(), outbound);
    let summary = replay_file(&mut engine, &args.file, &lists)?;

    logging::info(
        "replay.done",
        "Capture replayed",
        json!({
            "file": args.file.display().to_string(),
            "lines": summary.lines,
            "dropped": summary.dropped,
            "discarded_before_ready": summary.discarded,
        }),
    );

    for list in &lists {
        if let Some(view) = ListView::capture(&engine, list) {
            println!("{}", render(&view, args.limit));
        }
    }
    Ok(())
}

/// Feed every line of `path` through `engine`, one frame per line.
pub fn replay_file(engine: &mut Engine, path: &Path, lists: &[String]) -> Result<ReplaySummary> {
    let file = File::open(path).with_context(|| format!("failed to open capture {:?}", path))?;
    replay_lines(engine, BufReader::new(file), lists)
}

pub fn replay_lines<R: BufRead>(
    engine: &mut Engine,
    reader: R,
    lists: &[String],
) -> Result<ReplaySummary> {
    let now = Instant::now();
    engine.connected(now);
    for list in lists {
        engine.subscribe(list, now);
    }

    let mut summary = ReplaySummary::default();
    for line in reader.lines() {
        let line = line.context("failed to read capture line")?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;
        match engine.handle_text(&line, now) {
            Dispatch::Dropped(_) => summary.dropped += 1,
            Dispatch::DeltaDiscarded { .. } => summary.discarded += 1,
            _ => {}
        }
        engine.flush_frame();
    }
    Ok(summary)
}

fn discover_lists(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open capture {:?}", path))?;
    let mut lists: Vec<String> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.context("failed to read capture line")?;
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        if let Some(list) = value.get("list").and_then(|list| list.as_str()) {
            if !lists.iter().any(|known| known == list) {
                lists.push(list.to_string());
            }
        }
    }
    Ok(lists)
}
