use crate::config::{self, PortalConfig};
use crate::model::{CourseEntry, GrabConfig, GrabEvent, GrabTarget, RunState, RunStats};
use crate::orchestrator::GrabController;
use crate::portal::PortalClient;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "course-grab",
    version,
    about = "Watch a course section and enroll the moment a seat opens"
)]
pub struct Cli {
    /// Portal base URL (overrides the config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// JSON config file with base URL and session cookies
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Session cookie as NAME=VALUE; repeatable, overrides the config file
    #[arg(long = "cookie", value_parser = config::parse_cookie)]
    pub cookies: Vec<(String, String)>,

    /// Per-request timeout
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Section to grab (the portal's class_id)
    #[arg(long)]
    pub section_id: Option<String>,

    /// Execution id of the section (the portal's do_id)
    #[arg(long)]
    pub execution_id: Option<String>,

    /// Display name used in log lines
    #[arg(long)]
    pub name: Option<String>,

    /// Poll interval in seconds, at most 86400; values under 0.5 are raised to 0.5
    #[arg(long, default_value = "2.0")]
    pub interval: String,

    /// List the enrollment block names with their numbers and exit
    #[arg(long, conflicts_with = "list_block")]
    pub list_blocks: bool,

    /// List the courses of an enrollment block and exit (see --pick)
    #[arg(long)]
    pub list_block: Option<u32>,

    /// Grab the N-th course (1-based) of --list-block instead of exiting
    #[arg(long, requires = "list_block", value_parser = clap::value_parser!(u64).range(1..))]
    pub pick: Option<u64>,

    /// School year for --list-block (defaults to the current one)
    #[arg(long)]
    pub year: Option<i32>,

    /// Term for --list-block
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub term: u8,

    /// Stream progress as plain text (no TUI)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Stream events as JSON lines (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Start grabbing as soon as the TUI opens
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub start_on_launch: bool,
}

impl Cli {
    /// Whether this invocation hands the terminal to the TUI.
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui")
            && !self.text
            && !self.json
            && !self.list_blocks
            && (self.list_block.is_none() || self.pick.is_some())
    }
}

/// Merge the config file with CLI overrides.
pub fn build_portal_config(args: &Cli) -> Result<PortalConfig> {
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(url) = args.base_url.as_ref() {
        cfg.base_url = url.clone();
    }
    for (name, value) in &args.cookies {
        cfg.cookies.insert(name.clone(), value.clone());
    }
    if let Some(t) = args.timeout {
        cfg.timeout = t.into();
    }
    Ok(cfg)
}

/// Current school year and term: autumn term from September, spring term otherwise.
pub fn current_school_term(today: time::Date) -> (i32, u8) {
    if u8::from(today.month()) >= 9 {
        (today.year(), 1)
    } else {
        (today.year() - 1, 2)
    }
}

fn target_from_args(args: &Cli) -> GrabTarget {
    GrabTarget::new(
        args.section_id.clone().unwrap_or_default(),
        args.execution_id.clone().unwrap_or_default(),
        args.name.clone().unwrap_or_default(),
    )
}

pub async fn run(args: Cli) -> Result<()> {
    let portal_cfg = build_portal_config(&args)?;
    let client = PortalClient::new(&portal_cfg).context("build portal client")?;
    tracing::debug!(base_url = client.base_url(), "portal client ready");

    if args.list_blocks {
        let names = client
            .list_block_names()
            .await
            .context("list enrollment blocks (outside the enrollment period?)")?;
        return print_blocks(&names, args.json);
    }

    let target = match args.list_block {
        Some(block) => {
            let courses = list_courses(&client, &args, block).await?;
            match args.pick {
                None => return print_courses(&courses, args.json),
                Some(n) => pick_course(&courses, n)
                    .map(CourseEntry::to_target)
                    .with_context(|| format!("no course #{n} in block {block}"))?,
            }
        }
        None => target_from_args(&args),
    };
    target.validate()?;
    let config: GrabConfig = args.interval.parse()?;

    if args.is_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, client, target, config).await;
        }
    }

    run_text(client, target, config, args.json).await
}

/// 1-based lookup; `0` never matches.
fn pick_course(courses: &[CourseEntry], n: u64) -> Option<&CourseEntry> {
    let idx = usize::try_from(n).ok()?.checked_sub(1)?;
    courses.get(idx)
}

async fn list_courses(client: &PortalClient, args: &Cli, block: u32) -> Result<Vec<CourseEntry>> {
    let today = time::OffsetDateTime::now_utc().date();
    // Block listings are keyed by the school year; the term defaults to 1.
    let (default_year, _) = current_school_term(today);
    let year = args.year.unwrap_or(default_year);
    let term = args.term;
    tracing::info!(year, term, block, "listing block courses");
    client
        .list_block_courses(year, term, block)
        .await
        .with_context(|| format!("list courses of block {block} ({year}, term {term})"))
}

fn print_courses(courses: &[CourseEntry], json: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(courses)?)?;
        return Ok(());
    }
    if courses.is_empty() {
        writeln!(out, "No courses in this block.")?;
    }
    for (idx, c) in courses.iter().enumerate() {
        writeln!(
            out,
            "{}. {} ({})  section={} execution={}",
            idx + 1,
            c.title,
            c.teacher,
            c.class_id,
            c.do_id
        )?;
    }
    Ok(())
}

fn print_blocks(names: &[String], json: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        let numbered: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| serde_json::json!({"block": idx + 1, "name": name}))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&numbered)?)?;
        return Ok(());
    }
    if names.is_empty() {
        writeln!(out, "No enrollment blocks found.")?;
    }
    for (idx, name) in names.iter().enumerate() {
        writeln!(out, "{}. {}", idx + 1, name)?;
    }
    Ok(())
}

/// Human-readable rendering of an event for text mode.
fn render_text(ev: &GrabEvent) -> Option<String> {
    match ev {
        GrabEvent::Log(l) => Some(l.to_line()),
        GrabEvent::Succeeded { target, .. } => Some(format!("Enrolled: {}", target.label())),
        GrabEvent::Cancelled { .. } => Some("Stopped.".into()),
        GrabEvent::Error { message } => Some(message.clone()),
        GrabEvent::Info(msg) => Some(msg.clone()),
        GrabEvent::Seats { .. } | GrabEvent::StateChanged(_) => None,
    }
}

fn summary_line(stats: &RunStats) -> String {
    format!(
        "Queries: {} ({} failed), enrollment attempts: {}",
        stats.queries, stats.failed_queries, stats.enroll_attempts
    )
}

/// Text/JSON mode: run one grab until it succeeds or Ctrl-C stops it.
async fn run_text(
    client: PortalClient,
    target: GrabTarget,
    config: GrabConfig,
    json: bool,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GrabEvent>();
    let mut controller = GrabController::new(Arc::new(client), event_tx);
    controller.start(target, config)?;

    let mut stats: Option<RunStats> = None;
    let mut emit = |ev: GrabEvent| {
        if let GrabEvent::Succeeded { stats: s, .. } | GrabEvent::Cancelled { stats: s } = &ev {
            stats = Some(*s);
        }
        if json {
            match serde_json::to_string(&ev) {
                Ok(line) => {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
                Err(e) => {
                    let _ = out_tx.send(OutputLine::Stderr(format!("encode event: {e}")));
                }
            }
        } else if let Some(line) = render_text(&ev) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    };

    let mut stopping = false;
    let state = loop {
        tokio::select! {
            biased;
            Some(ev) = event_rx.recv() => emit(ev),
            res = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = res {
                    tracing::warn!("ctrl-c handler failed: {e}");
                }
                stopping = true;
                controller.stop();
            }
            state = controller.wait() => break state,
        }
    };
    // Events emitted right before the loop exited.
    while let Ok(ev) = event_rx.try_recv() {
        emit(ev);
    }
    drop(emit);

    if !json {
        if let Some(s) = stats.as_ref() {
            let _ = out_tx.send(OutputLine::Stdout(summary_line(s)));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    match state {
        RunState::Failed => Err(anyhow::anyhow!("grab loop failed")),
        _ => Ok(()),
    }
}
