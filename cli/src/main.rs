mod events;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;

use seqwatch::api::{HttpJobApi, JobApi};
use seqwatch::config::{load_config_or_default, ClientConfig};
use seqwatch::download::{download_file, download_result, DownloadTarget};
use seqwatch::events::{ClientEvent, EventBus};
use seqwatch::health::{check_health, HealthMonitor};
use seqwatch::history::HistoryTracker;
use seqwatch::model::{AlignJob, AlignRequest, AlignTool, Upload};
use seqwatch::sync::{BoardSnapshot, JobBoard};
use seqwatch::tracker::{TaskTracker, TrackedTask};

/// seqwatch - follow sequence alignment jobs
#[derive(Parser, Debug)]
#[command(name = "seqwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the configuration)
    #[arg(long)]
    api_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check backend health
    Health,

    /// List stored files
    Files,

    /// Upload an input file
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// Start an alignment for an uploaded file
    Align {
        /// File id returned by upload
        file_id: String,

        /// Alignment tool (mafft, uclust, vsearch)
        #[arg(short, long)]
        tool: AlignTool,

        /// Raw tool options
        #[arg(short, long, default_value = "")]
        options: String,
    },

    /// Start an analysis for an upload
    Analyze {
        /// Upload id
        upload_id: i64,

        /// Alignment tool (mafft, uclust, vsearch)
        #[arg(short, long)]
        tool: AlignTool,

        /// Follow the task until it finishes
        #[arg(short, long)]
        follow: bool,
    },

    /// Show one page of alignment jobs
    #[command(alias = "ls")]
    Jobs {
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Show the status of a task
    Status {
        task_id: String,

        /// Tool the task was started with
        #[arg(short, long, default_value = "mafft")]
        tool: AlignTool,

        /// Keep polling until the task finishes
        #[arg(short, long)]
        follow: bool,
    },

    /// Keep a job page live until Ctrl-C
    Watch {
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Show uploads and their analyses
    History {
        /// Keep refreshing until every analysis has finished
        #[arg(short, long)]
        watch: bool,
    },

    /// Download an analysis result file
    Download {
        filename: String,

        /// Target directory (defaults to the configured download directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Download a stored file by id
    Fetch {
        file_id: String,

        /// Name to save the file under
        #[arg(short, long)]
        name: Option<String>,

        /// Target directory (defaults to the configured download directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    seqwatch::init_logging(cli.json_logs).context("Failed to initialise logging")?;

    let mut config = load_config_or_default(cli.config.as_deref())?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    info!(
        "Using backend {}",
        seqwatch::sanitize::redact_url(&config.api_url)
    );

    let api: Arc<dyn JobApi> = Arc::new(HttpJobApi::from_config(&config)?);
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Health => {
            let health = check_health(api.as_ref()).await;
            out.print(&health, || {
                println!("{:?} {}", health.status, health.details);
            })?;
            if !health.is_up() {
                bail!("backend is down");
            }
        }
        Commands::Files => {
            let files = api.list_files().await?;
            out.print(&files, || {
                for f in &files {
                    println!(
                        "{:>6}  {:<40} {:>10}  {}",
                        f.id, f.filename, f.size, f.created_at
                    );
                }
            })?;
        }
        Commands::Upload { path } => {
            let uploaded = api.upload_file(&path).await?;
            out.print(&uploaded, || {
                println!("{} {} ({} bytes)", uploaded.file_id, uploaded.file_name, uploaded.size);
            })?;
        }
        Commands::Align {
            file_id,
            tool,
            options,
        } => {
            let request = AlignRequest {
                user_id: config.user_id,
                align_tool: tool,
                options,
            };
            let submitted = api.start_alignment(&file_id, &request).await?;
            out.print(&submitted, || {
                println!("{} {}", submitted.task_id, submitted.status);
            })?;
        }
        Commands::Analyze {
            upload_id,
            tool,
            follow,
        } => {
            let bus = EventBus::default();
            let _bridge = events::start_event_bridge(&bus);
            let tracker = TaskTracker::new(api, bus, config.polling.task_status());
            let rx = tracker.start_analysis(tool, upload_id).await?;
            let task = rx.borrow().clone();
            if follow {
                follow_task(rx, &out).await?;
            } else {
                out.print(&task, || println!("{} {}", task.task_id, task.status))?;
            }
        }
        Commands::Jobs { page } => {
            let listing = api.list_jobs(page.max(1), config.page_size).await?;
            out.print(&listing, || {
                print_jobs(&listing.content);
                println!(
                    "page {}/{} ({} jobs)",
                    listing.page, listing.total_pages, listing.total_elements
                );
            })?;
        }
        Commands::Status {
            task_id,
            tool,
            follow,
        } => {
            if follow {
                let bus = EventBus::default();
                let _bridge = events::start_event_bridge(&bus);
                let tracker = TaskTracker::new(api, bus, config.polling.task_status());
                let rx = tracker.follow(&task_id, tool)?;
                follow_task(rx, &out).await?;
            } else {
                let status = api.task_status(&task_id).await?;
                out.print(&status, || {
                    println!("{} {}", task_id, status.status);
                    if let Some(file) = status.result_file() {
                        println!("result: {}", file);
                    }
                    if let Some(err) = status.error_message() {
                        println!("error: {}", err);
                    }
                })?;
            }
        }
        Commands::Watch { page } => watch(api, &config, page, &out).await?,
        Commands::History { watch: false } => {
            let uploads = api.list_uploads().await?;
            out.print(&uploads, || print_history(&uploads))?;
        }
        Commands::History { watch: true } => watch_history(api, &config, &out).await?,
        Commands::Download { filename, dir } => {
            let target = download_target(dir, &config);
            let path = download_result(api.as_ref(), &filename, &target).await?;
            println!("{}", path.display());
        }
        Commands::Fetch { file_id, name, dir } => {
            let target = download_target(dir, &config);
            let name = name.unwrap_or_else(|| file_id.clone());
            let path = download_file(api.as_ref(), &file_id, &name, &target).await?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

struct Output {
    json: bool,
}

impl Output {
    fn print<T: Serialize>(&self, value: &T, plain: impl FnOnce()) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            plain();
        }
        Ok(())
    }
}

fn download_target(dir: Option<PathBuf>, config: &ClientConfig) -> DownloadTarget {
    match dir {
        Some(dir) => DownloadTarget::new(dir),
        None => DownloadTarget::from_config(config.download_dir.as_deref()),
    }
}

fn ctrl_c() -> anyhow::Result<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    let handler = Arc::clone(&notify);
    ctrlc::set_handler(move || handler.notify_one()).context("Failed to set Ctrl-C handler")?;
    Ok(notify)
}

async fn follow_task(
    mut rx: tokio::sync::watch::Receiver<TrackedTask>,
    out: &Output,
) -> anyhow::Result<()> {
    let stop = ctrl_c()?;
    let first = rx.borrow_and_update().clone();
    print_task(&first, out)?;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let task = rx.borrow_and_update().clone();
                print_task(&task, out)?;
                if task.is_terminal() {
                    break;
                }
            }
            _ = stop.notified() => break,
        }
    }
    Ok(())
}

fn print_task(task: &TrackedTask, out: &Output) -> anyhow::Result<()> {
    out.print(task, || {
        let progress = task
            .progress
            .map(|p| format!(" {:.0}%", p))
            .unwrap_or_default();
        println!("{} {} {}{}", task.task_id, task.tool, task.status, progress);
        if let Some(file) = &task.result_file {
            println!("result: {}", file);
        }
        if let Some(err) = &task.error {
            println!("error: {}", err);
        }
    })
}

async fn watch(
    api: Arc<dyn JobApi>,
    config: &ClientConfig,
    page: u32,
    out: &Output,
) -> anyhow::Result<()> {
    let stop = ctrl_c()?;
    let bus = EventBus::default();
    let _bridge = events::start_event_bridge(&bus);
    let mut rx = bus.subscribe();

    let _health = HealthMonitor::spawn(
        Arc::clone(&api),
        Duration::from_millis(config.health.interval_ms),
        bus.clone(),
    )?;
    let board = JobBoard::start(api, config, bus.clone()).await?;
    if page > 1 {
        board.go_to_page(page).await?;
    }
    print_board(&board.snapshot(), out)?;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(ClientEvent::WindowChanged { .. }) => print_board(&board.snapshot(), out)?,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => print_board(&board.snapshot(), out)?,
                Err(RecvError::Closed) => break,
            },
            _ = stop.notified() => break,
        }
    }

    board.shutdown();
    Ok(())
}

async fn watch_history(
    api: Arc<dyn JobApi>,
    config: &ClientConfig,
    out: &Output,
) -> anyhow::Result<()> {
    let stop = ctrl_c()?;
    let bus = EventBus::default();
    let _bridge = events::start_event_bridge(&bus);

    let history = HistoryTracker::start(api, config, bus).await?;
    let mut shown = history.uploads();
    out.print(&shown, || print_history(&shown))?;

    while history.is_polling() {
        tokio::select! {
            _ = tokio::time::sleep(config.polling.fast()) => {
                let uploads = history.uploads();
                if uploads != shown {
                    out.print(&uploads, || print_history(&uploads))?;
                    shown = uploads;
                }
            }
            _ = stop.notified() => break,
        }
    }

    let uploads = history.uploads();
    if uploads != shown {
        out.print(&uploads, || print_history(&uploads))?;
    }
    history.shutdown();
    Ok(())
}

fn print_board(snapshot: &BoardSnapshot, out: &Output) -> anyhow::Result<()> {
    out.print(snapshot, || {
        println!();
        print_jobs(&snapshot.jobs);
        let polling = if snapshot.polling_enabled {
            format!("polling every {}s", snapshot.poll_interval.as_secs())
        } else {
            "polling paused".to_string()
        };
        println!(
            "page {}/{} ({} jobs), {}",
            snapshot.pagination.current_page,
            snapshot.pagination.total_pages,
            snapshot.pagination.total_items,
            polling
        );
    })
}

fn print_jobs(jobs: &[AlignJob]) {
    for job in jobs {
        let tool = job.align_tool.map(|t| t.as_str()).unwrap_or("-");
        let progress = job
            .progress
            .map(|p| format!("{:.0}%", p))
            .unwrap_or_default();
        println!(
            "{:<38} {:<8} {:<8} {:>5}  {}",
            job.task_id,
            tool,
            job.status.to_string(),
            progress,
            job.created_at
        );
        if let Some(message) = &job.message {
            println!("    {}", message);
        }
    }
}

fn print_history(uploads: &[Upload]) {
    for upload in uploads {
        println!("{:>6}  {}  {}", upload.id, upload.filename, upload.created_at);
        for analysis in &upload.analyses {
            let detail = analysis
                .result_file
                .as_deref()
                .or(analysis.error.as_deref())
                .unwrap_or("");
            println!(
                "        {:<8} {:<8} {}",
                analysis.method.to_string(),
                analysis.status.to_string(),
                detail
            );
        }
    }
}
