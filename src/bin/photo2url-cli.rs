use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use photo2url_lib::config::{normalize_base_url, UploadConfig, WatchTarget};
use photo2url_lib::input_validation::validate_api_key;
use photo2url_lib::logging::{LogLevel, LogManager};
use photo2url_lib::system_integration::{
    default_config_path, detect_vrchat_folder, SystemClipboard,
};
use photo2url_lib::upload::{HttpUploadClient, UploadCoordinator, UploadEvent, UploadStats};
use photo2url_lib::AutoUploadMonitor;

/// Activity lines printed in the closing summary
const RECENT_ACTIVITY_LINES: usize = 10;

#[derive(Parser)]
#[command(name = "photo2url-cli")]
#[command(version, about = "Upload screenshots to a self-hosted file server", long_about = None)]
struct Cli {
    /// Files or directories to upload once
    files: Vec<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    server: Option<String>,

    #[arg(short = 'k', long, env = "PHOTO2URL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory to watch for new files (repeatable)
    #[arg(short, long)]
    watch: Vec<PathBuf>,

    /// Keep watching after the given files are uploaded
    #[arg(short = 'f', long)]
    follow: bool,

    #[arg(long)]
    no_recursive: bool,

    /// Check server health and exit
    #[arg(long)]
    check: bool,

    /// List files stored on the server and exit
    #[arg(long)]
    list: bool,

    /// Delete a file from the server by id and exit
    #[arg(long, value_name = "ID")]
    delete: Option<String>,

    /// Show server statistics and exit
    #[arg(long)]
    stats: bool,

    /// Do not copy uploaded URLs to the clipboard
    #[arg(long)]
    no_clipboard: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // 업로드 worker는 일반 스레드에서 이 런타임에 block_on 합니다
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let client = HttpUploadClient::new(&config, runtime.handle().clone())?;

    if cli.check {
        println!("🩺 Checking {}...", client.base_url());
        match runtime.block_on(client.health_check_async()) {
            Ok(body) => {
                println!("✅ Server is healthy");
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }
            Err(e) => anyhow::bail!("Health check failed: {e}"),
        }
    }

    validate_api_key(&config.api_key).context("Set --api-key or PHOTO2URL_API_KEY")?;

    if cli.list || cli.stats || cli.delete.is_some() {
        return run_admin(&cli, &client);
    }

    let recursive = !cli.no_recursive;
    let config = Arc::new(config);
    let coordinator = UploadCoordinator::new(&config, Arc::new(client));
    let mut monitor = AutoUploadMonitor::with_coordinator(Arc::clone(&config), coordinator);

    if config.auto_clipboard && !cli.no_clipboard {
        match SystemClipboard::spawn() {
            Ok(clipboard) => {
                monitor.copy_urls_to(Arc::new(clipboard));
            }
            Err(e) => log::warn!("Auto clipboard disabled: {e:#}"),
        }
    }

    let activity = Arc::new(LogManager::default());
    {
        let activity = Arc::clone(&activity);
        monitor
            .coordinator()
            .subscribe(move |event| activity.record_event(event));
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let stats = Arc::new(Mutex::new(UploadStats::default()));
    {
        let pb = pb.clone();
        let stats = Arc::clone(&stats);
        monitor.coordinator().subscribe(move |event| {
            if let Ok(mut stats) = stats.lock() {
                stats.record(event);
            }
            match event {
                UploadEvent::Progress { status, percent } => {
                    pb.set_position(u64::from(*percent));
                    pb.set_message(status.clone());
                }
                UploadEvent::Success { filename, url, .. } => {
                    pb.println(format!("✅ {filename} -> {url}"));
                    pb.set_position(0);
                    pb.set_message("");
                }
                UploadEvent::Failure { filename, reason } => {
                    pb.println(format!("❌ {filename}: {reason}"));
                    pb.set_position(0);
                    pb.set_message("");
                }
            }
        });
    }
    let events = monitor.coordinator().subscribe_channel();

    if !cli.files.is_empty() {
        let accepted = monitor.upload_paths(&cli.files, recursive);
        pb.println(format!("🚀 Uploading {accepted} file(s) to {}", config.api_base_url));

        let mut finished = 0;
        while finished < accepted {
            let event = events
                .recv()
                .context("Upload worker stopped unexpectedly")?;
            if event.is_terminal() {
                finished += 1;
            }
        }

        if !cli.follow {
            pb.finish_and_clear();
            monitor.shutdown();
            print_stats(&stats);
            print_recent_activity(&activity);
            return Ok(());
        }
    }

    let mut directories = cli.watch.clone();
    if directories.is_empty() && config.watch.is_empty() {
        match detect_vrchat_folder() {
            Some(folder) => directories.push(folder),
            None => anyhow::bail!(
                "No directory to watch. Pass --watch <DIR> or add `watch` entries to the config file"
            ),
        }
    }
    for directory in directories {
        let target = if recursive {
            WatchTarget::new(directory)
        } else {
            WatchTarget::non_recursive(directory)
        };
        monitor
            .add_target(target.clone())
            .with_context(|| format!("Cannot watch {}", target.directory.display()))?;
    }

    monitor.start().context("Failed to start watching")?;
    for target in monitor.targets() {
        pb.println(format!("👀 Watching {}", target.directory.display()));
    }
    pb.println("   Press Ctrl+C to stop");

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl+C")?;

    pb.println("🛑 Stopping...");
    monitor.shutdown();
    pb.finish_and_clear();
    print_stats(&stats);
    print_recent_activity(&activity);

    Ok(())
}

fn run_admin(cli: &Cli, client: &HttpUploadClient) -> anyhow::Result<()> {
    if let Some(file_id) = &cli.delete {
        client
            .delete_file(file_id)
            .with_context(|| format!("Failed to delete {file_id}"))?;
        println!("🗑️  Deleted {file_id}");
    }

    if cli.list {
        let files = client.list_files().context("Failed to list files")?;
        println!("📁 {} file(s) on {}", files.len(), client.base_url());
        println!("{:<38} {:<40} {}", "ID", "FILENAME", "URL");
        println!("{}", "-".repeat(100));
        for file in &files {
            println!(
                "{:<38} {:<40} {}",
                json_field(file, "id"),
                json_field(file, "filename"),
                json_field(file, "url")
            );
        }
    }

    if cli.stats {
        let stats = client.server_stats().context("Failed to get server statistics")?;
        println!("📊 Server statistics:");
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}

fn json_field(value: &serde_json::Value, key: &str) -> String {
    match value.get(key) {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<UploadConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => UploadConfig::load_or_default(&path)?,
        None => UploadConfig::default(),
    };

    if let Some(server) = &cli.server {
        config.api_base_url = normalize_base_url(server);
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = api_key.clone();
    }
    config.validate()?;

    Ok(config)
}

fn print_stats(stats: &Mutex<UploadStats>) {
    let Ok(stats) = stats.lock() else {
        return;
    };
    println!("📊 Results:");
    println!("   Uploaded: {}", stats.successful);
    println!("   Failed: {}", stats.failed);
    println!("   Bytes uploaded: {:.1} MB", stats.total_bytes as f64 / 1_048_576.0);
    if stats.total > 0 {
        println!("   Success rate: {:.1}%", stats.success_rate());
    }
}

fn print_recent_activity(activity: &LogManager) {
    let total = activity.len();
    if total == 0 {
        return;
    }
    println!("📝 Recent activity:");
    let start = total.saturating_sub(RECENT_ACTIVITY_LINES);
    for entry in activity.get_logs_paginated(None, start, RECENT_ACTIVITY_LINES) {
        let icon = match entry.level {
            LogLevel::Success => "✅",
            LogLevel::Error => "❌",
            LogLevel::Warning => "⚠️ ",
            LogLevel::Info => "ℹ️ ",
        };
        println!("   {} [{}] {}", icon, entry.timestamp, entry.message);
    }
}
