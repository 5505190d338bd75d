//! chatbatch 入口
//!
//! `chatbatch run`（默认）：检查环境、备份表格、启动浏览器、等待登录后处理所有待处理请求。
//! `chatbatch status`：打印表格统计。`chatbatch backups [--restore <file>]`：列出或恢复备份。

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};

use chatbatch::config::{load_config, AppConfig};
use chatbatch::observability;
use chatbatch::sheet::{BackupManager, CsvSheet};

/// 把表格中的提示词逐条提交给网页版对话助手
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 请求表路径（覆盖配置中的 sheet.path）
    #[arg(short, long)]
    sheet: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 处理所有待处理请求
    Run,
    /// 打印请求表统计
    Status,
    /// 列出备份，或用指定备份覆盖请求表
    Backups {
        #[arg(long)]
        restore: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config).context("Failed to load config")?;
    if let Some(sheet) = cli.sheet {
        cfg.sheet.path = sheet;
    }
    let _log_guard = observability::init(&cfg.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cfg).await,
        Command::Status => status(&cfg),
        Command::Backups { restore } => backups(&cfg, restore),
    }
}

fn status(cfg: &AppConfig) -> anyhow::Result<()> {
    let sheet = CsvSheet::load(&cfg.sheet.path)
        .with_context(|| format!("Failed to open {}", cfg.sheet.path.display()))?;
    let s = sheet.statistics();
    println!("Sheet:       {}", cfg.sheet.path.display());
    println!("Requests:    {}", s.total);
    println!("Success:     {}", s.success);
    println!("Errors:      {}", s.errors);
    println!("In progress: {}", s.in_progress);
    println!("Pending:     {}", s.pending);
    Ok(())
}

fn backups(cfg: &AppConfig, restore: Option<PathBuf>) -> anyhow::Result<()> {
    let manager = BackupManager::new(&cfg.backup.dir, cfg.backup.keep_last);
    if let Some(backup) = restore {
        manager
            .restore(&backup, &cfg.sheet.path)
            .with_context(|| format!("Failed to restore {}", backup.display()))?;
        println!("Restored {} -> {}", backup.display(), cfg.sheet.path.display());
        return Ok(());
    }

    let entries = manager.list().context("Failed to list backups")?;
    if entries.is_empty() {
        println!("No backups in {}", manager.dir().display());
    }
    for entry in entries {
        let modified: DateTime<Local> = entry.modified.into();
        println!(
            "{}  {:>9} B  {}",
            modified.format("%Y-%m-%d %H:%M:%S"),
            entry.size,
            entry.path.display()
        );
    }
    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn run(_cfg: &AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("chatbatch was built without the `browser` feature; rebuild with --features browser")
}

#[cfg(feature = "browser")]
async fn run(cfg: &AppConfig) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use chatbatch::core::{BatchDriver, RequestLifecycle, ShutdownManager, Sleeper, TokioSleeper};
    use chatbatch::operator::{ConsoleOperator, Operator};
    use chatbatch::page::{ChatPage, ChromePage, PageDriver};
    use chatbatch::preflight::Preflight;
    use chatbatch::sheet::RequestSource;

    let report = Preflight::run(cfg);
    report.log();
    if !report.is_ok() {
        anyhow::bail!("Preflight failed with {} error(s)", report.errors.len());
    }

    if cfg.backup.enabled {
        BackupManager::new(&cfg.backup.dir, cfg.backup.keep_last)
            .create(&cfg.sheet.path)
            .context("Failed to back up sheet")?;
    }

    let mut sheet = CsvSheet::load(&cfg.sheet.path)
        .with_context(|| format!("Failed to open {}", cfg.sheet.path.display()))?;
    let pending = sheet.pending().len();
    if pending == 0 {
        tracing::info!("all requests already processed");
        return Ok(());
    }
    tracing::info!(pending, "requests to process");

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let chrome = ChromePage::launch(&cfg.browser)
        .await
        .context("Failed to launch browser")?;
    chrome
        .navigate(&cfg.app.start_url)
        .await
        .context("Failed to open start page")?;

    let operator: Arc<dyn Operator> = Arc::new(ConsoleOperator);
    operator
        .acknowledge("Log in to the chat service in the browser window if needed.")
        .await;
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    sleeper.sleep(Duration::from_secs(cfg.app.login_settle_secs)).await;

    let page = Arc::new(ChatPage::new(
        Arc::new(chrome),
        cfg.selectors.clone(),
        cfg.timeouts.element_wait(),
        cfg.reader.stale_retries,
        sleeper.clone(),
    ));
    let lifecycle = RequestLifecycle::new(page, operator.clone(), sleeper.clone(), cfg);
    let mut driver = BatchDriver::new(lifecycle, operator.clone(), sleeper, shutdown.token(), cfg);

    let summary = driver.run(&mut sheet).await.context("Batch run failed")?;
    let stats = sheet.statistics();
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        aborted = summary.aborted,
        sheet_success = stats.success,
        sheet_errors = stats.errors,
        sheet_pending = stats.pending + stats.in_progress,
        "run complete"
    );
    if let Some(reason) = shutdown.reason() {
        tracing::warn!(?reason, "run interrupted; in-progress rows will be retried next run");
    }

    if !shutdown.is_shutdown() {
        operator.acknowledge("Batch finished. The browser will close.").await;
    }
    Ok(())
}
