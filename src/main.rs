//! 漫画下载器：把多个章节的页面图片按顺序打包为一个 CBZ 或 EPUB 文件。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/输出文件等基础设施
//! - `download`：下载流程编排（规划、并发抓取、按序交给编码器）
//! - `book_parser`：归档编码（cbz/epub）
//! - `network_parser`：站点访问（浏览器会话、搜索与详情）

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod base_system;
mod book_parser;
mod download;
mod network_parser;

use base_system::config::{load_or_create, load_or_create_with_base};
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use download::downloader::{DownloadOptions, download_to_dir};
use download::models::{DownloadJob, OutputFormat};
use network_parser::browser::{BrowserOptions, BrowserSource};
use network_parser::comic_info;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "comic-downloader", version)]
#[command(about = "Comic downloader (CBZ / EPUB)")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TextFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ArchiveFormat {
    Cbz,
    Epub,
}

impl From<ArchiveFormat> for OutputFormat {
    fn from(value: ArchiveFormat) -> Self {
        match value {
            ArchiveFormat::Cbz => OutputFormat::Cbz,
            ArchiveFormat::Epub => OutputFormat::Epub,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 按关键字搜索作品
    Search {
        #[arg(long, value_enum, default_value_t = TextFormat::Text)]
        format: TextFormat,
        keyword: String,
    },
    /// 查看作品详情与章节列表
    Info {
        #[arg(long, value_enum, default_value_t = TextFormat::Text)]
        format: TextFormat,
        comic_id: String,
    },
    /// 下载章节并打包
    Download {
        /// 输出格式，缺省时使用配置文件中的 default_format
        #[arg(long, value_enum)]
        format: Option<ArchiveFormat>,
        /// 并发线程数，优先于环境变量与配置文件
        #[arg(long)]
        workers: Option<usize>,
        /// 输出目录，缺省时使用配置文件中的 save_path
        #[arg(long)]
        output_dir: Option<PathBuf>,
        comic_id: String,
        title: String,
        #[arg(required = true)]
        chapter_ids: Vec<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.as_deref();
    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "comic-downloader v{}", VERSION);

    let config = if let Some(dir) = data_dir {
        load_or_create_with_base::<Config>(None, Some(dir)).map_err(|e| anyhow!(e.to_string()))?
    } else {
        load_or_create::<Config>(None).map_err(|e| anyhow!(e.to_string()))?
    };

    let code = exit_code(run(cli.command, &config, &log));
    log.safe_exit();
    Ok(code)
}

/// 任务失败只在这里输出一次错误。
fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config, log: &LogSystem) -> Result<()> {
    let browser = || {
        BrowserSource::launch(BrowserOptions {
            headless: config.headless,
            timeout: config.page_timeout(),
        })
        .context("无法启动浏览器")
    };

    match command {
        Command::Search { format, keyword } => {
            let source = browser()?;
            let results = comic_info::search(&source, &keyword)
                .with_context(|| format!("搜索 {keyword} 失败"))?;
            match format {
                TextFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                TextFormat::Text => print!("{}", comic_info::search_results_to_plain_text(&results)),
            }
        }
        Command::Info { format, comic_id } => {
            let source = browser()?;
            let info = comic_info::fetch_comic_info(&source, &comic_id)
                .with_context(|| format!("读取作品 {comic_id} 失败"))?;
            match format {
                TextFormat::Json => println!("{}", info.to_json()?),
                TextFormat::Text => print!("{}", info.to_plain_text()),
            }
        }
        Command::Download {
            format,
            workers,
            output_dir,
            comic_id,
            title,
            chapter_ids,
        } => {
            let format = match format {
                Some(f) => f.into(),
                None => config
                    .default_format
                    .parse::<OutputFormat>()
                    .map_err(|e| anyhow!(e))?,
            };
            let job = DownloadJob {
                work_id: comic_id,
                title,
                format,
                chapter_ids,
            };
            let dir = output_dir.unwrap_or_else(|| config.default_save_dir());
            let options = DownloadOptions::from_config(config, workers, Some(log.interrupt_flag()));
            info!(
                target: "startup",
                work_id = %job.work_id,
                chapters = job.chapter_ids.len(),
                workers = options.workers,
                "开始下载 {}",
                job.format
            );

            let source = browser()?;
            let (path, summary) = download_to_dir(&source, &job, &options, &dir)
                .with_context(|| format!("下载《{}》失败", job.title))?;
            println!("{}", path.display());
            info!(
                chapters = summary.chapters,
                pages = summary.pages,
                bytes = summary.bytes,
                "下载完成"
            );
        }
    }
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    match base_dir {
        Some(dir) => LogSystem::init_with_base(opts, Some(dir)),
        None => LogSystem::init(opts),
    }
    .map_err(|e| anyhow!(e))
}
