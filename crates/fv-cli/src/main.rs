//! fv: fragvault operator CLI
//!
//! Commands:
//!   upload <path>           - fragment, encrypt and store a local file
//!   download <file-id>      - fetch, decrypt and reassemble a file
//!   list                    - committed files of the owner, newest first
//!   delete <file-id>        - remove a file's fragments and record
//!   validate                - report damaged records and missing fragments
//!   cleanup                 - delete everything `validate` reports as damaged
//!   links <file-id>         - presigned fragment URLs (S3 only)
//!   health                  - probe the storage backend
//!   config show             - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fv_core::config::FvConfig;
use fv_core::FvError;
use fv_engine::{FileService, JsonMetadataStore, MemoryMetadataStore, MetadataStore};
use fv_storage::{BlobStore, OpendalBlobStore, S3Credentials};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fv",
    version,
    about = "fragvault: fragmented, per-fragment encrypted file storage",
    long_about = "fv: upload, download and maintain files stored as independently encrypted fragments"
)]
struct Cli {
    /// Path to fragvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FV_CONFIG",
        default_value = "~/.config/fragvault/fragvault.toml"
    )]
    config: PathBuf,

    /// Owner id all file operations are scoped to
    #[arg(long, env = "FV_OWNER")]
    owner: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "FV_LOG")]
    log: Option<String>,

    /// Log format; overrides logging.format
    #[arg(long, env = "FV_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fragment, encrypt and upload a local file
    ///
    /// S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
    /// (or FV_ACCESS_KEY_ID and FV_SECRET_ACCESS_KEY).
    Upload {
        /// Local file
        path: PathBuf,
        /// Stored file name (default: the local file name)
        #[arg(long)]
        name: Option<String>,
        /// MIME type (default: application/octet-stream)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Download and reassemble a file
    Download {
        file_id: String,
        /// Output path (default: the stored file name in the current directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// List committed files, newest first
    List,

    /// Delete a file and its fragments
    Delete { file_id: String },

    /// Check every record for damage and missing fragments
    Validate,

    /// Delete records that fail validation, with their fragments
    Cleanup,

    /// Print presigned read URLs for each fragment of a file
    Links { file_id: String },

    /// Probe the storage backend
    Health,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<FvError>())
                .map(|fv| fv.kind().as_str())
                .unwrap_or("error");
            eprintln!("error [{kind}]: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match cli.log_format {
        Some(f) => f,
        None if config.logging.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        backend = %config.storage.backend,
        "fv starting"
    );

    let owner = cli.owner.as_deref();
    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Health => cmd_health(&config).await,
        Commands::Upload { path, name, mime } => {
            let (owner, service) = session(owner, &config)?;
            cmd_upload(&service, owner, &path, name, mime.as_deref()).await
        }
        Commands::Download { file_id, out } => {
            let (owner, service) = session(owner, &config)?;
            cmd_download(&service, owner, &file_id, out).await
        }
        Commands::List => {
            let (owner, service) = session(owner, &config)?;
            print_json(&service.list(owner).await?)
        }
        Commands::Delete { file_id } => {
            let (owner, service) = session(owner, &config)?;
            print_json(&service.delete(owner, &file_id).await?)
        }
        Commands::Validate => {
            let (owner, service) = session(owner, &config)?;
            print_json(&service.validate(owner).await?)
        }
        Commands::Cleanup => {
            let (owner, service) = session(owner, &config)?;
            print_json(&service.cleanup(owner).await?)
        }
        Commands::Links { file_id } => {
            let (owner, service) = session(owner, &config)?;
            print_json(&service.fragment_links(owner, &file_id).await?)
        }
    }
}

/// Owner id plus a service wired from config, for owner-scoped commands.
fn session<'a>(owner: Option<&'a str>, config: &FvConfig) -> Result<(&'a str, FileService)> {
    let owner = owner
        .filter(|o| !o.trim().is_empty())
        .context("an owner id is required: pass --owner or set FV_OWNER")?;
    Ok((owner, build_service(config)?))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<FvConfig> {
    let mut config = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        FvConfig::from_toml(&content).with_context(|| format!("parsing config: {}", path.display()))?
    } else {
        FvConfig::default()
    };

    config.storage.fs_root = expand_tilde(&config.storage.fs_root);
    config.metadata.path = expand_tilde(&config.metadata.path);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

// ── Storage and service wiring ────────────────────────────────────────────────

/// Read S3 credentials from the standard AWS variables, falling back to FV_*.
fn credentials_from_env() -> Result<S3Credentials> {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("FV_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("FV_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
    Ok(S3Credentials::new(access_key, secret_key))
}

fn build_operator(config: &FvConfig) -> Result<opendal::Operator> {
    let credentials = match config.storage.backend.as_str() {
        "s3" => Some(credentials_from_env()?),
        _ => None,
    };
    fv_storage::build_from_config(&config.storage, credentials.as_ref())
        .context("building storage operator")
}

fn build_service(config: &FvConfig) -> Result<FileService> {
    let blobs: Arc<dyn BlobStore> = Arc::new(OpendalBlobStore::new(build_operator(config)?));

    // records must live as long as the blobs they describe
    let records: Arc<dyn MetadataStore> = if config.storage.backend == "memory" {
        Arc::new(MemoryMetadataStore::new())
    } else {
        Arc::new(
            JsonMetadataStore::open(&config.metadata.path).with_context(|| {
                format!("opening record store: {}", config.metadata.path.display())
            })?,
        )
    };

    Ok(FileService::new(blobs, records, config)?)
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{rendered}");
    Ok(())
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

// ── `fv upload` ───────────────────────────────────────────────────────────────

async fn cmd_upload(
    service: &FileService,
    owner: &str,
    path: &Path,
    name: Option<String>,
    mime: Option<&str>,
) -> Result<()> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = match name {
        Some(n) => n,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("cannot derive a file name from {}", path.display()))?,
    };

    let pb = make_spinner("upload");
    pb.set_message(format!("{name} ({})", fmt_bytes(content.len() as u64)));

    let result = service.upload(owner, &name, mime.unwrap_or(""), content).await;
    pb.finish_and_clear();

    let receipt = result.with_context(|| format!("uploading {}", path.display()))?;
    print_json(&receipt)
}

// ── `fv download` ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedFile {
    file_id: String,
    original_name: String,
    mime_type: String,
    size: u64,
    path: PathBuf,
}

async fn cmd_download(
    service: &FileService,
    owner: &str,
    file_id: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let pb = make_spinner("download");
    pb.set_message(file_id.to_string());

    let result = service.download(owner, file_id).await;
    pb.finish_and_clear();
    let file = result.with_context(|| format!("downloading {file_id}"))?;

    let dest = match out {
        Some(p) => p,
        None => default_output_path(&file.original_name)?,
    };
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    tokio::fs::write(&dest, &file.content)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;

    print_json(&SavedFile {
        file_id: file_id.to_string(),
        size: file.content.len() as u64,
        original_name: file.original_name,
        mime_type: file.mime_type,
        path: dest,
    })
}

/// Stored names are untrusted: only their final component is used.
fn default_output_path(original_name: &str) -> Result<PathBuf> {
    Path::new(original_name)
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("stored name {original_name:?} is not a usable file name; pass --out"))
}

// ── `fv health` ───────────────────────────────────────────────────────────────

async fn cmd_health(config: &FvConfig) -> Result<()> {
    let op = build_operator(config)?;
    let entries = fv_storage::check_health(&op).await?;
    match config.storage.backend.as_str() {
        "s3" => println!(
            "storage: ok (s3 {} bucket {}, {entries} root entries)",
            config.storage.endpoint, config.storage.bucket
        ),
        "fs" => println!(
            "storage: ok (fs {}, {entries} root entries)",
            config.storage.fs_root.display()
        ),
        other => println!("storage: ok ({other}, {entries} root entries)"),
    }
    Ok(())
}

// ── `fv config show` ──────────────────────────────────────────────────────────

fn cmd_config_show(config: &FvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "fv", "--owner", "alice", "--log", "debug", "--log-format", "json", "list",
        ])
        .unwrap();
        assert_eq!(cli.owner.as_deref(), Some("alice"));
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "fv", "upload", "/tmp/a.txt", "--name", "b.txt", "--mime", "text/plain",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload { path, name, mime } => {
                assert_eq!(path, PathBuf::from("/tmp/a.txt"));
                assert_eq!(name.as_deref(), Some("b.txt"));
                assert_eq!(mime.as_deref(), Some("text/plain"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn expand_tilde_uses_home() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/x/y.toml")),
            PathBuf::from(home).join("x/y.toml")
        );
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn default_output_path_strips_directories() {
        assert_eq!(
            default_output_path("../../etc/passwd").unwrap(),
            PathBuf::from("passwd")
        );
        assert!(default_output_path("..").is_err());
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn missing_config_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.fragments.count, 5);
        assert!(!config.metadata.path.to_string_lossy().starts_with('~'));
    }

    #[tokio::test]
    async fn invalid_config_file_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fragvault.toml");
        std::fs::write(&path, "[storage]\nsigned_url_ttl_secs = 10\n").unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("signed_url_ttl_secs"));
    }

    #[tokio::test]
    async fn memory_backend_end_to_end() {
        let mut config = FvConfig::default();
        config.storage.backend = "memory".into();
        let service = build_service(&config).unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("note.txt");
        std::fs::write(&src, b"HELLO WORLD!!").unwrap();

        cmd_upload(&service, "alice", &src, None, Some("text/plain")).await.unwrap();
        let listed = service.list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);

        let out = tmp.path().join("out/note.txt");
        cmd_download(&service, "alice", &listed[0].file_id, Some(out.clone()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"HELLO WORLD!!");
    }
}
