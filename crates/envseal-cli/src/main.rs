//! envseal: envelope encryption from the command line
//!
//! Commands:
//!   encrypt <in> <out>     - encrypt a file as a chunked stream
//!   decrypt <in> <out>     - decrypt a file written by `encrypt`
//!   seal / open            - encrypt or decrypt a value read from stdin
//!   keygen <dir>           - write an RSA key pair for hybrid encryption
//!   config show            - display current configuration
//!
//! Without `--key-file` the default key is used, created on first use under
//! `default_key.store_dir`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use envseal_core::config::EnvsealConfig;
use envseal_crypto::{DefaultKeyProvider, EnvelopeEngine, Key};
use envseal_store::{FileStore, MemoryStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "envseal",
    version,
    about = "Versioned envelope encryption for values and files"
)]
struct Cli {
    /// Path to envseal.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "ENVSEAL_CONFIG",
        default_value = "~/.config/envseal/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "ENVSEAL_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "ENVSEAL_LOG_FORMAT")]
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
    /// Encrypt a file
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Use the key in this file instead of the default key. The bytes are
        /// used as-is apart from a single trailing newline
        #[arg(long, conflicts_with = "public_key")]
        key_file: Option<PathBuf>,
        /// Encrypt for the holder of this RSA public key (PEM)
        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// Decrypt a file written by `encrypt`
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, conflicts_with = "private_key")]
        key_file: Option<PathBuf>,
        /// RSA private key (PEM) for a file encrypted with --public-key
        #[arg(long)]
        private_key: Option<PathBuf>,
    },

    /// Encrypt stdin as a single value envelope, written to stdout
    Seal {
        #[arg(long, conflicts_with = "public_key")]
        key_file: Option<PathBuf>,
        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// Decrypt a value envelope from stdin; exits non-zero if it cannot be opened
    Open {
        #[arg(long, conflicts_with = "private_key")]
        key_file: Option<PathBuf>,
        #[arg(long)]
        private_key: Option<PathBuf>,
    },

    /// Generate an RSA-2048 key pair (private.pem, public.pem)
    Keygen {
        /// Output directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

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

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let loaded = load_config(&config_path)?;
    let config = loaded.clone().unwrap_or_default();

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if loaded.is_none() {
        tracing::warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => {
            cmd_config_show(&config, &config_path, loaded.is_some())
        }
        Commands::Keygen { dir } => cmd_keygen(&build_engine(&config)?, &dir),
        Commands::Encrypt { input, output, key_file, public_key } => {
            cmd_encrypt(&build_engine(&config)?, &input, &output, key_file.as_deref(), public_key.as_deref())
        }
        Commands::Decrypt { input, output, key_file, private_key } => {
            cmd_decrypt(&build_engine(&config)?, &input, &output, key_file.as_deref(), private_key.as_deref())
        }
        Commands::Seal { key_file, public_key } => {
            cmd_seal(&build_engine(&config)?, key_file.as_deref(), public_key.as_deref())
        }
        Commands::Open { key_file, private_key } => {
            cmd_open(&build_engine(&config)?, key_file.as_deref(), private_key.as_deref())
        }
    }
}

/// Parsed config, or `None` when no file exists at `path`.
fn load_config(path: &Path) -> Result<Option<EnvsealConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = EnvsealConfig::from_toml_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(config))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries ciphertext and plaintext; logs go to stderr
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

/// Engine with an in-process cache and a file-backed default key store.
fn build_engine(config: &EnvsealConfig) -> Result<EnvelopeEngine> {
    let store_dir = expand_tilde(&config.default_key.store_dir);
    let provider = DefaultKeyProvider::from_config(
        &config.default_key,
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::new(store_dir)),
    );
    EnvelopeEngine::new(config.engine.clone(), provider).context("building envelope engine")
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

/// Key bytes from a file. Only one trailing `\n` or `\r\n` is dropped; any
/// other byte, whitespace included, is part of the key.
fn read_key_file(path: &Path) -> Result<Key> {
    let bytes = std::fs::read(path).with_context(|| format!("reading key file {}", path.display()))?;
    let key = bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes.as_slice());
    anyhow::ensure!(!key.is_empty(), "key file {} is empty", path.display());
    Ok(Key::from_bytes(key))
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading PEM {}", path.display()))
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin().lock().read_to_end(&mut buf).context("reading stdin")?;
    Ok(buf)
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes).context("writing stdout")?;
    out.flush().context("flushing stdout")
}

// ── `envseal encrypt` / `envseal decrypt` ──────────────────────────────────────

fn cmd_encrypt(
    engine: &EnvelopeEngine,
    input: &Path,
    output: &Path,
    key_file: Option<&Path>,
    public_key: Option<&Path>,
) -> Result<()> {
    let stats = match public_key {
        Some(pem_path) => {
            let pem = read_pem(pem_path)?;
            engine.encrypt_file_with_public_key(input, output, &pem)
        }
        None => {
            let key = key_file.map(read_key_file).transpose()?;
            engine.encrypt_file(input, output, key.as_ref())
        }
    }
    .with_context(|| format!("encrypting {}", input.display()))?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        chunks = stats.chunks,
        bytes = stats.bytes,
        "encrypted"
    );
    Ok(())
}

fn cmd_decrypt(
    engine: &EnvelopeEngine,
    input: &Path,
    output: &Path,
    key_file: Option<&Path>,
    private_key: Option<&Path>,
) -> Result<()> {
    let stats = match private_key {
        Some(pem_path) => {
            let pem = read_pem(pem_path)?;
            engine.decrypt_file_with_private_key(input, output, &pem)
        }
        None => {
            let key = key_file.map(read_key_file).transpose()?;
            engine.decrypt_file(input, output, key.as_ref())
        }
    }
    .with_context(|| format!("decrypting {}", input.display()))?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        bytes = stats.bytes,
        "decrypted"
    );
    Ok(())
}

// ── `envseal seal` / `envseal open` ────────────────────────────────────────────

fn cmd_seal(engine: &EnvelopeEngine, key_file: Option<&Path>, public_key: Option<&Path>) -> Result<()> {
    let value = read_stdin()?;
    let blob = match public_key {
        Some(pem_path) => engine.encrypt_with_public_key(&value, &read_pem(pem_path)?)?,
        None => {
            let key = key_file.map(read_key_file).transpose()?;
            engine.encrypt(&value, key.as_ref())?
        }
    };
    write_stdout(&blob)
}

fn cmd_open(engine: &EnvelopeEngine, key_file: Option<&Path>, private_key: Option<&Path>) -> Result<()> {
    let blob = read_stdin()?;
    let value = match private_key {
        Some(pem_path) => engine.decrypt_with_private_key(&blob, &read_pem(pem_path)?)?,
        None => {
            let key = key_file.map(read_key_file).transpose()?;
            engine.decrypt(&blob, key.as_ref())?
        }
    };
    let value = value.context("value could not be decrypted")?;
    write_stdout(&value)
}

// ── `envseal keygen` ───────────────────────────────────────────────────────────

fn cmd_keygen(engine: &EnvelopeEngine, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let pair = engine.generate_key_pair().context("generating RSA key pair")?;

    let private_path = dir.join("private.pem");
    let public_path = dir.join("public.pem");
    write_private(&private_path, pair.private_key_pem().expose_secret().as_bytes())?;
    std::fs::write(&public_path, pair.public_key_pem())
        .with_context(|| format!("writing {}", public_path.display()))?;

    println!("private key: {}", private_path.display());
    println!("public key:  {}", public_path.display());
    Ok(())
}

/// Create `path` with owner-only permissions, refusing to overwrite.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("creating {} (already exists?)", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("writing {}", path.display()))
}

// ── `envseal config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &EnvsealConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
