use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use renew_core::cfg::{self, AppId, Config};
use renew_core::encoder::RequestEncoder;
use renew_core::store::{self, DefaultKv, KeyStore, KvKeyStore, SlotId};
use renew_core::{job, keyblock, logx, task};
use serde::Serialize;
use tracing::info;

// Shares config and key store with the daemon.
const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: "renewd",
};

#[derive(Parser)]
#[command(name=env!("CARGO_PKG_NAME"), version, about="License key renewal control")]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file (default: the daemon's config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Key store directory (default: the daemon's data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one renewal cycle now.
    Run {
        /// Positional parameters: user serial version count delete.
        /// Without them the configured task data is used.
        params: Vec<String>,
    },
    /// Inspect or edit stored license keys.
    Keys {
        #[command(subcommand)]
        cmd: KeysCmd,
    },
    /// Print the encrypted request payload for one domain.
    Encode {
        #[arg(long, default_value = "")]
        serial: String,
        #[arg(long)]
        domain: String,
        #[arg(long, default_value = "")]
        user: String,
    },
    /// Parse a key block file and print its domain and expiration.
    Parse { file: PathBuf },
}

#[derive(Subcommand)]
enum KeysCmd {
    /// List stored keys in renewal order.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Store a key block from a file.
    Import { file: PathBuf },
    /// Register a domain to be renewed on the next run.
    Add { domain: String },
    /// Delete a stored key.
    Remove { id: u64 },
    /// Print a stored key block verbatim.
    Show { id: u64 },
}

#[derive(Serialize)]
struct KeyRow {
    id: u64,
    domain: String,
    expires_on: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    logx::init(level);

    let cfg = match &cli.config {
        Some(path) => cfg::load_from(path)?,
        None => cfg::load_or_init(&APP)?,
    };

    match cli.cmd {
        Command::Run { params } => {
            let store = open_store(cli.data_dir)?;
            let mut orch = task::http_orchestrator(&cfg)?;
            let params = if params.is_empty() { job::split_task_data(&cfg.task_data) } else { Some(params) };
            let report = task::run_task(&mut orch, &store, params.as_deref(), cfg.max_retries);
            println!("{}", report.status);
            match report.next_run {
                Some(at) => println!("next run: {at}"),
                None => println!("next run: not scheduled"),
            }
            if !report.success {
                anyhow::bail!("renewal run failed");
            }
        }
        Command::Keys { cmd } => keys(cmd, open_store(cli.data_dir)?)?,
        Command::Encode { serial, domain, user } => {
            let payload = encoder(&cfg)?.encode(&serial, &domain, &user)?;
            println!("{payload}");
        }
        Command::Parse { file } => {
            let raw = read(&file)?;
            let key = keyblock::parse(&raw)?;
            println!("domain: {}\nexpires: {}", key.domain, key.expires_on);
        }
    }
    Ok(())
}

fn keys(cmd: KeysCmd, store: KvKeyStore<DefaultKv>) -> Result<()> {
    match cmd {
        KeysCmd::List { json } => {
            let rows: Vec<KeyRow> = store
                .records()?
                .into_iter()
                .map(|r| KeyRow { id: r.id.0, domain: r.domain, expires_on: r.expires_on.map(|d| d.to_string()) })
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for r in &rows {
                    println!("{:>6}  {:<40}  {}", r.id, r.domain, r.expires_on.as_deref().unwrap_or("-"));
                }
            }
        }
        KeysCmd::Import { file } => {
            let id = store.import_raw(&read(&file)?)?;
            info!("imported {} as {id}", file.display());
            println!("{id}");
        }
        KeysCmd::Add { domain } => {
            let id = store.add_domain(&domain)?;
            println!("{id}");
        }
        KeysCmd::Remove { id } => {
            if !store.delete(SlotId(id))? {
                anyhow::bail!("no key with id {id}");
            }
        }
        KeysCmd::Show { id } => {
            let rec = store.get(SlotId(id))?.with_context(|| format!("no key with id {id}"))?;
            print!("{}", rec.raw_block);
        }
    }
    Ok(())
}

fn open_store(dir: Option<PathBuf>) -> Result<KvKeyStore<DefaultKv>> {
    let dir = match dir {
        Some(d) => d,
        None => cfg::data_dir(&APP)?,
    };
    Ok(KvKeyStore::new(store::open_default(dir)?))
}

fn encoder(cfg: &Config) -> Result<RequestEncoder> {
    Ok(RequestEncoder::from_config(&cfg.public_key)?)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
