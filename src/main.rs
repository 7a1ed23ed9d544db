mod card;
mod clipboard;
mod config;
mod crypto;
mod error;
mod grid;
mod prompt;
mod serve;
mod session;
mod store;
mod vault;

use crate::card::{SLOT_COUNT, SlotCodes};
use crate::clipboard::copy_to_clipboard;
use crate::config::{Config, config_path, save_config};
use crate::crypto::XChaChaCipher;
use crate::error::VaultError;
use crate::grid::parse_grid;
use crate::prompt::{prompt_new_password, prompt_password_hidden, prompt_string};
use crate::store::{CardStore, store_root};
use crate::vault::{CodeLookup, Vault};
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "otpvault",
    version,
    about = "Encrypted OTP card vault with session unlock and auto-fill"
)]
struct Cli {
    /// Store directory (defaults to <data dir>/otpvault)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Debug logging to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the store and write a default config.json
    Init,

    /// Add a new OTP card
    ///
    /// Examples:
    ///   otpvault add "SHS card"
    ///   otpvault add "SHS card" --import scan.txt
    Add {
        /// Card label (does not have to be unique)
        name: String,
        /// Text file with the card grid (OCR output, `N CODE` lines)
        #[arg(long)]
        import: Option<PathBuf>,
    },

    /// List cards
    Ls,

    /// Delete a card
    Rm {
        /// Card id as shown by `ls`
        id: String,
    },

    /// Unlock a card and print the whole grid
    Show {
        id: String,
    },

    /// Unlock a card and print one code
    Code {
        id: String,
        /// Slot number, 1..=35
        index: usize,
        /// Copy to clipboard instead of printing
        #[arg(long)]
        clip: bool,
    },

    /// Parse a grid text file and print what was recognized
    Parse {
        file: PathBuf,
    },

    /// Answer JSON requests on stdin, one per line
    Serve,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = match cli.store {
        Some(dir) => dir,
        None => store_root()?,
    };

    match cli.command {
        Commands::Init => cmd_init(&root)?,
        Commands::Add { name, import } => cmd_add(&root, &name, import.as_deref())?,
        Commands::Ls => cmd_ls(&root)?,
        Commands::Rm { id } => cmd_rm(&root, &id)?,
        Commands::Show { id } => cmd_show(&root, &id)?,
        Commands::Code { id, index, clip } => cmd_code(&root, &id, index, clip)?,
        Commands::Parse { file } => cmd_parse(&file)?,
        Commands::Serve => cmd_serve(&root)?,
    }

    Ok(())
}

// Логи идут в stderr: stdout в режиме serve занят протоколом.
fn init_tracing(verbose: bool) {
    let default = if verbose { "otpvault=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn open_vault(root: &Path) -> anyhow::Result<Vault> {
    let config = Config::load(root)?;
    Ok(Vault::new(
        CardStore::open(root),
        XChaChaCipher::new(config.kdf.clone())?,
        config.session_duration(),
    ))
}

fn cmd_init(root: &Path) -> anyhow::Result<()> {
    let path = config_path(root);
    if path.exists() {
        println!("Store already exists at: {}", root.display());
        return Ok(());
    }

    std::fs::create_dir_all(root)
        .with_context(|| format!("cannot create store dir {}", root.display()))?;
    save_config(&Config::default(), &path)?;

    println!("Initialized store at {}", root.display());
    Ok(())
}

fn cmd_add(root: &Path, name: &str, import: Option<&Path>) -> anyhow::Result<()> {
    let vault = open_vault(root)?;

    let codes = match import {
        Some(file) => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let grid = parse_grid(&text);
            println!("Recognized {}/{SLOT_COUNT} codes.", grid.filled);
            print_grid(|i| grid.codes.get(i).unwrap_or_default().to_string());
            grid.codes
        }
        None => prompt_codes()?,
    };

    let password = prompt_new_password("Card password: ")?;
    let card = vault.create_card(name, &password, &codes, OffsetDateTime::now_utc())?;
    println!("Saved card {} ({})", card.name, card.id);
    Ok(())
}

fn prompt_codes() -> anyhow::Result<SlotCodes> {
    println!("Enter codes for slots 1..{SLOT_COUNT} (empty = not recorded).");
    let codes = (1..=SLOT_COUNT)
        .map(|i| prompt_string(&format!("Slot {i}: ")).map(|s| s.trim().to_string()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    SlotCodes::new(codes).map_err(|n| anyhow!("expected {SLOT_COUNT} codes, got {n}"))
}

fn cmd_ls(root: &Path) -> anyhow::Result<()> {
    let vault = open_vault(root)?;
    for card in vault.list_cards()? {
        let last_used = match card.last_used_at {
            Some(at) => at.format(&time::format_description::well_known::Rfc3339)?,
            None => "never".to_string(),
        };
        println!("{}\t{}\tlast used: {}", card.id, card.name, last_used);
    }
    Ok(())
}

fn cmd_rm(root: &Path, id: &str) -> anyhow::Result<()> {
    let vault = open_vault(root)?;
    vault.delete_card(id)?;
    println!("Deleted card {id}");
    Ok(())
}

/// Спросить пароль и разблокировать карту в этом процессе.
fn unlock_interactive(vault: &Vault, id: &str, now: OffsetDateTime) -> anyhow::Result<()> {
    let card = vault.get_card(id)?;
    let password = prompt_password_hidden(&format!("Password for \"{}\": ", card.name))?;
    match vault.attempt_unlock(id, &password, now) {
        Err(VaultError::WrongPassword) => anyhow::bail!("Wrong password"),
        other => Ok(other?),
    }
}

fn cmd_show(root: &Path, id: &str) -> anyhow::Result<()> {
    let vault = open_vault(root)?;
    let now = OffsetDateTime::now_utc();
    unlock_interactive(&vault, id, now)?;

    let mut codes = Vec::with_capacity(SLOT_COUNT);
    for i in 1..=SLOT_COUNT {
        match vault.request_code(id, i, now)? {
            CodeLookup::Code { code } => codes.push(code),
            CodeLookup::Locked => anyhow::bail!("Card {id} is locked"),
        }
    }
    print_grid(|i| codes[i - 1].clone());
    Ok(())
}

fn cmd_code(root: &Path, id: &str, index: usize, clip: bool) -> anyhow::Result<()> {
    let vault = open_vault(root)?;
    let now = OffsetDateTime::now_utc();
    unlock_interactive(&vault, id, now)?;

    let code = match vault.request_code(id, index, now)? {
        CodeLookup::Code { code } => code,
        CodeLookup::Locked => anyhow::bail!("Card {id} is locked"),
    };
    if code.is_empty() {
        anyhow::bail!("Slot {index} has no recorded code");
    }

    if clip {
        copy_to_clipboard(&code)?;
        println!("Code for slot {index} copied to clipboard.");
    } else {
        println!("{code}");
    }
    Ok(())
}

fn cmd_parse(file: &Path) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let grid = parse_grid(&text);
    print_grid(|i| grid.codes.get(i).unwrap_or_default().to_string());
    println!("Recognized {}/{SLOT_COUNT} codes.", grid.filled);
    Ok(())
}

fn cmd_serve(root: &Path) -> anyhow::Result<()> {
    let vault = open_vault(root)?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve::run(&vault, stdin.lock(), stdout.lock())
}

/// Сетка 7x5, как на бумажной карте.
fn print_grid(code_at: impl Fn(usize) -> String) {
    for row in 0..SLOT_COUNT / 5 {
        let line: Vec<String> = (1..=5)
            .map(|col| {
                let i = row * 5 + col;
                let code = code_at(i);
                format!("{i:>2}: {:<6}", if code.is_empty() { "----" } else { code.as_str() })
            })
            .collect();
        println!("{}", line.join("  "));
    }
}
