mod clipboard;
mod manager;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use gssh_core::config::{self, Config};
use gssh_core::path;
use gssh_core::prompt::{self, TtyConfirm};
use gssh_core::store::SecretStore;
use gssh_core::APP_NAME;
use gssh_gopass::GopassBackend;
use gssh_ssh_agent::{AgentClient, KeyType, SocketAgent};

use crate::manager::{IdentityManager, KeygenOptions, Outcome, PasswordOptions};

#[tokio::main]
async fn main() {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> Result<()> {
    let global = GlobalArgs::parse(args)?;
    init_logging(global.quiet);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let config_path = global
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let config = config::load(&config_path)?;
    let app = App {
        store_prefix: global.store.clone().unwrap_or_else(|| config.store.clone()),
        config,
        yes: global.yes,
        cancel,
    };

    let mut rest = global.rest;
    if rest.is_empty() {
        print_help();
        return Ok(());
    }
    let cmd = rest.remove(0);

    match cmd.as_str() {
        "agent" => cmd_agent(&app, rest).await,
        "secret" => cmd_secret(&app, rest).await,
        "complete" => cmd_complete(&app, rest).await,
        "version" | "--version" | "-V" => {
            println!("{APP_NAME} {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => bail!("unknown command: {other} (see '{APP_NAME} help')"),
    }
}

fn init_logging(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_help() {
    println!(
        "\
gssh - keep SSH keys in gopass and load them into ssh-agent

USAGE:
    gssh [global flags] <command> [args...]

GLOBAL FLAGS:
    --store <prefix>                    First part of every secret path [default: ssh-keys]
    --config <path>                     Config file [default: ~/.config/gssh/config.toml]
    -q, --quiet, --silent               Only log errors
    -y, --yes                           Answer yes to all confirmations

COMMANDS:
    agent <subcommand>                  Manage ssh-agent
      add [--lifetime <secs>] <path>    Add the stored key to ssh-agent (alias: -t, --time)
      delete <path>                     Remove the stored key from ssh-agent (alias: remove, del, rm)
      list                              List keys loaded in ssh-agent (alias: ls)
      clear                             Remove all keys from ssh-agent

    secret <subcommand>                 Manage stored ssh-keys
      generate [options] <path>         Generate passphrase and key pair, store all three
                                        (alias: keygen, gen, ssh-keygen)
        -t, --type <rsa|ed25519>        Key type [default: ed25519]
        -b, --bits <n>                  RSA modulus size [default: 4096]
        -l, --length <n>                Passphrase length, at least 16 [default: 32]
        --no-symbols                    Passphrase without symbols
      delete <path>                     Delete password, private and public key
                                        (alias: remove, del, rm)
      password show [-c] <path>         Print the passphrase (alias: pass, passwd)
      password generate [-l <n>] [--no-symbols] <path>
                                        Generate and store a new passphrase
      password insert <path>            Store the first line of stdin as passphrase
      password delete <path>            Delete the passphrase
      key delete <path>                 Delete private and public key
      key private show [-c] <path>      Print the private key
      key private insert <path>         Store stdin as private key
      key private delete <path>         Delete the private key
      key public show [-c] <path>       Print the public key
      key public insert <path>          Store stdin as public key
      key public delete <path>          Delete the public key

    complete [prefix]                   List stored identity paths below the store
    version                             Show version
    help                                Show this help

FLAGS FOR show:
    -c, --clipboard                     Copy to the clipboard and clear it after 45s
                                        (alias: --clip, --copy)

EXAMPLES:
    gssh secret generate work/github
    gssh agent add --lifetime 3600 work/github
    gssh secret key public show work/github
    cat ~/.ssh/id_ed25519 | gssh -y secret key private insert home/laptop
    gssh agent delete work/github"
    );
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GlobalArgs {
    store: Option<String>,
    config: Option<PathBuf>,
    quiet: bool,
    yes: bool,
    rest: Vec<String>,
}

impl GlobalArgs {
    /// Global flags may appear anywhere on the command line.
    fn parse(args: Vec<String>) -> Result<Self> {
        let mut out = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if matches!(arg.as_str(), "-q" | "--quiet" | "--silent") {
                out.quiet = true;
            } else if matches!(arg.as_str(), "-y" | "--yes") {
                out.yes = true;
            } else if arg == "--store" {
                out.store = Some(args.next().context("--store requires a value")?);
            } else if arg == "--config" {
                let value = args.next().context("--config requires a value")?;
                out.config = Some(PathBuf::from(value));
            } else if let Some(v) = arg.strip_prefix("--store=") {
                out.store = Some(v.to_string());
            } else if let Some(v) = arg.strip_prefix("--config=") {
                out.config = Some(PathBuf::from(v));
            } else {
                out.rest.push(arg);
            }
        }
        Ok(out)
    }
}

/// Remove a boolean flag from `args`; true if any alias was present.
fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    let before = args.len();
    args.retain(|a| !names.contains(&a.as_str()));
    args.len() != before
}

/// Remove `--name value` or `--name=value` from `args`.
fn take_value(args: &mut Vec<String>, names: &[&str]) -> Result<Option<String>> {
    let mut value = None;
    let mut i = 0;
    while i < args.len() {
        if names.contains(&args[i].as_str()) {
            if i + 1 >= args.len() {
                bail!("{} requires a value", args[i]);
            }
            value = Some(args.remove(i + 1));
            args.remove(i);
            continue;
        }
        if let Some(v) = names
            .iter()
            .find_map(|n| args[i].strip_prefix(n).and_then(|r| r.strip_prefix('=')))
        {
            value = Some(v.to_string());
            args.remove(i);
            continue;
        }
        i += 1;
    }
    Ok(value)
}

fn take_parsed<T>(args: &mut Vec<String>, names: &[&str]) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match take_value(args, names)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value '{raw}' for {}: {e}", names[0])),
        None => Ok(None),
    }
}

/// The single positional path argument.
fn one_path(args: Vec<String>) -> Result<String> {
    let mut args = args.into_iter();
    let Some(path) = args.next() else {
        bail!(path::PathError::Empty);
    };
    if path.starts_with('-') {
        bail!("unknown flag: {path}");
    }
    if let Some(extra) = args.next() {
        bail!("unexpected argument: {extra}");
    }
    Ok(path)
}

fn no_args(args: &[String]) -> Result<()> {
    match args.first() {
        Some(extra) => bail!("unexpected argument: {extra}"),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct App {
    config: Config,
    store_prefix: String,
    yes: bool,
    cancel: CancellationToken,
}

impl App {
    fn identity(&self, user_path: &str) -> Result<String> {
        Ok(path::identity_key(&self.store_prefix, user_path)?)
    }

    fn manager(&self) -> Result<IdentityManager> {
        let backend = &self.config.backend;
        if backend.kind != "gopass" {
            bail!("unsupported backend type '{}' (expected 'gopass')", backend.kind);
        }
        let store = SecretStore::new(Arc::new(GopassBackend::new(backend.binary.clone())));
        let confirm = Arc::new(TtyConfirm::new(self.cancel.clone()));
        Ok(IdentityManager::new(store, confirm, self.yes))
    }

    async fn manager_with_agent(&self) -> Result<IdentityManager> {
        let socket = match &self.config.agent.socket {
            Some(socket) => socket.clone(),
            None => SocketAgent::socket_from_env()?,
        };
        let agent = SocketAgent::connect(&socket).await?;
        Ok(self.manager()?.with_agent(AgentClient::new(Box::new(agent))))
    }
}

async fn cmd_agent(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing agent subcommand: add, delete, list, clear");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "add" => {
            let lifetime: Option<u32> = take_parsed(&mut args, &["--lifetime", "--time", "-t"])?;
            let identity = app.identity(&one_path(args)?)?;
            let lifetime = lifetime.unwrap_or(app.config.agent.lifetime_secs);
            app.manager_with_agent()
                .await?
                .add_to_agent(&identity, lifetime)
                .await
        }
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            app.manager_with_agent()
                .await?
                .remove_from_agent(&identity)
                .await
        }
        "list" | "ls" => {
            no_args(&args)?;
            let keys = app.manager_with_agent().await?.list_agent().await?;
            println!("{}", keys.join("\n\n"));
            Ok(())
        }
        "clear" => {
            no_args(&args)?;
            let outcome = app.manager_with_agent().await?.clear_agent().await?;
            report(outcome);
            Ok(())
        }
        other => bail!("unknown agent subcommand: {other}"),
    }
}

async fn cmd_secret(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing secret subcommand: generate, delete, password, key");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "generate" | "keygen" | "gen" | "ssh-keygen" => {
            let keygen = &app.config.keygen;
            let key_type: KeyType = match take_value(&mut args, &["--type", "-t"])? {
                Some(t) => t.parse()?,
                None => keygen.key_type.parse()?,
            };
            let bits = take_parsed(&mut args, &["--bits", "--bit", "-b"])?.unwrap_or(keygen.bits);
            let password = password_options(app, &mut args)?;
            let identity = app.identity(&one_path(args)?)?;
            let opts = KeygenOptions {
                key_type,
                bits,
                password,
            };
            report(app.manager()?.generate(&identity, opts).await?);
            Ok(())
        }
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.delete_identity(&identity).await?);
            Ok(())
        }
        "password" | "pass" | "passwd" => cmd_password(app, args).await,
        "key" | "ssh-key" => cmd_key(app, args).await,
        other => bail!("unknown secret subcommand: {other}"),
    }
}

fn password_options(app: &App, args: &mut Vec<String>) -> Result<PasswordOptions> {
    let length = take_parsed(args, &["--length", "-l"])?.unwrap_or(app.config.keygen.password_length);
    let no_symbols = take_flag(args, &["--no-symbols"]);
    let symbols = take_flag(args, &["--symbols", "-s"]);
    Ok(PasswordOptions {
        length,
        symbols: symbols || (app.config.keygen.symbols && !no_symbols),
    })
}

async fn cmd_password(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing password subcommand: show, generate, insert, delete");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "show" => {
            let clip = take_clipboard_flag(&mut args);
            let identity = app.identity(&one_path(args)?)?;
            match app.manager()?.show_password(&identity).await? {
                Some(pw) if clip => to_clipboard(app, &path::password_key(&identity), &pw).await,
                Some(pw) => {
                    println!("{}", pw.as_str());
                    Ok(())
                }
                None => {
                    warn!(identity = %identity, "password not found");
                    Ok(())
                }
            }
        }
        "generate" | "gen" | "random" | "rand" => {
            let opts = password_options(app, &mut args)?;
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.generate_password(&identity, opts).await?);
            Ok(())
        }
        "insert" | "import" => {
            let identity = app.identity(&one_path(args)?)?;
            let data = prompt::read_stdin().await?;
            report(app.manager()?.insert_password(&identity, &data).await?);
            Ok(())
        }
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.delete_password(&identity).await?);
            Ok(())
        }
        other => bail!("unknown password subcommand: {other}"),
    }
}

async fn cmd_key(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing key subcommand: delete, private, public");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.delete_ssh_key(&identity).await?);
            Ok(())
        }
        "private" => cmd_private_key(app, args).await,
        "public" => cmd_public_key(app, args).await,
        other => bail!("unknown key subcommand: {other}"),
    }
}

async fn cmd_private_key(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing private key subcommand: show, insert, delete");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "show" => {
            let clip = take_clipboard_flag(&mut args);
            let identity = app.identity(&one_path(args)?)?;
            let Some(key) = app.manager()?.show_private_key(&identity).await? else {
                warn!(identity = %identity, "private ssh-key not found");
                return Ok(());
            };
            if clip {
                let text = zeroize::Zeroizing::new(String::from_utf8_lossy(&key).into_owned());
                return to_clipboard(app, &path::private_key_key(&identity), &text).await;
            }
            print_bytes(&key)
        }
        "insert" | "import" => {
            let identity = app.identity(&one_path(args)?)?;
            let data = prompt::read_stdin().await?;
            report(app.manager()?.insert_private_key(&identity, &data).await?);
            Ok(())
        }
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.delete_private_key(&identity).await?);
            Ok(())
        }
        other => bail!("unknown private key subcommand: {other}"),
    }
}

async fn cmd_public_key(app: &App, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("missing public key subcommand: show, insert, delete");
    }
    let sub = args.remove(0);

    match sub.as_str() {
        "show" => {
            let clip = take_clipboard_flag(&mut args);
            let identity = app.identity(&one_path(args)?)?;
            match app.manager()?.show_public_key(&identity).await? {
                Some(line) if clip => to_clipboard(app, &path::public_key_key(&identity), &line).await,
                Some(line) => {
                    println!("{line}");
                    Ok(())
                }
                None => {
                    warn!(identity = %identity, "public ssh-key not found");
                    Ok(())
                }
            }
        }
        "insert" | "import" => {
            let identity = app.identity(&one_path(args)?)?;
            let data = prompt::read_stdin().await?;
            report(app.manager()?.insert_public_key(&identity, &data).await?);
            Ok(())
        }
        "delete" | "remove" | "del" | "rm" => {
            let identity = app.identity(&one_path(args)?)?;
            report(app.manager()?.delete_public_key(&identity).await?);
            Ok(())
        }
        other => bail!("unknown public key subcommand: {other}"),
    }
}

async fn cmd_complete(app: &App, args: Vec<String>) -> Result<()> {
    let mut args = args.into_iter();
    let prefix = match args.next() {
        Some(p) => path::identity_key(&app.store_prefix, &p)?,
        None => app.store_prefix.clone(),
    };
    for child in app.manager()?.complete(&prefix).await? {
        println!("{child}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn take_clipboard_flag(args: &mut Vec<String>) -> bool {
    take_flag(args, &["-c", "--clipboard", "--clip", "--copy"])
}

async fn to_clipboard(app: &App, name: &str, content: &str) -> Result<()> {
    let mut sink = clipboard::system()?;
    let timeout = Duration::from_secs(app.config.clipboard.timeout_secs);
    clipboard::copy_with_timeout(sink.as_mut(), name, content, timeout, &app.cancel).await?;
    Ok(())
}

fn print_bytes(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(data).context("write to stdout")?;
    if !data.ends_with(b"\n") {
        stdout.write_all(b"\n").context("write to stdout")?;
    }
    stdout.flush().context("flush stdout")
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Done => debug!("done"),
        Outcome::Cancelled => debug!("nothing changed"),
    }
}
