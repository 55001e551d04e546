// crates/capgate-cli/src/main.rs
// ============================================================================
// Module: Capgate CLI Entry Point
// Description: Command dispatcher for the gateway and registry administration.
// Purpose: Serve capability scripts and manage principals, tokens, and scripts.
// Dependencies: clap, capgate-config, capgate-gateway, tokio.
// ============================================================================

//! ## Overview
//! The `capgate` binary starts the HTTP gateway, synchronizes the script
//! registry with the plugin tree, and performs administrative writes against
//! the durable registry store. All user-facing strings come from the message
//! catalog in [`capgate_cli::i18n`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use capgate_cli::admin::AdminError;
use capgate_cli::admin::NewToken;
use capgate_cli::admin::NewUser;
use capgate_cli::admin::add_user;
use capgate_cli::admin::create_token;
use capgate_cli::admin::open_admin_store;
use capgate_cli::admin::set_script;
use capgate_cli::builtin::builtin_catalog;
use capgate_cli::serve_policy::BindOutcome;
use capgate_cli::serve_policy::enforce_local_only;
use capgate_cli::serve_policy::resolve_allow_non_loopback;
use capgate_cli::t;
use capgate_config::CapgateConfig;
use capgate_config::config_toml_example;
use capgate_core::Role;
use capgate_core::TokenKind;
use capgate_gateway::GatewayServer;
use capgate_scripts::HandlerCatalog;
use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "capgate", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway.
    Serve(ServeCommand),
    /// Synchronize the script registry with the plugin tree.
    Reconcile(ConfigArg),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Principal administration.
    User {
        /// Selected user subcommand.
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Access token administration.
    Token {
        /// Selected token subcommand.
        #[command(subcommand)]
        command: TokenCommand,
    },
    /// Script flag administration.
    Script {
        /// Selected script subcommand.
        #[command(subcommand)]
        command: ScriptCommand,
    },
}

/// Shared `--config` argument.
#[derive(Args, Debug)]
struct ConfigArg {
    /// Optional config file path (defaults to capgate.toml or `CAPGATE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config file selection.
    #[command(flatten)]
    config: ConfigArg,
    /// Allow binding to non-loopback addresses.
    #[arg(long, action = ArgAction::SetTrue)]
    allow_non_loopback: bool,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a Capgate configuration file.
    Validate(ConfigArg),
    /// Print an annotated example configuration.
    Example,
}

/// User subcommands.
#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create a principal.
    Add(UserAddCommand),
}

/// Arguments for `user add`.
#[derive(Args, Debug)]
struct UserAddCommand {
    /// Config file selection.
    #[command(flatten)]
    config: ConfigArg,
    /// Unique username.
    username: String,
    /// Principal role.
    #[arg(long, value_enum, default_value_t = RoleArg::User)]
    role: RoleArg,
    /// Grant implicit permission over every script.
    #[arg(long, action = ArgAction::SetTrue)]
    all_access: bool,
    /// Script the principal may grant to tokens (repeatable).
    #[arg(long = "permit", value_name = "SCRIPT")]
    permissions: Vec<String>,
}

/// Token subcommands.
#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Mint a token on behalf of a user.
    Create(TokenCreateCommand),
}

/// Arguments for `token create`.
#[derive(Args, Debug)]
struct TokenCreateCommand {
    /// Config file selection.
    #[command(flatten)]
    config: ConfigArg,
    /// Minting user.
    #[arg(long, value_name = "USERNAME")]
    user: String,
    /// Token name.
    #[arg(long)]
    name: String,
    /// Optional description.
    #[arg(long)]
    description: Option<String>,
    /// Token kind.
    #[arg(long, value_enum, default_value_t = KindArg::Scoped)]
    kind: KindArg,
    /// Script reachable with a scoped token (repeatable).
    #[arg(long = "script", value_name = "SCRIPT")]
    scripts: Vec<String>,
    /// Token configuration entry as KEY=VALUE (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    config_entries: Vec<String>,
}

/// Script subcommands.
#[derive(Subcommand, Debug)]
enum ScriptCommand {
    /// Set public/online flags on a registered script.
    Set(ScriptSetCommand),
}

/// Arguments for `script set`.
#[derive(Args, Debug)]
struct ScriptSetCommand {
    /// Config file selection.
    #[command(flatten)]
    config: ConfigArg,
    /// Script name.
    name: String,
    /// Reachable without a token.
    #[arg(long)]
    public: Option<bool>,
    /// Accepting invocations.
    #[arg(long)]
    online: Option<bool>,
}

/// Role values accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    /// Administrator.
    Admin,
    /// Regular user.
    User,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Admin => Self::Admin,
            RoleArg::User => Self::User,
        }
    }
}

/// Token kinds accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    /// Every registered, online script.
    Universal,
    /// Only the listed scripts.
    Scoped,
}

impl From<KindArg> for TokenKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Universal => Self::Universal,
            KindArg::Scoped => Self::Scoped,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for catalog messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(&command).await,
        Commands::Reconcile(command) => command_reconcile(&command).await,
        Commands::Config {
            command,
        } => command_config(&command),
        Commands::User {
            command: UserCommand::Add(command),
        } => command_user_add(command),
        Commands::Token {
            command: TokenCommand::Create(command),
        } => command_token_create(command),
        Commands::Script {
            command: ScriptCommand::Set(command),
        } => command_script_set(&command),
    }
}

// ============================================================================
// SECTION: Gateway Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: &ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(&command.config)?;
    let allow_non_loopback = resolve_allow_non_loopback(command.allow_non_loopback)
        .map_err(|err| CliError::new(err.to_string()))?;
    let bind_outcome = enforce_local_only(&config, allow_non_loopback)
        .map_err(|err| CliError::new(err.to_string()))?;
    if bind_outcome.network_exposed {
        warn_network_exposure(&bind_outcome)?;
    }

    let catalog = catalog()?;
    let handlers = catalog.len();
    let server =
        tokio::task::spawn_blocking(move || GatewayServer::from_config(&config, Arc::new(catalog)))
            .await
            .map_err(|err| {
                CliError::new(t!("serve.init_failed", error = format!("init join failed: {err}")))
            })?
            .map_err(|err| CliError::new(t!("serve.init_failed", error = err)))?;
    write_stderr(&t!("serve.listening", bind = server.bind_addr(), handlers = handlers))?;
    server.serve().await.map_err(|err| CliError::new(t!("serve.failed", error = err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `reconcile` command.
async fn command_reconcile(command: &ConfigArg) -> CliResult<ExitCode> {
    let config = load_config(command)?;
    let server = GatewayServer::from_config(&config, Arc::new(catalog()?))
        .map_err(|err| CliError::new(t!("reconcile.failed", error = err)))?;
    let report =
        server.reconcile().await.map_err(|err| CliError::new(t!("reconcile.failed", error = err)))?;
    for skipped in &report.skipped {
        let reason = skipped.reason.describe();
        write_stderr(&t!("reconcile.skipped", path = skipped.path, reason = reason))?;
    }
    write_stdout(&t!(
        "reconcile.summary",
        added = report.added.len(),
        removed = report.removed.len(),
        updated = report.updated.len(),
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Warns about a non-loopback bind on stderr.
fn warn_network_exposure(outcome: &BindOutcome) -> CliResult<()> {
    write_stderr(&t!("serve.warn.network.header"))?;
    write_stderr(&t!("serve.warn.network.bind", bind = outcome.bind_addr))?;
    write_stderr(&t!("serve.warn.network.guard", status = status_label(outcome.guard_enabled)))?;
    write_stderr(&t!("serve.warn.network.audit", status = status_label(outcome.audit_enabled)))?;
    write_stderr(&t!(
        "serve.warn.network.forwarded",
        status = status_label(outcome.trust_forwarded_for)
    ))?;
    write_stderr(&t!("serve.warn.network.footer"))
}

/// Returns the enabled/disabled label.
fn status_label(enabled: bool) -> String {
    if enabled { t!("status.enabled") } else { t!("status.disabled") }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Executes config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => {
            load_config(command)?;
            write_stdout(&t!("config.validate.ok"))?;
        }
        ConfigCommand::Example => write_stdout(config_toml_example().trim_end())?,
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Administration Commands
// ============================================================================

/// Executes `user add`.
fn command_user_add(command: UserAddCommand) -> CliResult<ExitCode> {
    let config = load_config(&command.config)?;
    let store = open_admin_store(&config).map_err(store_error)?;
    let principal = add_user(
        store.as_ref(),
        NewUser {
            username: command.username,
            role: command.role.into(),
            all_access: command.all_access,
            permissions: command.permissions,
        },
    )
    .map_err(|err| admin_error(&t!("admin.action.user_add"), &err))?;
    write_stdout(&t!(
        "user.add.ok",
        role = principal.role.as_str(),
        username = principal.username,
        id = principal.id,
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `token create`.
fn command_token_create(command: TokenCreateCommand) -> CliResult<ExitCode> {
    let config = load_config(&command.config)?;
    let store = open_admin_store(&config).map_err(store_error)?;
    let (principal, token) = create_token(
        store,
        NewToken {
            username: command.user,
            name: command.name,
            description: command.description,
            kind: command.kind.into(),
            scripts: command.scripts,
            config: command.config_entries,
        },
    )
    .map_err(|err| admin_error(&t!("admin.action.token_create"), &err))?;
    write_stdout(&t!(
        "token.create.ok",
        kind = token.kind.as_str(),
        name = token.name,
        id = token.id,
        username = principal.username,
    ))?;
    write_stdout(&t!("token.create.secret", secret = token.secret))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `script set`.
fn command_script_set(command: &ScriptSetCommand) -> CliResult<ExitCode> {
    let config = load_config(&command.config)?;
    let store = open_admin_store(&config).map_err(store_error)?;
    let script = set_script(store.as_ref(), &command.name, command.public, command.online)
        .map_err(|err| admin_error(&t!("admin.action.script_set"), &err))?;
    write_stdout(&t!(
        "script.set.ok",
        name = script.name,
        public = script.is_public,
        online = script.is_online,
    ))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates the configuration.
fn load_config(arg: &ConfigArg) -> CliResult<CapgateConfig> {
    CapgateConfig::load(arg.config.as_deref())
        .map_err(|err| CliError::new(t!("config.load_failed", error = err)))
}

/// Builds the handler catalog compiled into the binary.
fn catalog() -> CliResult<HandlerCatalog> {
    builtin_catalog().map_err(|err| CliError::new(t!("catalog.failed", error = err)))
}

/// Maps a store-opening failure.
fn store_error(err: AdminError) -> CliError {
    match err {
        AdminError::MemoryStore => CliError::new(t!("store.memory_unsupported")),
        other => CliError::new(t!("store.open_failed", error = other)),
    }
}

/// Maps an administration failure.
fn admin_error(action: &str, err: &AdminError) -> CliError {
    CliError::new(t!("admin.failed", action = action, error = err))
}

/// Writes a line to stdout.
fn write_stdout(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stderr.
fn write_stderr(message: &str) -> CliResult<()> {
    write_stderr_line(message).map_err(|err| CliError::new(output_error("stderr", &err)))
}

/// Writes a line to stderr without error mapping.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
