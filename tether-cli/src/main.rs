//! CLI for serving and calling tether remote objects.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tether::{Client, ClientConfig, DEFAULT_PORT, Mode, Proxy, Server, ServerConfig, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether", version, about = "Operate on objects living in another process")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host the demo modules (mathlib, echo, store).
    Serve(ServeArgs),

    /// Call a module function and print the result.
    Call {
        #[command(flatten)]
        conn: ConnArgs,
        /// Module to import.
        module: String,
        /// Function member of the module.
        function: String,
        /// Arguments: integers, floats, true/false, none, or text.
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
    },

    /// Read a module member and print it.
    Get {
        #[command(flatten)]
        conn: ConnArgs,
        /// Module to import.
        module: String,
        /// Member name.
        member: String,
    },

    /// List the members of a module.
    Members {
        #[command(flatten)]
        conn: ConnArgs,
        /// Module to import.
        module: String,
    },

    /// Stop a running server.
    Stop {
        #[command(flatten)]
        conn: ConnArgs,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Arguments for `tether serve`.
#[derive(clap::Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(short, long, default_value_t = default_addr())]
    addr: String,

    /// JSON server config; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send returned lists by value instead of by handle.
    #[arg(long)]
    lists_by_value: bool,

    /// Serve one connection at a time.
    #[arg(long)]
    sequential: bool,

    /// Drop a connection's handles when it ends without saying goodbye.
    #[arg(long)]
    release_on_disconnect: bool,

    /// Close connections idle for this many milliseconds.
    #[arg(long, value_name = "MS")]
    idle_timeout: Option<u64>,
}

/// Where and how to connect.
#[derive(clap::Args)]
struct ConnArgs {
    /// Server address.
    #[arg(short, long, default_value_t = default_addr())]
    addr: String,

    /// Fail a call after waiting this many milliseconds.
    #[arg(short, long, value_name = "MS")]
    timeout: Option<u64>,
}

impl ConnArgs {
    fn connect(&self) -> Result<Client> {
        let config = ClientConfig::default()
            .read_timeout(self.timeout.map(Duration::from_millis))
            .connect_timeout(Some(Duration::from_secs(5)));
        Client::connect_with(self.addr.as_str(), config)
            .with_context(|| format!("failed to connect to {}", self.addr))
    }
}

fn default_addr() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.dispatch() {
        eprintln!("tether: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Serve(args) => serve(args),
            Command::Call {
                conn,
                module,
                function,
                args,
            } => {
                let client = conn.connect()?;
                let module = client.import_module(&module)?;
                let args: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();
                let result = module
                    .call_method(&function, &args)
                    .with_context(|| format!("{}.{function} failed", module.name()))?;
                println!("{}", render(&result)?);
                client.close()?;
                Ok(())
            }
            Command::Get {
                conn,
                module,
                member,
            } => {
                let client = conn.connect()?;
                let value = client.import_module(&module)?.get_attr(&member)?;
                println!("{}", render(&value)?);
                client.close()?;
                Ok(())
            }
            Command::Members { conn, module } => {
                let client = conn.connect()?;
                for name in client.import_module(&module)?.list_members()? {
                    println!("{name}");
                }
                client.close()?;
                Ok(())
            }
            Command::Stop { conn } => {
                conn.connect()?.stop_server()?;
                println!("stopped {}", conn.addr);
                Ok(())
            }
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "tether", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if args.lists_by_value {
        config = config.lists_by_value(true);
    }
    if args.sequential {
        config = config.mode(Mode::Sequential);
    }
    if args.release_on_disconnect {
        config = config.release_on_disconnect(true);
    }
    if let Some(ms) = args.idle_timeout {
        config = config.read_timeout(Some(Duration::from_millis(ms)));
    }
    tracing::debug!(config = %serde_json::to_string(&config)?, "server config");

    let builder = demo::modules()
        .into_iter()
        .fold(Server::builder().config(config), |b, (name, module)| {
            b.module(name, module)
        });
    let server = builder
        .bind(args.addr.as_str())
        .with_context(|| format!("failed to bind {}", args.addr))?;
    server.serve()?;
    Ok(())
}

/// Reads a command-line argument as the most specific value it spells.
fn parse_arg(s: &str) -> Value {
    match s {
        "none" | "()" => Value::Unit,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => s
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| s.parse::<f64>().map(Value::Float))
            .unwrap_or_else(|_| Value::from(s)),
    }
}

/// Formats a result, expanding a top-level proxy into its member list.
fn render(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Proxy(p) => describe(p)?,
        other => other.to_string(),
    })
}

fn describe(proxy: &Proxy) -> Result<String> {
    let members = proxy.list_members()?;
    Ok(format!("{proxy} [{}]", members.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_to_the_narrowest_type() {
        assert_eq!(parse_arg("42"), Value::Int(42));
        assert_eq!(parse_arg("-1.5"), Value::Float(-1.5));
        assert_eq!(parse_arg("true"), Value::Bool(true));
        assert_eq!(parse_arg("none"), Value::Unit);
        assert_eq!(parse_arg("hello"), Value::from("hello"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn call_accepts_negative_arguments() {
        let cli = Cli::try_parse_from(["tether", "call", "mathlib", "pow", "-2", "3"]).unwrap();
        let Command::Call { args, .. } = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args, ["-2", "3"]);
    }
}
