use anyhow::Context;
use clap::{Parser, Subcommand};

/// Exit code for failures on this side of the socket (bad socket file,
/// connect or protocol errors). Remote commands own the normal 0..255 range,
/// so a reserved value keeps the two distinguishable for callers.
const LOCAL_ERROR_EXIT: i32 = 120;

#[derive(Parser)]
#[command(name = "postern")]
#[command(about = "Run allowlisted commands through a local gateway socket", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config and an example allowlist)
    Init {
        /// Config file path (default: POSTERN_CONFIG_PATH or ~/.postern/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway: serve allowlisted command execution on the Unix socket
    Gateway {
        /// Config file path (default: POSTERN_CONFIG_PATH or ~/.postern/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Socket path (default from config or gateway.sock next to the config file)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<std::path::PathBuf>,

        /// Allowlist file (default from config or allowlist next to the config file)
        #[arg(long, short, value_name = "PATH")]
        allowlist: Option<std::path::PathBuf>,
    },

    /// Send one command to the gateway, print its output, and exit with its exit code
    Run {
        /// Config file path (default: POSTERN_CONFIG_PATH or ~/.postern/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Socket path (default from config or gateway.sock next to the config file)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<std::path::PathBuf>,

        /// Program and arguments, passed to the gateway verbatim
        #[arg(
            value_name = "COMMAND",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },

    /// Show gateway status
    Status {
        /// Config file path (default: POSTERN_CONFIG_PATH or ~/.postern/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Socket path (default from config or gateway.sock next to the config file)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("postern {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway {
            config,
            socket,
            allowlist,
        }) => {
            if let Err(e) = run_gateway(config, socket, allowlist).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            socket,
            command,
        }) => match run_remote(config, socket, command).await {
            Ok(exit_code) => std::process::exit(exit_code),
            Err(e) => {
                eprintln!("postern: {:#}", e);
                std::process::exit(LOCAL_ERROR_EXIT);
            }
        },
        Some(Commands::Status { config, socket }) => {
            if let Err(e) = run_status(config, socket).await {
                eprintln!("postern: {:#}", e);
                std::process::exit(LOCAL_ERROR_EXIT);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    socket: Option<std::path::PathBuf>,
    allowlist: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = socket {
        config.gateway.socket = Some(p);
    }
    if let Some(p) = allowlist {
        config.gateway.allowlist = Some(p);
    }
    log::info!(
        "starting gateway on {}",
        lib::config::resolve_socket_path(&config, &path).display()
    );
    lib::gateway::run_gateway(config, path).await
}

/// Submit one command to the gateway: print the remote output verbatim to
/// stdout (no added newline) and return the remote exit code.
async fn run_remote(
    config_path: Option<std::path::PathBuf>,
    socket: Option<std::path::PathBuf>,
    command: Vec<String>,
) -> anyhow::Result<i32> {
    use std::io::Write;

    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = socket {
        config.gateway.socket = Some(p);
    }
    let socket_path = lib::config::resolve_socket_path(&config, &path);

    let (program, args) = command.split_first().context("missing command")?;
    let client = lib::client::GatewayClient::new(socket_path);
    let result = client.run(program, args).await?;

    let mut stdout = std::io::stdout();
    write!(stdout, "{}", result.output)?;
    stdout.flush()?;
    Ok(result.exit_code)
}

async fn run_status(
    config_path: Option<std::path::PathBuf>,
    socket: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = socket {
        config.gateway.socket = Some(p);
    }
    let socket_path = lib::config::resolve_socket_path(&config, &path);
    let client = lib::client::GatewayClient::new(socket_path);
    let status = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
