use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use livehttpd::{check_for_update, Error, Server, ServerConfig, UpdateStatus};
use tracing_subscriber::EnvFilter;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(about, long_about = None, disable_version_flag = true)]
#[command(color = clap::ColorChoice::Never)]
struct Command {
    #[arg(short = 'p', long = "port", env = "LIVEHTTPD_PORT", default_value = "3000")]
    #[arg(help = "Port to listen on")]
    port: u16,

    #[arg(long = "host", env = "LIVEHTTPD_HOST", default_value = "0.0.0.0")]
    #[arg(help = "Address to listen on")]
    host: String,

    #[arg(short = 'o', long = "open", overrides_with = "no_browser")]
    #[arg(help = "Open the browser once the server is up")]
    open: bool,

    #[arg(long = "no-browser", overrides_with = "open")]
    #[arg(help = "Do not open the browser")]
    no_browser: bool,

    #[arg(long = "debounce", value_name = "MS", default_value = "50")]
    #[arg(help = "Coalesce changes within this many milliseconds into one reload (minimum 20)")]
    debounce: u64,

    #[arg(short = 'q', long = "quiet")]
    #[arg(help = "Only log warnings and errors")]
    quiet: bool,

    #[arg(short = 'v', long = "version")]
    #[arg(help = "Print version and check for updates")]
    version: bool,

    #[arg(help = "Directory to serve [default: current directory]")]
    directory: Option<PathBuf>,
}

impl Command {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            root: self.directory.clone().unwrap_or_else(|| PathBuf::from(".")),
            host: self.host.clone(),
            port: self.port,
            open_browser: self.open && !self.no_browser,
            debounce: Duration::from_millis(self.debounce),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Command::parse();

    if args.version {
        show_version().await;
        return ExitCode::SUCCESS;
    }

    let default_filter = if args.quiet {
        "warn"
    } else {
        "livehttpd=info,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args.config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("\nError: {err}");
            if let Error::AddrInUse { .. } = err {
                eprintln!("Try a different port with: {NAME} -p <port>\n");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Error> {
    let listening = Server::new(config)?.bind().await?;

    eprintln!();
    eprintln!("  Local:   {}", listening.local_url());
    eprintln!("  Network: {}", listening.network_url());
    eprintln!("  Root:    {}", listening.root().display());
    eprintln!();
    eprintln!("Press Ctrl+C to stop");
    eprintln!();

    listening.serve(shutdown_signal()).await
}

async fn show_version() {
    println!("{NAME} v{VERSION}");

    let status = tokio::task::spawn_blocking(|| check_for_update(NAME, VERSION))
        .await
        .ok()
        .flatten();
    match status {
        Some(UpdateStatus::Available(latest)) => {
            println!("New version available: v{latest}");
            println!("Update using: cargo install {NAME}");
        }
        Some(UpdateStatus::UpToDate) => println!("You're using the latest version!"),
        None => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Command::parse_from(["livehttpd"]).config();

        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(!config.open_browser);
        assert_eq!(config.debounce, Duration::from_millis(50));
    }

    #[test]
    fn test_last_browser_flag_wins() {
        let open = Command::parse_from(["livehttpd", "--no-browser", "-o"]).config();
        assert!(open.open_browser);

        let closed = Command::parse_from(["livehttpd", "-o", "--no-browser"]).config();
        assert!(!closed.open_browser);
    }

    #[test]
    fn test_directory_and_port() {
        let config = Command::parse_from(["livehttpd", "./dist", "-p", "5000"]).config();

        assert_eq!(config.root, PathBuf::from("./dist"));
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_command_is_consistent() {
        use clap::CommandFactory;
        Command::command().debug_assert();
    }
}
