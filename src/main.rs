use clap::{Parser, Subcommand};
use proton_connect::catalog::Protocol;
use proton_connect::credentials::{self, Credentials};
use proton_connect::session::{
    self, openvpn, Interrupt, SessionCommand, SessionOptions, StartResult,
};
use proton_connect::{
    bundle, Catalog, Config, CredentialSource, CredentialStrategy, ListOptions, Paths,
};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "proton-connect")]
#[command(about = "A wrapper-script for the ProtonVPN OpenVPN configs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// proton-connect home directory [default: ~/.proton-connect]
    #[arg(long, global = true, env = "PROTON_CONNECT_HOME")]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the VPN configs and choose how credentials are retrieved
    Init {
        /// Credential strategy; keeps the current one if omitted
        #[arg(short, long, value_enum)]
        credentials: Option<CredentialStrategy>,

        /// Secret store entry or command (with `--credentials pass`)
        #[arg(long)]
        entry: Option<String>,

        /// OpenVPN username (with `--credentials store`)
        #[arg(short, long)]
        username: Option<String>,

        /// Do not download the configuration bundle
        #[arg(long)]
        skip_download: bool,
    },
    /// List available VPNs, grouped by country
    List {
        /// Countries to list (e.g. de nl); all if omitted
        countries: Vec<String>,

        /// Show every server instead of counts
        #[arg(short, long)]
        verbose: bool,
    },
    /// Connect to ProtonVPN inside a tmux session
    Connect {
        /// Server to connect to (e.g. de-01); chosen randomly if omitted
        vpn_name: Option<String>,

        /// Countries to choose from
        #[arg(short, long, num_args = 1..)]
        countries: Vec<String>,

        /// Command that brings the network up before openvpn starts
        #[arg(long)]
        netcmd: Option<String>,

        /// Start the session without attaching to it
        #[arg(long)]
        detach: bool,
    },
    /// Run openvpn in the foreground
    ///
    /// This command is started by `connect` inside the tmux session.
    /// Do not call this directly.
    #[command(hide = true)]
    Session {
        /// OpenVPN configuration file
        config_file: PathBuf,

        /// Command that brings the network up before openvpn starts
        #[arg(long)]
        netcmd: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let paths = match cli.home.clone() {
        Some(root) => Paths::new(root),
        None => Paths::new(Paths::default_root()?),
    };

    let in_session = matches!(cli.command, Commands::Session { .. });
    if let Err(e) = run(cli, &paths).await {
        error!("{}", e);
        if in_session {
            // keep the tmux window open long enough to read the error
            eprintln!("Press Enter to close this session.");
            let _ = std::io::stdin().lock().read_line(&mut String::new());
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, paths: &Paths) -> Result<()> {
    match cli.command {
        Commands::Init {
            credentials,
            entry,
            username,
            skip_download,
        } => init(paths, credentials, entry, username, skip_download).await,
        Commands::List { countries, verbose } => list(paths, countries, ListOptions { verbose }),
        Commands::Connect {
            vpn_name,
            countries,
            netcmd,
            detach,
        } => connect(paths, vpn_name, countries, netcmd, detach, cli.debug),
        Commands::Session {
            config_file,
            netcmd,
        } => run_session(paths, config_file, netcmd).await,
    }
}

async fn init(
    paths: &Paths,
    strategy: Option<CredentialStrategy>,
    entry: Option<String>,
    username: Option<String>,
    skip_download: bool,
) -> Result<()> {
    info!("Initializing {}", paths.root().display());
    std::fs::create_dir_all(paths.root())?;

    let config_file = paths.config_file();
    let config = if config_file.exists() {
        Config::load(&config_file)?
    } else {
        let config = Config::default();
        config.save(&config_file)?;
        println!("Created default config: {}", config_file.display());
        config
    };

    if skip_download {
        info!("Skipping configuration download");
    } else {
        let count = bundle::download(&config.bundle.url, &paths.vpn_dir()).await?;
        println!("Downloaded {} VPN configs to {}", count, paths.vpn_dir().display());
    }

    let credentials_file = paths.credentials_file();
    let strategy = match strategy {
        Some(strategy) => strategy,
        None => {
            let current = CredentialSource::load(&credentials_file)?.strategy();
            info!("Keeping current credential strategy");
            println!(
                "Credentials: {}",
                credentials::describe(current, &credentials_file)
            );
            return Ok(());
        }
    };

    let source = match strategy {
        CredentialStrategy::Store => {
            let username = match username {
                Some(username) => username,
                None => credentials::prompt_line("OpenVPN username: ")?,
            };
            let password = credentials::prompt_password("OpenVPN password: ")?;
            CredentialSource::Plaintext(Credentials { username, password })
        }
        CredentialStrategy::Pass => CredentialSource::SecretStore {
            entry: entry.unwrap_or_else(|| credentials::DEFAULT_ENTRY.to_string()),
        },
        CredentialStrategy::Prompt => CredentialSource::Prompt,
    };
    source.save(&credentials_file)?;

    println!(
        "Credentials: {}",
        credentials::describe(strategy, &credentials_file)
    );
    Ok(())
}

fn build_catalog(paths: &Paths, config: &Config, countries: &[String]) -> Result<Catalog> {
    let protocol: Protocol = config.catalog.protocol.parse()?;
    let filter = (!countries.is_empty()).then_some(countries);
    let catalog = Catalog::list_servers(&paths.vpn_dir(), protocol, filter)?;

    for country in catalog.empty_countries() {
        warn!("No servers for country '{}'", country);
    }
    Ok(catalog)
}

fn list(paths: &Paths, countries: Vec<String>, options: ListOptions) -> Result<()> {
    let config = Config::load_or_default(&paths.config_file())?;
    let catalog = build_catalog(paths, &config, &countries)?;

    print!("{}", catalog.render(options));
    Ok(())
}

fn connect(
    paths: &Paths,
    vpn_name: Option<String>,
    countries: Vec<String>,
    netcmd: Option<String>,
    detach: bool,
    debug: bool,
) -> Result<()> {
    let config = Config::load_or_default(&paths.config_file())?;

    // fail before tmux starts rather than inside the session
    let source = CredentialSource::load(&paths.credentials_file())?;
    info!("Credential strategy: {:?}", source.strategy());

    // an explicit name is looked up in the whole catalog
    let catalog = build_catalog(paths, &config, &[])?;
    let server = catalog.select(vpn_name.as_deref(), &countries, &mut rand::thread_rng())?;
    println!("Connecting to {} ({})", server.id, server.country);

    let command = SessionCommand {
        exe: std::env::current_exe()?,
        home: paths.root().to_path_buf(),
        config_file: catalog.path_of(&server),
        netcmd,
        debug,
    };
    let tmux = session::TmuxSession::new(config.session.name.clone());

    match session::start(&tmux, &command, !detach)? {
        StartResult::Started => {}
        StartResult::AlreadyRunning => {
            println!(
                "Session '{}' was already running; {} was not started",
                tmux.name(),
                server.id
            );
        }
    }
    Ok(())
}

async fn run_session(paths: &Paths, config_file: PathBuf, netcmd: Option<String>) -> Result<()> {
    // before anything that can block on the terminal or write secrets
    let interrupt = Interrupt::install()?;
    let config = Config::load_or_default(&paths.config_file())?;

    let creds = CredentialSource::load(&paths.credentials_file())?
        .resolve(&config.session.secret_store)?;
    let auth_file = credentials::write_auth_file(&creds, paths.root())?;
    interrupt.remove_on_signal(auth_file.path());

    let options = SessionOptions {
        config_file,
        auth_file: Some(auth_file.path().to_path_buf()),
        netcmd: netcmd.or(config.session.netcmd.clone()),
        ip_lookup: Some(config.ip_lookup.clone()),
    };

    match openvpn::run(&options, &interrupt).await? {
        session::SessionOutcome::Interrupted => println!("Disconnected."),
        session::SessionOutcome::Exited => println!("VPN connection closed."),
    }

    drop(auth_file);
    Ok(())
}
