use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Upper bound for `TOKEN_REFRESH_THRESHOLD` (one week)
pub const MAX_REFRESH_THRESHOLD: u64 = 7 * 24 * 60 * 60;

/// ProjectHub command-line client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the ProjectHub API
    #[arg(
        short = 'u',
        long,
        env = "PROJECTHUB_API_URL",
        default_value = "http://localhost:8000/api"
    )]
    pub api_url: String,

    /// File holding the persisted session token
    #[arg(short = 't', long, env = "PROJECTHUB_TOKEN_FILE")]
    pub token_file: Option<String>,

    /// Seconds between token expiry checks
    #[arg(long, env = "TOKEN_CHECK_INTERVAL", default_value = "60")]
    pub check_interval: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Debug mode (off, errors, all)
    #[arg(long, env = "DEBUG_MODE", default_value = "off")]
    pub debug_mode: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in with email and password
    Signin {
        /// Account email; prompted when omitted
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Forget the persisted session
    Signout,
    /// Show the signed-in user's profile
    Whoami,
    /// Show session state and token expiry
    Status,
    /// Exchange the current token for a new one
    Refresh,
    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage the products of a project
    Products {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// Send an arbitrary authenticated request and print the response
    Request {
        /// HTTP method, e.g. GET
        method: String,
        /// Path relative to the API URL, or an absolute URL
        path: String,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
    /// Keep the session refreshed until interrupted
    Watch,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProjectAction {
    List,
    Show {
        id: String,
    },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProductAction {
    List {
        /// Project to list; repeat for several
        #[arg(long = "project", required = true)]
        projects: Vec<String>,
    },
    Show {
        project: String,
        id: String,
    },
    Create {
        project: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        project: String,
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        project: String,
        id: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: String,

    // Session
    pub token_file: PathBuf,
    pub token_refresh_threshold: u64,
    pub token_check_interval: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Debug
    pub debug_mode: DebugMode,
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DebugMode {
    Off,
    Errors,
    All,
}

impl Config {
    /// Load configuration and the requested command.
    /// Loads `.env` first, then parses the command line
    pub fn load() -> Result<(Self, Command)> {
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        config.validate()?;

        Ok((config, args.command))
    }

    /// Build configuration from parsed arguments.
    /// Priority: CLI > ENV > defaults (`.env` is loaded by the caller first)
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let token_file = match args.token_file.as_deref() {
            Some(path) => expand_tilde(path),
            None => default_token_file()
                .context("Could not determine a config directory; set PROJECTHUB_TOKEN_FILE")?,
        };

        Ok(Config {
            api_base_url: args.api_url.trim_end_matches('/').to_string(),

            token_file,

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            token_check_interval: args.check_interval,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            debug_mode: parse_debug_mode(&args.debug_mode),

            log_level: args.log_level.clone(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "PROJECTHUB_API_URL must be an http(s) URL: {}",
                self.api_base_url
            );
        }

        if self.token_refresh_threshold > MAX_REFRESH_THRESHOLD {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD must be at most {} seconds",
                MAX_REFRESH_THRESHOLD
            );
        }

        if self.token_check_interval == 0 {
            anyhow::bail!("TOKEN_CHECK_INTERVAL must be at least 1 second");
        }

        if self.http_request_timeout == 0 || self.http_connect_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be at least 1 second");
        }

        Ok(())
    }
}

/// Default location of the persisted token
fn default_token_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("projecthub").join("session.json"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse debug mode from string
fn parse_debug_mode(s: &str) -> DebugMode {
    match s.to_lowercase().as_str() {
        "errors" => DebugMode::Errors,
        "all" => DebugMode::All,
        _ => DebugMode::Off,
    }
}
