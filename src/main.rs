use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use projecthub_client::auth::{ExpiryScheduler, FileTokenStore, Registration, SessionManager};
use projecthub_client::config::{Command, Config, ProductAction, ProjectAction};
use projecthub_client::error::SessionError;
use projecthub_client::http_client::{ApiClient, RequestOptions};
use projecthub_client::resources::{Draft, Product, Project, ProductsApi, ProjectsApi};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;

    // Initialize logging with a configured level; stdout is for command output
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("API: {}", config.api_base_url);
    tracing::debug!("Token file: {}", config.token_file.display());
    tracing::debug!("Debug mode: {:?}", config.debug_mode);

    let store = Arc::new(FileTokenStore::new(config.token_file.clone()));
    let session = Arc::new(SessionManager::from_config(&config, store)?);
    session.initialize().await;

    let client = Arc::new(ApiClient::from_config(&config, session.clone())?);

    if let Err(e) = run(command, &config, &session, &client).await {
        match e.downcast_ref::<SessionError>() {
            Some(session_error) => {
                tracing::debug!("Command failed: {}", session_error);
                eprintln!("Error: {}", session_error.user_message());
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(
    command: Command,
    config: &Config,
    session: &Arc<SessionManager>,
    client: &Arc<ApiClient>,
) -> Result<()> {
    match command {
        Command::Signin { email } => {
            let email = match email {
                Some(email) => email,
                None => Input::<String>::new().with_prompt("Email").interact_text()?,
            };
            let password = Password::new().with_prompt("Password").interact()?;

            session.sign_in(&email, &password).await?;
            println!("Signed in as {}", signed_in_name(session, &email).await);
        }

        Command::Register {
            email,
            first_name,
            last_name,
        } => {
            let registration = Registration {
                email: prompt_missing(email, "Email")?,
                first_name: prompt_missing(first_name, "First name")?,
                last_name: prompt_missing(last_name, "Last name")?,
                password: Password::new()
                    .with_prompt("Password")
                    .with_confirmation("Confirm password", "Passwords do not match")
                    .interact()?,
            };

            session.register(&registration).await?;
            println!(
                "Registered and signed in as {}",
                signed_in_name(session, &registration.email).await
            );
        }

        Command::Signout => {
            session.sign_out().await;
            println!("Signed out");
        }

        Command::Whoami => {
            require_session(session).await?;
            let profile = session.fetch_profile().await?;
            println!("{}", profile.display_name());
            println!("  id:    {}", profile.id);
            println!("  email: {}", profile.email);
        }

        Command::Status => print_status(session).await,

        Command::Refresh => {
            require_session(session).await?;
            session.refresh_token().await?;
            print_status(session).await;
        }

        Command::Projects { action } => run_projects(action, client).await?,

        Command::Products { action } => run_products(action, client).await?,

        Command::Request { method, path, json } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut options = RequestOptions::new();
            if let Some(body) = json {
                let value: Value = serde_json::from_str(&body).context("--json is not valid JSON")?;
                options = options.json(value);
            }

            let response = client.request(method, &path, options).await?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(|e| SessionError::network(&e))?;
            let body = String::from_utf8_lossy(&bytes);

            eprintln!("{}", status);
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", body),
            }

            if !status.is_success() {
                anyhow::bail!("Request failed with status {}", status.as_u16());
            }
        }

        Command::Watch => {
            require_session(session).await?;

            let period = Duration::from_secs(config.token_check_interval);
            let scheduler = ExpiryScheduler::spawn(session.clone(), period);
            let mut authenticated = session.subscribe();

            println!(
                "Watching session (check every {}s). Press Ctrl+C to stop.",
                config.token_check_interval
            );

            tokio::select! {
                _ = shutdown_signal() => {}
                _ = authenticated.wait_for(|signed_in| !signed_in) => {
                    println!("Session ended. Please sign in again.");
                }
            }

            scheduler.stop().await;
        }
    }

    Ok(())
}

async fn run_projects(action: ProjectAction, client: &Arc<ApiClient>) -> Result<()> {
    let projects = ProjectsApi::new(client.clone());

    match action {
        ProjectAction::List => {
            for project in projects.list().await? {
                print_project(&project);
            }
        }
        ProjectAction::Show { id } => {
            let project = projects.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        ProjectAction::Create { name, description } => {
            let draft = Draft {
                description,
                ..Draft::named(name)
            };
            print_project(&projects.create(&draft).await?);
        }
        ProjectAction::Update {
            id,
            name,
            description,
        } => {
            let draft = Draft {
                name,
                description,
                ..Draft::default()
            };
            print_project(&projects.update(&id, &draft).await?);
        }
        ProjectAction::Delete { id } => {
            projects.delete(&id).await?;
            println!("Deleted project {}", id);
        }
    }

    Ok(())
}

async fn run_products(action: ProductAction, client: &Arc<ApiClient>) -> Result<()> {
    let products = ProductsApi::new(client.clone());

    match action {
        ProductAction::List { projects } => {
            for product in products.list_many(&projects).await? {
                print_product(&product);
            }
        }
        ProductAction::Show { project, id } => {
            let product = products.get(&project, &id).await?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        ProductAction::Create {
            project,
            name,
            description,
        } => {
            let draft = Draft {
                description,
                ..Draft::named(name)
            };
            print_product(&products.create(&project, &draft).await?);
        }
        ProductAction::Update {
            project,
            id,
            name,
            description,
        } => {
            let draft = Draft {
                name,
                description,
                ..Draft::default()
            };
            print_product(&products.update(&project, &id, &draft).await?);
        }
        ProductAction::Delete { project, id } => {
            products.delete(&project, &id).await?;
            println!("Deleted product {} from project {}", id, project);
        }
    }

    Ok(())
}

async fn print_status(session: &SessionManager) {
    let snapshot = session.snapshot().await;

    if !snapshot.is_authenticated {
        println!("Not signed in");
        return;
    }

    if let Some(user) = &snapshot.user {
        println!("Signed in as {}", user.display_name());
    } else {
        println!("Signed in");
    }

    if let Some(expires_at) = snapshot.expires_at {
        let remaining = expires_at - chrono::Utc::now();
        println!(
            "Token expires at {} ({} min left)",
            expires_at.to_rfc3339(),
            remaining.num_minutes()
        );
    }
}

async fn require_session(session: &SessionManager) -> Result<()> {
    if session.is_authenticated().await {
        Ok(())
    } else {
        anyhow::bail!("Not signed in. Run `projecthub signin` first.")
    }
}

async fn signed_in_name(session: &SessionManager, fallback: &str) -> String {
    session
        .user()
        .await
        .map(|user| user.display_name())
        .unwrap_or_else(|| fallback.to_string())
}

fn prompt_missing(value: Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => Ok(Input::<String>::new().with_prompt(prompt).interact_text()?),
    }
}

fn print_project(project: &Project) {
    println!(
        "{}\t{}\t{}",
        project.id,
        project.name,
        project.description.as_deref().unwrap_or("")
    );
}

fn print_product(product: &Product) {
    println!(
        "{}\t{}\t{}\t{}",
        product.project_id.as_deref().unwrap_or("-"),
        product.id,
        product.name,
        product.description.as_deref().unwrap_or("")
    );
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, stopping...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping...");
        },
    }
}
