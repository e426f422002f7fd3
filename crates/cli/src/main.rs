//! `vision` binary: serve the API, kick off test runs, and run
//! maintenance commands.

mod wiring;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::error,
    tracing_subscriber::EnvFilter,
};

/// Process exit codes. Clap's own parse failures exit with 2, matching
/// `INVALID_ARGS`.
const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INVALID_ARGS: i32 = 2;
const EXIT_AUTH: i32 = 3;
const EXIT_UPSTREAM: i32 = 4;

#[derive(Parser)]
#[command(name = "vision", about = "Visual regression and AI browser automation engine")]
struct Cli {
    /// Path to vision.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON API.
    Serve,

    /// Start a test run over a project's page × browser matrix and print
    /// the run id.
    RunTests {
        #[arg(long)]
        project: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
    },

    /// Delete expired action-cache entries.
    CleanupCache,

    /// Probe the configured secret store.
    VaultCheck,
}

#[tokio::main]
async fn main() {
    // Missing .env is fine; values already in the environment win.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match vision_config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return EXIT_INVALID_ARGS;
        },
    };

    match cli.command {
        Command::Serve => {
            let app = match wiring::build(config).await {
                Ok(app) => app,
                Err(e) => {
                    error!(error = %e, "failed to assemble application");
                    return EXIT_FAILURE;
                },
            };
            let bind = app.config.gateway.bind.clone();
            match vision_gateway::serve(app.state, &bind).await {
                Ok(()) => EXIT_OK,
                Err(e) => {
                    error!(error = %e, "gateway exited");
                    EXIT_FAILURE
                },
            }
        },

        Command::RunTests {
            project,
            branch,
            commit,
        } => {
            let app = match wiring::build(config).await {
                Ok(app) => app,
                Err(e) => {
                    error!(error = %e, "failed to assemble application");
                    return EXIT_FAILURE;
                },
            };

            match app
                .state
                .runs
                .start_run(
                    &project,
                    vision_pipeline::RunContext {
                        branch,
                        commit_sha: commit,
                        environment: None,
                    },
                )
                .await
            {
                Ok(run) => {
                    println!("{}", serde_json::json!({"test_run_id": run.id, "status": run.status}));
                    EXIT_OK
                },
                Err(vision_pipeline::PipelineError::Store(
                    vision_store::StoreError::NotFound { .. },
                )) => {
                    error!(project, "project not found");
                    EXIT_INVALID_ARGS
                },
                Err(e) => {
                    error!(error = %e, "failed to start test run");
                    EXIT_FAILURE
                },
            }
        },

        Command::CleanupCache => {
            let pool = match vision_store::connect(&config.storage.database_url).await {
                Ok(pool) => pool,
                Err(e) => {
                    error!(error = %e, "failed to open database");
                    return EXIT_FAILURE;
                },
            };
            match vision_store::Store::new(pool).action_cache().cleanup_expired().await {
                Ok(removed) => {
                    println!("{}", serde_json::json!({"removed": removed}));
                    EXIT_OK
                },
                Err(e) => {
                    error!(error = %e, "cache cleanup failed");
                    EXIT_FAILURE
                },
            }
        },

        Command::VaultCheck => {
            let Some(client) = vault_client(&config) else {
                error!("secret store is not configured (BRAINZLAB_VAULT_URL / VAULT_SERVICE_TOKEN)");
                return EXIT_AUTH;
            };
            if client.healthy().await {
                println!("{}", serde_json::json!({"vault": "healthy"}));
                EXIT_OK
            } else {
                error!("secret store did not answer its health probe");
                EXIT_UPSTREAM
            }
        },
    }
}

fn vault_client(config: &vision_config::VisionConfig) -> Option<vision_vault::VaultClient> {
    let url = config.vault.url.clone()?;
    let token = config.vault.service_token.clone()?;
    Some(vision_vault::VaultClient::new(
        url,
        token,
        config.vault.environment.clone(),
    ))
}
