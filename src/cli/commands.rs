use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::auth::{AuthService, NewAccount};
use crate::cli::{
    AccountArgs, AdminCommand, ClientAccountCommand, Command, ServeArgs, SessionsCommand,
};
use crate::config::{Config, clientdesk_home};
use crate::db::{self, Database, Role};
use crate::portal::audit;
use crate::web::server::{AppState, start_server};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Execute `command` against the resolved configuration.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Serve(args) => serve(args, config).await,
        Command::Migrate => {
            connect(&config).await?;
            println!("Migrations applied ({})", config.database.backend.as_str());
            Ok(())
        }
        Command::Admin {
            action: AdminCommand::Create(account),
        } => {
            let db = connect(&config).await?;
            create_account(&db, &config, account, Role::Admin, None).await
        }
        Command::ClientAccount {
            action: ClientAccountCommand::Create { client_id, account },
        } => {
            let db = connect(&config).await?;
            db.get_client(client_id)
                .await?
                .with_context(|| format!("client {client_id} does not exist"))?;
            create_account(&db, &config, account, Role::Client, Some(client_id)).await
        }
        Command::Sessions {
            action: SessionsCommand::Purge,
        } => {
            let db = connect(&config).await?;
            let purged = AuthService::new(db, config.portal.session_ttl_hours)
                .purge_expired()
                .await?;
            println!("Purged {purged} expired session(s)");
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<dyn Database>> {
    db::connect_from_config(&config.database)
        .await
        .context("failed to open database")
}

async fn create_account(
    db: &Arc<dyn Database>,
    config: &Config,
    args: AccountArgs,
    role: Role,
    client_id: Option<uuid::Uuid>,
) -> anyhow::Result<()> {
    let auth = AuthService::new(Arc::clone(db), config.portal.session_ttl_hours);
    let account = auth
        .create_account(NewAccount {
            email: args.email,
            display_name: args.name,
            password: args.password,
            role,
            client_id,
        })
        .await?;
    audit::record(
        "account.created",
        serde_json::json!({
            "account_id": account.id,
            "role": account.role.as_str(),
            "client_id": account.client_id,
            "actor": "cli",
        }),
    );
    println!("Created {} account {} ({})", role.as_str(), account.email, account.id);
    Ok(())
}

async fn serve(args: ServeArgs, config: Config) -> anyhow::Result<()> {
    let db = connect(&config).await?;
    let home = clientdesk_home();
    audit::init(&config.portal.audit, &home);

    let state = Arc::new(AppState::new(db, &config, &home));

    if let (Some(email), Some(password)) = (args.bootstrap_email, args.bootstrap_password) {
        match state.auth.bootstrap_admin(&email, "Administrator", &password).await? {
            Some(account) => tracing::info!(account_id = %account.id, "Bootstrapped admin account"),
            None => tracing::debug!("Admin bootstrap skipped"),
        }
    }

    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_state.auth.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(purged = n, "Purged expired sessions"),
                Err(e) => tracing::warn!("Session purge failed: {}", e),
            }
        }
    });

    start_server(&config.server, Arc::clone(&state)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    state.shutdown().await;
    // Give in-flight requests a moment to drain.
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(())
}
