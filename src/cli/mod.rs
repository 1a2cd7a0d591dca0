//! Command-line interface for the `clientdesk` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

mod commands;

pub use commands::run;

/// Top-level CLI parser.
#[derive(Debug, Parser)]
#[command(
    name = "clientdesk",
    version,
    about = "Agency client portal: admin area, client portal and API"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Settings file (defaults to ~/.clientdesk/clientdesk.toml)
    #[arg(short, long, global = true, env = "CLIENTDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// `serve` when no subcommand was given.
    pub fn resolved_command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Serve(ServeArgs::default()))
    }

    /// JSON logs from the flag or `CLIENTDESK_LOG_FORMAT=json`.
    pub fn json_logs(&self) -> bool {
        self.log_json
            || std::env::var("CLIENTDESK_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(ServeArgs),

    /// Apply database migrations and exit
    Migrate,

    /// Manage administrator logins
    Admin {
        #[command(subcommand)]
        action: AdminCommand,
    },

    /// Manage client portal logins
    ClientAccount {
        #[command(subcommand)]
        action: ClientAccountCommand,
    },

    /// Maintain login sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Create this admin on startup when no admin exists yet
    #[arg(long, env = "CLIENTDESK_BOOTSTRAP_ADMIN_EMAIL", requires = "bootstrap_password")]
    pub bootstrap_email: Option<String>,

    #[arg(long, env = "CLIENTDESK_BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_password: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AdminCommand {
    /// Create an administrator account
    Create(AccountArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ClientAccountCommand {
    /// Create a portal login for an existing client
    Create {
        #[arg(long)]
        client_id: Uuid,

        #[command(flatten)]
        account: AccountArgs,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum SessionsCommand {
    /// Delete expired sessions
    Purge,
}

#[derive(Debug, Clone, Args)]
pub struct AccountArgs {
    #[arg(long)]
    pub email: String,

    /// Display name
    #[arg(long)]
    pub name: String,

    #[arg(long, env = "CLIENTDESK_ACCOUNT_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::*;

    #[test]
    fn clap_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["clientdesk"]).expect("cli should parse");
        assert!(matches!(cli.resolved_command(), Command::Serve(_)));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["clientdesk", "migrate", "--log-json", "-c", "/tmp/cd.toml"])
            .expect("cli should parse");
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cd.toml")));
        assert!(matches!(cli.resolved_command(), Command::Migrate));
    }

    #[test]
    fn client_account_create_parses_client_id() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "clientdesk",
            "client-account",
            "create",
            "--client-id",
            &id.to_string(),
            "--email",
            "owner@acme.test",
            "--name",
            "Acme Owner",
            "--password",
            "long-enough-pass",
        ])
        .expect("cli should parse");
        let Some(Command::ClientAccount {
            action: ClientAccountCommand::Create { client_id, account },
        }) = cli.command
        else {
            panic!("expected client-account create");
        };
        assert_eq!(client_id, id);
        assert_eq!(account.email, "owner@acme.test");
    }

    #[test]
    fn client_account_create_rejects_bad_uuid() {
        let parsed = Cli::try_parse_from([
            "clientdesk",
            "client-account",
            "create",
            "--client-id",
            "not-a-uuid",
            "--email",
            "a@b.test",
            "--name",
            "A",
            "--password",
            "long-enough-pass",
        ]);
        assert!(parsed.is_err());
    }
}
