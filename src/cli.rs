use clap::{Parser, Subcommand};

/// Provisioner: asynchronous cluster provisioning façade
#[derive(Parser)]
#[command(name = "provisioner", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to PAAS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Mint and check credentials with the configured shared key
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect async jobs in the coordination store
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a signed credential for `x-auth-token`
    Issue {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value = "ROLE_USER")]
        role: String,
        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },
    /// Validate a credential and print who it belongs to
    Verify {
        token: String,
        #[arg(long, default_value = "ROLE_USER")]
        role: String,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Print the current status of a job
    Status { id: String },
    /// Block until a job leaves `pending`
    Wait {
        id: String,
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_token_issue_defaults() {
        let cli = Cli::parse_from(["provisioner", "token", "issue", "--subject", "alice", "--secret", "pw"]);
        match cli.command {
            Some(Commands::Token {
                command: TokenCommands::Issue { role, ttl_secs, .. },
            }) => {
                assert_eq!(role, "ROLE_USER");
                assert_eq!(ttl_secs, 3600);
            }
            _ => panic!("expected token issue"),
        }
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        assert!(Cli::parse_from(["provisioner"]).command.is_none());
    }
}
