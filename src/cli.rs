use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Users API over a primary/replica Postgres pair."
)]
pub struct Cli {
    /// Defaults to `serve`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server.
    Serve,
    /// Apply or revert schema migrations on the primary.
    Migrate {
        #[command(subcommand)]
        direction: MigrateDirection,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateDirection {
    /// Apply every pending migration.
    Up,
    /// Revert every migration newer than `--target`; 0 reverts them all.
    Down {
        #[arg(long, default_value_t = 0)]
        target: i64,
    },
}
