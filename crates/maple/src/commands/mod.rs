pub mod wz;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle WZ files
    Wz {
        #[command(subcommand)]
        command: wz::WzCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Wz { command } => command.handle(),
        }
    }
}
