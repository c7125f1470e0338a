use clap::Args;
use maple_wz::SaveOptions;
use miette::{miette, Context, Result};
use std::path::PathBuf;
use tracing::info;

use super::ArchiveArgs;

#[derive(Args)]
pub struct RepackArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// A target WZ file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Client version to save for, the input's by default
    #[arg(long, value_name = "VERSION")]
    target_version: Option<u16>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RepackArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.overwrite && self.output.exists() {
            return Err(miette!("{} already exists", self.output.display()));
        }

        let mut wz = self.archive.open()?;
        info!(
            "read {} nodes of version {} from {}",
            wz.tree().len(),
            wz.version(),
            wz.name()
        );

        let options = SaveOptions::builder()
            .maybe_game_version(self.target_version)
            .build();
        wz.save(&self.output, &options)
            .context(format!("saving {}", self.output.display()))?;

        info!("wrote {}", self.output.display());
        Ok(())
    }
}
