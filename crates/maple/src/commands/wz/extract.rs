use clap::Args;
use maple_wz::PropertyValue;
use miette::{Context, IntoDiagnostic, Result};
use std::{fs::File, io::Write, path::PathBuf};
use tracing::{info, warn};

use super::ArchiveArgs;

#[derive(Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Only extract nodes whose full path matches this pattern
    #[arg(short, long, value_name = "PATTERN", default_value = "*")]
    pattern: String,

    /// Allow overwriting existing files
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let mut wz = self.archive.open()?;

        for id in wz.find_wildcard(&self.pattern)? {
            let extension = match wz.value(id) {
                Some(PropertyValue::Sound(sound)) => sound.extension(),
                Some(PropertyValue::Canvas(_)) => "zlib",
                Some(PropertyValue::RawData(_)) => "bin",
                _ => continue,
            };
            let Some(path) = wz.full_path(id) else {
                continue;
            };
            let bytes = match wz.bytes(id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("skipping {path}: {e}");
                    continue;
                }
            };

            let p = self.directory.join(format!("{path}.{extension}"));
            info!("writing {}", p.display());

            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }
            let mut out = if !self.overwrite {
                File::create_new(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            } else {
                File::create(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            };

            out.write_all(&bytes).into_diagnostic()?;
        }
        Ok(())
    }
}
