use clap::Args;
use maple_wz::NodeKind;
use miette::Result;
use owo_colors::OwoColorize;

use super::ArchiveArgs;

#[derive(Args)]
pub struct LsArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// Only list paths matching this pattern, parsing every image
    #[arg(short, long, value_name = "PATTERN")]
    pattern: Option<String>,
}

impl LsArgs {
    pub fn handle(&self) -> Result<()> {
        let mut wz = self.archive.open()?;

        let nodes = match &self.pattern {
            Some(pattern) => wz.find_wildcard(pattern)?,
            None => wz.tree().descendants(wz.root()),
        };

        for id in nodes {
            let (Some(node), Some(path)) = (wz.node(id), wz.full_path(id)) else {
                continue;
            };
            match node.kind() {
                NodeKind::Directory(_) => println!("{}/", path.blue()),
                NodeKind::Image(_) => println!("{}", path.green()),
                NodeKind::Property(value) => println!("{path} ({})", value.kind().dimmed()),
            }
        }
        Ok(())
    }
}
