use clap::Args;
use itertools::Itertools;
use maple_wz::{NodeKind, PropertyValue};
use miette::{miette, Result};

use super::ArchiveArgs;

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    archive: ArchiveArgs,

    /// Slash separated path of the node
    #[arg(short, long, value_name = "PATH")]
    path: String,
}

impl GetArgs {
    pub fn handle(&self) -> Result<()> {
        let mut wz = self.archive.open()?;
        let id = wz
            .get(&self.path)?
            .ok_or(miette!("{} not found in {}", self.path, wz.name()))?;
        let target = wz.as_node(id).unwrap_or(id);

        let children = wz.children(target)?;
        let node = wz
            .node(target)
            .ok_or(miette!("{} vanished while reading it", self.path))?;
        match node.kind() {
            NodeKind::Directory(_) => println!("directory"),
            NodeKind::Image(_) => println!("image"),
            NodeKind::Property(PropertyValue::Canvas(bitmap)) => println!(
                "canvas {}x{} format {} ({} bytes)",
                bitmap.width,
                bitmap.height,
                bitmap.format.code(),
                bitmap.data.len()
            ),
            NodeKind::Property(PropertyValue::Sound(sound)) => println!(
                "sound {} ms, {} ({} bytes)",
                sound.duration_ms,
                sound.extension(),
                sound.data.len()
            ),
            NodeKind::Property(PropertyValue::RawData(data)) => println!("raw ({} bytes)", data.len()),
            NodeKind::Property(value) => match value.to_text() {
                Some(text) => println!("{}: {text}", value.kind()),
                None => println!("{}", value.kind()),
            },
        }

        let names = children
            .iter()
            .filter_map(|&child| wz.node(child))
            .map(|child| child.name())
            .join("\n");
        if !names.is_empty() {
            println!("{names}");
        }
        Ok(())
    }
}
