pub mod extract;
pub mod get;
pub mod ls;
pub mod repack;

use std::{fs::File, io::BufReader, path::PathBuf};

use clap::{Args, ValueEnum};
use maple_wz::{MapleVersion, OpenOptions, WzArchive};
use miette::{Context, Result};

#[derive(clap::Subcommand)]
pub enum WzCommands {
    /// List the paths of a WZ file
    Ls(ls::LsArgs),
    /// Print a node of a WZ file
    Get(get::GetArgs),
    /// Extract sounds, bitmaps and raw data into a directory
    Extract(extract::ExtractArgs),
    /// Read a WZ file and save it again
    Repack(repack::RepackArgs),
}

impl WzCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            WzCommands::Ls(ls) => ls.handle(),
            WzCommands::Get(get) => get.handle(),
            WzCommands::Extract(extract) => extract.handle(),
            WzCommands::Repack(repack) => repack.handle(),
        }
    }
}

/// Client region, selecting the key of the archive
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Region {
    /// Global
    #[default]
    Gms,
    /// Europe and South East Asia
    Ems,
    /// Korea and clients without string encryption
    Bms,
    /// Early clients, also without string encryption
    Classic,
}

impl From<Region> for MapleVersion {
    fn from(region: Region) -> Self {
        match region {
            Region::Gms => MapleVersion::Gms,
            Region::Ems => MapleVersion::Ems,
            Region::Bms => MapleVersion::Bms,
            Region::Classic => MapleVersion::Classic,
        }
    }
}

#[derive(Args)]
pub struct ArchiveArgs {
    /// An input WZ file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Region the file was built for
    #[arg(long, value_enum, default_value_t = Region::Gms)]
    region: Region,

    /// Client version, searched for when omitted
    #[arg(long, value_name = "VERSION")]
    game_version: Option<u16>,
}

impl ArchiveArgs {
    pub fn open(&self) -> Result<WzArchive<BufReader<File>>> {
        let options = OpenOptions::builder()
            .maple_version(self.region.into())
            .maybe_game_version(self.game_version)
            .build();
        WzArchive::open(&self.file, options).context(format!("opening {}", self.file.display()))
    }
}
