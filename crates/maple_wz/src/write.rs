//! Saving archives
//!
//! Saving runs in two passes. The first serializes every image into a scratch file to learn its size and checksum.
//! The second lays out the directory lists right after the version field, followed by the images in the same
//! order, and writes everything out.
//!
//! Lists are written root first and then depth first. Each list holds the images of its directory before its
//! subdirectories, and images follow the lists in that same order.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use binrw::NullString;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::cursor::{compressed_int_len, WzWriter};
use crate::directory::{entry_name_len, entry_tail_len, write_entries, DirectoryEntry, ENTRY_DIRECTORY, ENTRY_IMAGE};
use crate::error::{Error, Result};
use crate::image::write_image;
use crate::read::WzArchive;
use crate::tree::{ImageState, Node, NodeId, NodeKind};
use crate::version::{encrypted_version, version_hash};

/// Options for how an archive is saved
#[derive(Debug, Clone, Default, Builder)]
pub struct SaveOptions {
    /// Client version to save for, the archive's own by default
    pub game_version: Option<u16>,

    /// Data start to use instead of the archive's
    pub data_start: Option<u32>,

    /// Copyright notice to use instead of the archive's
    pub copyright: Option<String>,
}

/// Image serialized during the first pass
#[derive(Debug)]
struct StagedImage {
    name: String,
    size: i32,
    checksum: i32,
}

/// Directory as laid out by the second pass
#[derive(Debug, Default)]
struct PlannedDirectory {
    name: String,
    checksum: i32,
    images: Vec<StagedImage>,
    subdirs: Vec<usize>,
    /// Bytes of the entry list
    list_len: u32,
    /// Bytes of the entry list, nested lists and images below it
    total_len: u32,
    offset: u32,
}

/// Sum of the bytes of `data`
fn checksum(data: &[u8]) -> i32 {
    data.iter().fold(0i32, |sum, &b| sum.wrapping_add(b as i32))
}

impl<R: Read + Seek> WzArchive<R> {
    /// Saves the archive to `path`
    ///
    /// The file is written next to `path` under a temporary name and moved over `path` once complete, so a failed
    /// save leaves any existing file untouched.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn save(&mut self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let staging = NamedTempFile::new_in(parent)?;
        let mut file = self.write_to(staging, options)?;
        file.as_file_mut().sync_all()?;
        file.persist(path).map_err(|e| Error::IOError(e.error))?;
        Ok(())
    }

    /// Serializes the archive into `out`, starting at its current position
    ///
    /// Images are parsed for the occasion and returned to their previous state afterwards.
    #[instrument(skip_all, err)]
    pub fn write_to<W: Write + Seek>(&mut self, out: W, options: &SaveOptions) -> Result<W> {
        let version = options.game_version.unwrap_or(self.version);
        let hash = version_hash(version);

        let mut header = self.header.clone();
        if let Some(copyright) = &options.copyright {
            header.copyright = NullString::from(copyright.as_str());
        }
        if let Some(data_start) = options.data_start {
            header.data_start = data_start;
        }
        if (header.data_start as u64) < header.encoded_len() {
            header.recalculate_data_start();
        }

        let mut scratch = tempfile::tempfile()?;
        let mut plan = Vec::new();
        let root = self.root();
        self.stage(root, &mut scratch, &mut plan)?;

        let names = plan_names(&plan);
        measure(&mut plan, 0, &names);
        let data_start = header.data_start;
        let directories_end = place(&mut plan, 0, data_start + 2);
        let images_len: u64 = plan
            .iter()
            .flat_map(|dir| &dir.images)
            .map(|image| image.size as u64)
            .sum();
        header.size = directories_end as u64 + images_len - data_start as u64;

        let mut writer = WzWriter::new(out, self.key.clone(), hash, data_start);
        header.write_padded(&mut writer, &self.padding)?;
        writer.write_u16::<LittleEndian>(encrypted_version(hash))?;
        write_lists(&mut writer, &plan, 0, directories_end)?;

        scratch.seek(SeekFrom::Start(0))?;
        io::copy(&mut scratch, &mut writer)?;
        debug!(version, size = header.size, directories = plan.len(), "saved archive");
        Ok(writer.into_inner())
    }

    /// Serializes the images below `dir` into `scratch` and records the directory layout
    fn stage(&mut self, dir: NodeId, scratch: &mut File, plan: &mut Vec<PlannedDirectory>) -> Result<usize> {
        let node = self.tree.get(dir).ok_or(Error::InvalidNode)?;
        let index = plan.len();
        plan.push(PlannedDirectory {
            name: node.name().to_owned(),
            checksum: node.as_directory().map_or(0, |d| d.checksum),
            ..Default::default()
        });

        let children = self.tree.children(dir);
        let (images, subdirs): (Vec<NodeId>, Vec<NodeId>) = children
            .into_iter()
            .filter(|&id| !matches!(self.tree.get(id).map(Node::kind), Some(NodeKind::Property(_))))
            .partition(|&id| matches!(self.tree.get(id).map(Node::kind), Some(NodeKind::Image(_))));

        for image in images {
            let staged = self.stage_image(image, scratch)?;
            plan[index].images.push(staged);
        }
        for subdir in subdirs {
            let child = self.stage(subdir, scratch, plan)?;
            plan[index].subdirs.push(child);
        }
        Ok(index)
    }

    fn stage_image(&mut self, image: NodeId, scratch: &mut File) -> Result<StagedImage> {
        let previous = self
            .tree
            .get(image)
            .and_then(Node::as_image)
            .map(|data| data.state())
            .ok_or(Error::InvalidNode)?;
        self.parse_image(image)?;

        let mut writer = WzWriter::new(Cursor::new(Vec::new()), self.key.clone(), self.hash, 0);
        let result = write_image(&mut writer, &self.tree, image, &mut self.reader);

        if previous != ImageState::Parsed {
            self.tree.clear_children(image);
            if let Some(data) = self.tree.get_mut(image).and_then(Node::as_image_mut) {
                data.state = previous;
            }
            self.forget_stale_caches();
        }
        result?;

        let bytes = writer.into_inner().into_inner();
        scratch.write_all(&bytes)?;
        let name = self
            .tree
            .get(image)
            .map(|node| node.name().to_owned())
            .unwrap_or_default();
        debug!(image = %name, size = bytes.len(), "staged image");
        Ok(StagedImage {
            name,
            size: bytes.len() as i32,
            checksum: checksum(&bytes),
        })
    }
}

/// Bytes each entry name takes, in the order the lists are written
fn plan_names(plan: &[PlannedDirectory]) -> Vec<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut names = vec![Vec::new(); plan.len()];
    for index in write_order(plan, 0) {
        let dir = &plan[index];
        let mut lens: Vec<usize> = dir
            .images
            .iter()
            .map(|image| entry_name_len(ENTRY_IMAGE, &image.name, &mut seen))
            .collect();
        lens.extend(
            dir.subdirs
                .iter()
                .map(|&sub| entry_name_len(ENTRY_DIRECTORY, &plan[sub].name, &mut seen)),
        );
        names[index] = lens;
    }
    names
}

/// Directories in the order their lists are written
fn write_order(plan: &[PlannedDirectory], index: usize) -> Vec<usize> {
    let mut order = vec![index];
    for &sub in &plan[index].subdirs {
        order.extend(write_order(plan, sub));
    }
    order
}

/// Computes list and total lengths bottom up
fn measure(plan: &mut [PlannedDirectory], index: usize, names: &[Vec<usize>]) {
    for sub in plan[index].subdirs.clone() {
        measure(plan, sub, names);
    }

    let dir = &plan[index];
    let count = dir.images.len() + dir.subdirs.len();
    if count == 0 {
        plan[index].list_len = 1;
        plan[index].total_len = 0;
        return;
    }

    let mut list_len = compressed_int_len(count as i32) as u32;
    let mut total_len = list_len;
    let mut name_lens = names[index].iter();
    for image in &dir.images {
        let entry = *name_lens.next().unwrap_or(&0) as u32 + entry_tail_len(image.size, image.checksum) as u32;
        list_len += entry;
        total_len += entry + image.size as u32;
    }
    for &sub in &dir.subdirs {
        let sub_dir = &plan[sub];
        let sub_total = sub_dir.total_len;
        let entry = *name_lens.next().unwrap_or(&0) as u32 + entry_tail_len(sub_total as i32, sub_dir.checksum) as u32;
        list_len += entry;
        total_len += entry + sub_total;
    }
    plan[index].list_len = list_len;
    plan[index].total_len = total_len;
}

/// Assigns list offsets in write order, returning the end of the lists
fn place(plan: &mut [PlannedDirectory], index: usize, offset: u32) -> u32 {
    plan[index].offset = offset;
    let mut next = offset + plan[index].list_len;
    for sub in plan[index].subdirs.clone() {
        next = place(plan, sub, next);
    }
    next
}

/// Image offsets in the order images follow the lists
fn image_offsets(plan: &[PlannedDirectory], index: usize, offset: &mut u32, out: &mut Vec<Vec<u32>>) {
    for image in &plan[index].images {
        out[index].push(*offset);
        *offset += image.size as u32;
    }
    for &sub in &plan[index].subdirs {
        image_offsets(plan, sub, offset, out);
    }
}

fn write_lists<W: Write + Seek>(
    writer: &mut WzWriter<W>,
    plan: &[PlannedDirectory],
    root: usize,
    images_start: u32,
) -> Result<()> {
    let mut offsets = vec![Vec::new(); plan.len()];
    let mut next = images_start;
    image_offsets(plan, root, &mut next, &mut offsets);

    for index in write_order(plan, root) {
        let dir = &plan[index];
        let images = dir.images.iter().zip(&offsets[index]).map(|(image, &offset)| DirectoryEntry {
            kind: ENTRY_IMAGE,
            name: image.name.clone(),
            size: image.size,
            checksum: image.checksum,
            offset,
        });
        let subdirs = dir.subdirs.iter().map(|&sub| DirectoryEntry {
            kind: ENTRY_DIRECTORY,
            name: plan[sub].name.clone(),
            size: plan[sub].total_len as i32,
            checksum: plan[sub].checksum,
            offset: plan[sub].offset,
        });
        let entries: Vec<DirectoryEntry> = images.chain(subdirs).collect();
        write_entries(writer, &entries)?;
    }
    Ok(())
}
