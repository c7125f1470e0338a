//! Types for reading and navigating WZ archives
//!

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::mem;
use std::path::Path;

use bon::Builder;
use maple_crypto::{MapleVersion, WzKey};
use tracing::{debug, instrument, warn};

use crate::bitmap::{Bitmap, Pixels};
use crate::cursor::WzReader;
use crate::directory::validate_name;
use crate::error::{Error, Result};
use crate::header::WzHeader;
use crate::image::{self, load_payload};
use crate::property::{Point, PropertyValue};
use crate::tree::{Directory, Image, ImageState, Node, NodeId, NodeKind, Tree};
use crate::version::{self, version_hash};

/// Client version used when none is known
pub const DEFAULT_GAME_VERSION: u16 = 83;

/// Canvas child naming a canvas of the same image whose bitmap is shown instead
pub const INLINK: &str = "_inlink";

/// Canvas child naming a canvas anywhere in the archive whose bitmap is shown instead
pub const OUTLINK: &str = "_outlink";

/// Links followed in a row before giving up
const MAX_LINK_HOPS: usize = 16;

/// Options for how an archive is opened
#[derive(Debug, Clone, Default, Builder)]
pub struct OpenOptions {
    /// Region the archive was built for
    #[builder(default)]
    pub maple_version: MapleVersion,

    /// Client version, searched for when missing
    pub game_version: Option<u16>,

    /// Key material to use instead of the region's
    pub key: Option<WzKey>,

    /// IV to derive the key from instead of the region's
    pub iv: Option<[u8; 4]>,
}

impl OpenOptions {
    /// Key selected by these options
    pub fn key(&self) -> WzKey {
        match &self.key {
            Some(key) => key.clone(),
            None => WzKey::derive(self.iv.unwrap_or_else(|| self.maple_version.iv())),
        }
    }
}

/// WZ archive reader and editor
///
/// Directories are read when the archive is opened, images only when their children are first requested.
///
/// ```no_run
/// use maple_wz::{OpenOptions, WzArchive};
///
/// fn print_speed() -> maple_wz::error::Result<()> {
///     let mut wz = WzArchive::open("Mob.wz", OpenOptions::default())?;
///
///     if let Some(speed) = wz.get("0100100.img/info/speed")? {
///         println!("{}", wz.as_int(speed, 0));
///     }
///
///     Ok(())
/// }
/// ```
pub struct WzArchive<R> {
    pub(crate) reader: Option<WzReader<R>>,
    pub(crate) key: WzKey,
    pub(crate) header: WzHeader,
    pub(crate) padding: Vec<u8>,
    pub(crate) tree: Tree,
    pub(crate) version: u16,
    pub(crate) hash: u32,
    pub(crate) maple_version: MapleVersion,
    links: HashMap<NodeId, NodeId>,
    bitmaps: HashMap<NodeId, Pixels>,
}

impl<R> Debug for WzArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WzArchive")
            .field("name", &self.name())
            .field("version", &self.version)
            .field("maple_version", &self.maple_version)
            .field("nodes", &self.tree.len())
            .finish()
    }
}

impl WzArchive<BufReader<File>> {
    /// Opens the archive at `path`, named after its file name
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(path)?;
        Self::new(BufReader::new(file), name, options)
    }
}

impl<R> WzArchive<R> {
    /// Name of the archive, also the name of its root directory
    pub fn name(&self) -> &str {
        self.tree
            .get(self.tree.root())
            .map(Node::name)
            .unwrap_or_default()
    }

    /// File header
    pub fn header(&self) -> &WzHeader {
        &self.header
    }

    /// Client version
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Hash of the client version
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Region the archive was opened for
    pub fn maple_version(&self) -> MapleVersion {
        self.maple_version
    }

    /// Key used for strings and keyed bitmaps
    pub fn key(&self) -> &WzKey {
        &self.key
    }

    /// Node arena
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Root directory
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Node behind `id`, without parsing anything
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.tree.get(id)
    }

    /// Value of the property `id`, without following links
    pub fn value(&self, id: NodeId) -> Option<&PropertyValue> {
        self.tree.get(id).and_then(Node::value)
    }

    pub(crate) fn forget_stale_caches(&mut self) {
        let tree = &self.tree;
        self.links
            .retain(|from, to| tree.contains(*from) && tree.contains(*to));
        self.bitmaps.retain(|canvas, _| tree.contains(*canvas));
    }
}

impl<R: Read + Seek> WzArchive<R> {
    /// Reads the header and the directory tree from `inner`
    #[instrument(skip(inner, name), fields(name = %name.as_ref()), err)]
    pub fn new(inner: R, name: impl AsRef<str>, options: OpenOptions) -> Result<Self> {
        let key = options.key();
        let mut reader = WzReader::new(inner, key.clone())?;
        let len = reader.len();
        let (header, padding) = WzHeader::read_validated(&mut reader, len)?;
        reader.set_data_start(header.data_start);

        let layout = version::detect_layout(&mut reader)?;
        let resolved = match options.game_version {
            Some(game_version) => version::parse_with_version(&mut reader, name.as_ref(), layout, game_version)?,
            None => version::resolve(&mut reader, name.as_ref(), layout)?,
        };
        reader.set_hash(resolved.hash);
        debug!(
            version = resolved.version,
            nodes = resolved.tree.len(),
            ?layout,
            "read directory tree"
        );

        Ok(Self {
            reader: Some(reader),
            key,
            header,
            padding,
            tree: resolved.tree,
            version: resolved.version,
            hash: resolved.hash,
            maple_version: options.maple_version,
            links: HashMap::new(),
            bitmaps: HashMap::new(),
        })
    }

    /// Starts an empty archive held in memory
    pub fn create(name: impl Into<String>, options: OpenOptions) -> Self {
        let version = options.game_version.unwrap_or(DEFAULT_GAME_VERSION);
        Self {
            reader: None,
            key: options.key(),
            header: WzHeader::default(),
            padding: Vec::new(),
            tree: Tree::new(name),
            version,
            hash: version_hash(version),
            maple_version: options.maple_version,
            links: HashMap::new(),
            bitmaps: HashMap::new(),
        }
    }

    /// Materializes the properties of `image` unless they already are
    ///
    /// A failed parse leaves the image without children and in its previous state.
    pub fn parse_image(&mut self, image: NodeId) -> Result<()> {
        let node = self.tree.get(image).ok_or(Error::InvalidNode)?;
        let data = node.as_image().ok_or(Error::InvalidNode)?;
        let disposed = || Error::ImageDisposed(node.name().to_owned());
        let offset = match data.state() {
            ImageState::Parsed => return Ok(()),
            ImageState::Disposed => return Err(disposed()),
            ImageState::Unparsed | ImageState::PartiallyDisposed => data.offset().ok_or_else(disposed)?,
        };
        let reader = self.reader.as_mut().ok_or_else(disposed)?;

        debug!(image = node.name(), offset, "parsing image");
        if let Err(e) = image::parse_image(reader, &mut self.tree, image, offset) {
            self.tree.clear_children(image);
            return Err(e);
        }
        if let Some(data) = self.tree.get_mut(image).and_then(Node::as_image_mut) {
            data.state = ImageState::Parsed;
        }
        Ok(())
    }

    /// Parses `id` first when it is an image
    pub(crate) fn ensure_parsed(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.get(id).ok_or(Error::InvalidNode)?;
        if matches!(node.kind(), NodeKind::Image(_)) {
            self.parse_image(id)?;
        }
        Ok(())
    }

    /// Children of `id`, parsing it first when it is an image
    pub fn children(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.ensure_parsed(id)?;
        Ok(self.tree.children(id))
    }

    /// Child of `id` called `name`, ignoring case
    ///
    /// Images of a directory are also found without their `.img` extension. Vectors have the children `X`
    /// and `Y`, created when first asked for.
    pub fn child(&mut self, id: NodeId, name: &str) -> Result<Option<NodeId>> {
        self.ensure_parsed(id)?;
        if let Some(child) = self.tree.child(id, name) {
            return Ok(Some(child));
        }
        if let Some(PropertyValue::Vector(point)) = self.value(id) {
            if point.coordinate(name).is_none() {
                return Ok(None);
            }
            return self.tree.insert_coordinate(id, name).map(Some);
        }
        let is_directory = matches!(
            self.tree.get(id).map(Node::kind),
            Some(NodeKind::Directory(_))
        );
        Ok(is_directory
            .then(|| self.tree.child(id, &format!("{name}.img")))
            .flatten())
    }

    /// Walks `path` from `from`, where `..` moves to the parent
    pub(crate) fn walk(&mut self, from: NodeId, path: &str) -> Result<Option<NodeId>> {
        let mut current = from;
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => match self.tree.get(current).and_then(Node::parent) {
                    Some(parent) => current = parent,
                    None => return Ok(None),
                },
                name => match self.child(current, name)? {
                    Some(child) => current = child,
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(current))
    }

    /// Records that `image` resolved a link into `target`, so disposing `image` also disposes `target`
    ///
    /// Returns false when the reference is pointless: `target` is `image` itself or was never parsed.
    pub fn add_reference(&mut self, image: NodeId, target: NodeId) -> bool {
        if image == target {
            return false;
        }
        let target_state = self
            .tree
            .get(target)
            .and_then(Node::as_image)
            .map(Image::state);
        if matches!(target_state, None | Some(ImageState::Unparsed)) {
            return false;
        }
        match self.tree.get_mut(image).and_then(Node::as_image_mut) {
            Some(data) => data.references.insert(target),
            None => false,
        }
    }

    fn record_link(&mut self, from: NodeId, to: NodeId) {
        self.links.insert(from, to);
        let owner = self.tree.get(from).and_then(Node::image);
        let target = self.tree.get(to).and_then(Node::image);
        if let (Some(owner), Some(target)) = (owner, target) {
            self.add_reference(owner, target);
        }
    }

    /// Follows `id` through UOL links to the property they end at
    pub fn as_node(&mut self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        for _ in 0..MAX_LINK_HOPS {
            let Some(PropertyValue::Uol(path)) = self.value(current) else {
                return Some(current);
            };
            if let Some(&target) = self.links.get(&current) {
                current = target;
                continue;
            }

            let path = path.clone();
            let parent = self.tree.get(current).and_then(Node::parent)?;
            match self.walk(parent, &path) {
                Ok(Some(target)) => {
                    self.record_link(current, target);
                    current = target;
                }
                Ok(None) => {
                    warn!(path = %path, "link does not resolve");
                    return None;
                }
                Err(e) => {
                    warn!(path = %path, "link resolution failed: {e}");
                    return None;
                }
            }
        }
        warn!("link chain starting at {id:?} exceeds {MAX_LINK_HOPS} hops");
        None
    }

    fn link_text(&self, canvas: NodeId, name: &str) -> Option<String> {
        let child = self.tree.child(canvas, name)?;
        match self.value(child)? {
            PropertyValue::String(path) => Some(path.clone()),
            _ => None,
        }
    }

    /// Follows UOL links and canvas `_inlink`/`_outlink` references to the canvas holding the pixels
    fn follow_canvas(&mut self, id: NodeId) -> Option<NodeId> {
        let mut current = self.as_node(id)?;
        for _ in 0..MAX_LINK_HOPS {
            if !matches!(self.value(current), Some(PropertyValue::Canvas(_))) {
                return Some(current);
            }
            if let Some(&target) = self.links.get(&current) {
                current = target;
                continue;
            }

            let (start, path) = if let Some(path) = self.link_text(current, INLINK) {
                (self.tree.get(current).and_then(Node::image)?, path)
            } else if let Some(path) = self.link_text(current, OUTLINK) {
                let rest = path.split_once('/').map(|(_, rest)| rest.to_owned()).unwrap_or_default();
                (self.tree.root(), rest)
            } else {
                return Some(current);
            };

            match self.walk(start, &path) {
                Ok(Some(target)) => {
                    self.record_link(current, target);
                    current = self.as_node(target)?;
                }
                Ok(None) => {
                    warn!(path = %path, "canvas link does not resolve");
                    return None;
                }
                Err(e) => {
                    warn!(path = %path, "canvas link resolution failed: {e}");
                    return None;
                }
            }
        }
        warn!("canvas links starting at {id:?} exceed {MAX_LINK_HOPS} hops");
        None
    }

    fn resolved_value(&mut self, id: NodeId) -> Option<&PropertyValue> {
        let target = self.as_node(id)?;
        self.value(target)
    }

    /// Value as a 16 bit integer, or `default`
    pub fn as_short(&mut self, id: NodeId, default: i16) -> i16 {
        self.resolved_value(id)
            .and_then(PropertyValue::to_short)
            .unwrap_or(default)
    }

    /// Value as a 32 bit integer, or `default`
    pub fn as_int(&mut self, id: NodeId, default: i32) -> i32 {
        self.resolved_value(id)
            .and_then(PropertyValue::to_int)
            .unwrap_or(default)
    }

    /// Value as a 64 bit integer, or `default`
    pub fn as_long(&mut self, id: NodeId, default: i64) -> i64 {
        self.resolved_value(id)
            .and_then(PropertyValue::to_long)
            .unwrap_or(default)
    }

    /// Value as a 32 bit float, or `default`
    pub fn as_float(&mut self, id: NodeId, default: f32) -> f32 {
        self.resolved_value(id)
            .and_then(PropertyValue::to_float)
            .unwrap_or(default)
    }

    /// Value as a 64 bit float, or `default`
    pub fn as_double(&mut self, id: NodeId, default: f64) -> f64 {
        self.resolved_value(id)
            .and_then(PropertyValue::to_double)
            .unwrap_or(default)
    }

    /// Value rendered as text, or `default`
    pub fn as_string(&mut self, id: NodeId, default: &str) -> String {
        self.resolved_value(id)
            .and_then(PropertyValue::to_text)
            .unwrap_or_else(|| default.to_owned())
    }

    /// Value as a point, or `default`
    pub fn as_point(&mut self, id: NodeId, default: Point) -> Point {
        self.resolved_value(id)
            .and_then(PropertyValue::to_point)
            .unwrap_or(default)
    }

    /// Decoded pixels of the canvas `id`, following links
    pub fn bitmap(&mut self, id: NodeId) -> Result<&Pixels> {
        let target = self.follow_canvas(id).ok_or(Error::InvalidNode)?;
        if !self.bitmaps.contains_key(&target) {
            let Some(PropertyValue::Canvas(bitmap)) = self.tree.get(target).and_then(Node::value) else {
                return Err(Error::InvalidNode);
            };
            let raw = load_payload(&mut self.reader, &bitmap.data)?;
            let pixels = bitmap.decode(&raw, &self.key)?;
            self.bitmaps.insert(target, pixels);
        }
        self.bitmaps.get(&target).ok_or(Error::InvalidNode)
    }

    /// Decoded pixels of the canvas `id`, or `default`
    pub fn as_bitmap(&mut self, id: NodeId, default: Pixels) -> Pixels {
        match self.bitmap(id) {
            Ok(pixels) => pixels.clone(),
            Err(e) => {
                warn!("bitmap of {id:?} unavailable: {e}");
                default
            }
        }
    }

    /// Payload of a sound, raw data or canvas property
    pub fn bytes(&mut self, id: NodeId) -> Result<Vec<u8>> {
        let target = self.as_node(id).ok_or(Error::InvalidNode)?;
        let payload = match self.tree.get(target).and_then(Node::value) {
            Some(PropertyValue::Sound(sound)) => &sound.data,
            Some(PropertyValue::RawData(payload)) => payload,
            Some(PropertyValue::Canvas(bitmap)) => &bitmap.data,
            _ => return Err(Error::InvalidNode),
        };
        load_payload(&mut self.reader, payload)
    }

    /// Payload of a sound, raw data or canvas property, or `default`
    pub fn as_bytes(&mut self, id: NodeId, default: Vec<u8>) -> Vec<u8> {
        match self.bytes(id) {
            Ok(bytes) => bytes,
            Err(Error::InvalidNode) => default,
            Err(e) => {
                warn!("payload of {id:?} unavailable: {e}");
                default
            }
        }
    }

    /// Drops the properties of `image` and of the images it resolved links into
    ///
    /// The image is parsed again on its next access. Images built in memory have nowhere to be parsed from and
    /// are left untouched.
    #[instrument(skip(self), err)]
    pub fn partial_dispose(&mut self, image: NodeId) -> Result<()> {
        self.release(image, false)
    }

    /// Drops the properties of `image` for good, partially disposing the images it resolved links into
    #[instrument(skip(self), err)]
    pub fn dispose(&mut self, image: NodeId) -> Result<()> {
        self.release(image, true)
    }

    fn release(&mut self, image: NodeId, forget: bool) -> Result<()> {
        let data = self
            .tree
            .get_mut(image)
            .and_then(Node::as_image_mut)
            .ok_or(Error::InvalidNode)?;

        if forget {
            data.offset = None;
            data.state = ImageState::Disposed;
        } else if data.offset.is_none() {
            warn!("image {image:?} has no source to parse it again from, keeping it");
            return Ok(());
        } else if data.state == ImageState::Parsed {
            data.state = ImageState::PartiallyDisposed;
        }
        let references = mem::take(&mut data.references);

        self.tree.clear_children(image);
        self.forget_stale_caches();
        for target in references {
            if self.tree.contains(target) {
                self.release(target, false)?;
            }
        }
        Ok(())
    }

    /// Adds an empty directory under the directory `parent`
    pub fn add_directory(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId> {
        let name = name.into();
        validate_name(&name)?;
        self.require_directory(parent)?;
        self.tree
            .insert(parent, Node::new(name, NodeKind::Directory(Directory::default())))
    }

    /// Adds an empty image under the directory `parent`
    pub fn add_image(&mut self, parent: NodeId, name: impl Into<String>) -> Result<NodeId> {
        let name = name.into();
        validate_name(&name)?;
        self.require_directory(parent)?;
        self.tree
            .insert(parent, Node::new(name, NodeKind::Image(Image::created())))
    }

    fn require_directory(&self, id: NodeId) -> Result<()> {
        match self.tree.get(id).map(Node::kind) {
            Some(NodeKind::Directory(_)) => Ok(()),
            _ => Err(Error::InvalidNode),
        }
    }

    /// Adds a property under an image or a container property
    ///
    /// Children of a convex property must be extended properties.
    pub fn add_property(&mut self, parent: NodeId, name: impl Into<String>, value: PropertyValue) -> Result<NodeId> {
        self.ensure_parsed(parent)?;
        match self.tree.get(parent).map(Node::kind) {
            Some(NodeKind::Image(_)) => {}
            Some(NodeKind::Property(PropertyValue::Convex)) if !value.is_extended() => {
                return Err(Error::InvalidNode)
            }
            Some(NodeKind::Property(container)) if container.is_container() => {}
            _ => return Err(Error::InvalidNode),
        }
        self.tree
            .insert(parent, Node::new(name, NodeKind::Property(value)))
    }

    /// Removes `id` with everything below it
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        if id == self.tree.root() {
            return Err(Error::InvalidNode);
        }
        self.tree.remove(id).ok_or(Error::InvalidNode)?;
        self.forget_stale_caches();
        Ok(())
    }

    /// Renames `id`, keeping its place among its siblings
    pub fn rename_node(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.vector_parent(id).is_some() {
            return Err(Error::InvalidNode);
        }
        if !matches!(self.tree.get(id).map(Node::kind), Some(NodeKind::Property(_))) {
            validate_name(&name)?;
        }
        self.tree.rename(id, name)
    }

    /// Vector holding the coordinate `id`
    fn vector_parent(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.tree.get(id).and_then(Node::parent)?;
        matches!(self.value(parent), Some(PropertyValue::Vector(_))).then_some(parent)
    }

    /// Replaces the value of the property `id`
    ///
    /// A property with children only accepts container values. Setting a coordinate of a vector updates the
    /// vector, and replacing a vector drops its coordinates.
    pub fn set_value(&mut self, id: NodeId, value: PropertyValue) -> Result<()> {
        if let Some(vector) = self.vector_parent(id) {
            let coordinate = value.to_int().ok_or(Error::InvalidNode)?;
            let name = self.tree.get(id).map(|node| node.name().to_owned()).unwrap_or_default();
            if let Some(NodeKind::Property(PropertyValue::Vector(point))) =
                self.tree.get_mut(vector).map(|node| &mut node.kind)
            {
                point.set_coordinate(&name, coordinate);
            }
            if let Some(node) = self.tree.get_mut(id) {
                node.kind = NodeKind::Property(PropertyValue::Int(coordinate));
            }
            self.links.remove(&id);
            return Ok(());
        }
        if matches!(self.value(id), Some(PropertyValue::Vector(_))) {
            self.tree.clear_children(id);
            self.forget_stale_caches();
        }

        let node = self.tree.get_mut(id).ok_or(Error::InvalidNode)?;
        if !matches!(node.kind, NodeKind::Property(_)) || (!value.is_container() && node.children().len() > 0) {
            return Err(Error::InvalidNode);
        }
        node.kind = NodeKind::Property(value);
        self.links.remove(&id);
        self.bitmaps.remove(&id);
        Ok(())
    }

    /// Replaces the bitmap of the canvas `id`
    ///
    /// With `keyed` the compressed stream is split into blocks encrypted with the archive key.
    pub fn set_bitmap(&mut self, id: NodeId, pixels: &Pixels, keyed: bool) -> Result<()> {
        let key = keyed.then_some(&self.key);
        let bitmap = Bitmap::encode(pixels, key)?;
        let node = self.tree.get_mut(id).ok_or(Error::InvalidNode)?;
        match &mut node.kind {
            NodeKind::Property(PropertyValue::Canvas(current)) => *current = bitmap,
            _ => return Err(Error::InvalidNode),
        }
        self.links.remove(&id);
        self.bitmaps.insert(id, pixels.clone());
        Ok(())
    }
}
