//! Arena holding the directory, image and property nodes of an archive
//!
//! Nodes are addressed by [`NodeId`] handles. A handle carries the generation of its slot, so handles to
//! removed nodes stop resolving instead of aliasing whatever reuses the slot.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::property::PropertyValue;

/// Handle to a node of a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Lifecycle of an image's property list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// Only the offset of the property list is known
    Unparsed,
    /// Property list materialized
    Parsed,
    /// Property list dropped, can be parsed again from its offset
    PartiallyDisposed,
    /// Offset discarded, the image cannot be parsed anymore
    Disposed,
}

/// Directory entry data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    /// Size recorded by the parent entry
    pub size: i32,
    /// Checksum recorded by the parent entry
    pub checksum: i32,
    /// Offset of the entry list
    pub offset: u32,
}

/// Image entry data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Size recorded by the parent entry
    pub size: i32,
    /// Checksum recorded by the parent entry
    pub checksum: i32,
    pub(crate) offset: Option<u64>,
    pub(crate) state: ImageState,
    pub(crate) references: BTreeSet<NodeId>,
}

impl Image {
    /// Image whose properties live at `offset` of the source stream
    pub(crate) fn stored(offset: u64, size: i32, checksum: i32) -> Self {
        Self {
            size,
            checksum,
            offset: Some(offset),
            state: ImageState::Unparsed,
            references: BTreeSet::new(),
        }
    }

    /// Image built in memory
    pub(crate) fn created() -> Self {
        Self {
            size: 0,
            checksum: 0,
            offset: None,
            state: ImageState::Parsed,
            references: BTreeSet::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Offset of the property list in the source stream
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether the property list is materialized
    pub fn is_parsed(&self) -> bool {
        self.state == ImageState::Parsed
    }

    /// Images this image's links resolved into
    pub fn references(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.references.iter().copied()
    }
}

/// What a node is
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Directory holding images and directories
    Directory(Directory),
    /// Image holding properties
    Image(Image),
    /// Property
    Property(PropertyValue),
}

/// Node of a [`Tree`]
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    image: Option<NodeId>,
    children: IndexMap<Box<str>, NodeId>,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Creates a detached node
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            parent: None,
            image: None,
            children: IndexMap::new(),
            kind,
        }
    }

    /// Name, unique among siblings
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Image owning this node, the node itself for images and `None` for directories
    pub fn image(&self) -> Option<NodeId> {
        self.image
    }

    /// What the node is
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Property value, for property nodes
    pub fn value(&self) -> Option<&PropertyValue> {
        match &self.kind {
            NodeKind::Property(value) => Some(value),
            _ => None,
        }
    }

    /// Directory data, for directory nodes
    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.kind {
            NodeKind::Directory(directory) => Some(directory),
            _ => None,
        }
    }

    /// Image data, for image nodes
    pub fn as_image(&self) -> Option<&Image> {
        match &self.kind {
            NodeKind::Image(image) => Some(image),
            _ => None,
        }
    }

    pub(crate) fn as_image_mut(&mut self) -> Option<&mut Image> {
        match &mut self.kind {
            NodeKind::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Children in stored order
    pub fn children(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    /// Whether this node may have children
    pub fn can_hold_children(&self) -> bool {
        match &self.kind {
            NodeKind::Directory(_) | NodeKind::Image(_) => true,
            NodeKind::Property(value) => value.is_container(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena of archive nodes
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
}

impl Tree {
    /// Creates a tree holding a root directory named `name`
    pub fn new(name: impl Into<String>) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            live: 0,
        };
        tree.root = tree.allocate(Node::new(name, NodeKind::Directory(Directory::default())));
        tree
    }

    /// Root directory
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, the root included
    pub fn len(&self) -> usize {
        self.live
    }

    /// Always false, the root is never removed
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Node behind `id`, if it is still alive
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    /// Attaches `node` under `parent`
    ///
    /// Fails with [`Error::DuplicateName`] when a sibling already uses the name.
    pub fn insert(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let parent_node = self.get(parent).ok_or(Error::InvalidNode)?;
        if !parent_node.can_hold_children() {
            return Err(Error::InvalidNode);
        }
        self.attach(parent, node)
    }

    /// Attaches the `X` or `Y` component of the vector `parent` as an integer property
    ///
    /// Components are derived from the vector's point and never written out.
    pub fn insert_coordinate(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let Some(PropertyValue::Vector(point)) = self.get(parent).and_then(Node::value) else {
            return Err(Error::InvalidNode);
        };
        let (name, value) = point.coordinate(name).ok_or(Error::InvalidNode)?;
        self.attach(parent, Node::new(name, NodeKind::Property(PropertyValue::Int(value))))
    }

    fn attach(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId> {
        let parent_node = self.get(parent).ok_or(Error::InvalidNode)?;
        if parent_node.children.contains_key(node.name.as_str()) {
            return Err(Error::DuplicateName(node.name));
        }

        let inherited = parent_node.image;
        let is_image = matches!(node.kind, NodeKind::Image(_));
        node.parent = Some(parent);
        node.children.clear();
        let name: Box<str> = node.name.as_str().into();

        let id = self.allocate(node);
        if let Some(created) = self.get_mut(id) {
            created.image = if is_image { Some(id) } else { inherited };
        }
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.insert(name, id);
        }
        Ok(id)
    }

    /// Detaches and drops `id` with all of its descendants
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        if id == self.root {
            return None;
        }
        let parent = self.get(id)?.parent;
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|_, child| *child != id);
        }
        self.release_subtree(id)
    }

    fn release_subtree(&mut self, id: NodeId) -> Option<Node> {
        let mut node = self.release(id)?;
        let mut pending: Vec<NodeId> = node.children.values().copied().collect();
        while let Some(child) = pending.pop() {
            if let Some(released) = self.release(child) {
                pending.extend(released.children.values().copied());
            }
        }
        node.children.clear();
        Some(node)
    }

    /// Drops every descendant of `id`, keeping the node itself
    pub fn clear_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.get_mut(id) {
            Some(node) => node.children.drain(..).map(|(_, child)| child).collect(),
            None => return,
        };
        for child in children {
            self.release_subtree(child);
        }
    }

    /// Renames `id`, keeping its position among its siblings
    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let node = self.get(id).ok_or(Error::InvalidNode)?;
        let old: Box<str> = node.name.as_str().into();
        if let Some(parent) = node.parent.and_then(|p| self.get_mut(p)) {
            if *old != *name && parent.children.contains_key(name.as_str()) {
                return Err(Error::DuplicateName(name));
            }
            if let Some(index) = parent.children.get_index_of(&old) {
                parent.children.shift_remove_index(index);
                parent.children.shift_insert(index, name.as_str().into(), id);
            }
        }
        if let Some(node) = self.get_mut(id) {
            node.name = name;
        }
        Ok(())
    }

    /// Child of `id` called `name`, compared exactly first and then ignoring ASCII case
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let node = self.get(id)?;
        if let Some(child) = node.children.get(name) {
            return Some(*child);
        }
        node.children
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, child)| *child)
    }

    /// Children of `id` in stored order
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|node| node.children().collect())
            .unwrap_or_default()
    }

    /// Slash separated path from the root, the root name included
    pub fn path(&self, id: NodeId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.get(c)) {
            segments.push(node.name.as_str());
            current = node.parent;
        }
        if segments.is_empty() {
            return None;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Nodes below `id` in depth first order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(next) = pending.pop() {
            out.push(next);
            pending.extend(self.children(next).into_iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Result;
    use crate::property::Point;

    fn property(name: &str, value: PropertyValue) -> Node {
        Node::new(name, NodeKind::Property(value))
    }

    #[test]
    fn insert_assigns_owning_image() -> Result<()> {
        let mut tree = Tree::new("Mob.wz");
        let dir = tree.insert(tree.root(), Node::new("Sub", NodeKind::Directory(Directory::default())))?;
        let image = tree.insert(dir, Node::new("0100100.img", NodeKind::Image(Image::created())))?;
        let info = tree.insert(image, property("info", PropertyValue::SubProperty))?;
        let speed = tree.insert(info, property("speed", PropertyValue::Int(-20)))?;

        assert_eq!(tree.get(dir).and_then(Node::image), None);
        assert_eq!(tree.get(image).and_then(Node::image), Some(image));
        assert_eq!(tree.get(speed).and_then(Node::image), Some(image));
        assert_eq!(tree.path(speed).as_deref(), Some("Mob.wz/Sub/0100100.img/info/speed"));
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        tree.insert(image, property("a", PropertyValue::Null))?;
        assert!(matches!(
            tree.insert(image, property("a", PropertyValue::Int(1))),
            Err(Error::DuplicateName(_))
        ));
        Ok(())
    }

    #[test]
    fn leaves_cannot_hold_children() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let leaf = tree.insert(image, property("a", PropertyValue::Int(1)))?;
        assert!(matches!(
            tree.insert(leaf, property("b", PropertyValue::Null)),
            Err(Error::InvalidNode)
        ));
        Ok(())
    }

    #[test]
    fn vectors_only_hold_their_coordinates() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let origin = tree.insert(image, property("origin", PropertyValue::Vector(Point::new(3, -9))))?;
        assert!(matches!(
            tree.insert(origin, property("z", PropertyValue::Int(1))),
            Err(Error::InvalidNode)
        ));
        assert!(matches!(tree.insert_coordinate(origin, "z"), Err(Error::InvalidNode)));

        let y = tree.insert_coordinate(origin, "y")?;
        assert_eq!(tree.get(y).map(Node::name), Some("Y"));
        assert_eq!(tree.get(y).and_then(Node::value), Some(&PropertyValue::Int(-9)));
        assert_eq!(tree.get(y).and_then(Node::image), Some(image));
        Ok(())
    }

    #[test]
    fn removed_handles_go_stale() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let sub = tree.insert(image, property("sub", PropertyValue::SubProperty))?;
        let leaf = tree.insert(sub, property("leaf", PropertyValue::Int(1)))?;
        assert_eq!(tree.len(), 4);

        tree.remove(sub);
        assert_eq!(tree.len(), 2);
        assert!(!tree.contains(sub));
        assert!(!tree.contains(leaf));

        let reused = tree.insert(image, property("other", PropertyValue::Null))?;
        assert!(tree.contains(reused));
        assert!(!tree.contains(leaf));
        assert!(!tree.contains(sub));
        Ok(())
    }

    #[test]
    fn child_lookup_ignores_case() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let leaf = tree.insert(image, property("Speed", PropertyValue::Int(1)))?;
        assert_eq!(tree.child(image, "speed"), Some(leaf));
        assert_eq!(tree.child(image, "missing"), None);
        Ok(())
    }

    #[test]
    fn rename_keeps_order() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let first = tree.insert(image, property("a", PropertyValue::Null))?;
        let second = tree.insert(image, property("b", PropertyValue::Null))?;
        tree.rename(first, "c")?;

        assert_eq!(tree.children(image), vec![first, second]);
        assert_eq!(tree.child(image, "c"), Some(first));
        assert!(matches!(tree.rename(first, "b"), Err(Error::DuplicateName(_))));
        Ok(())
    }

    #[test]
    fn clear_children_releases_descendants() -> Result<()> {
        let mut tree = Tree::new("a.wz");
        let image = tree.insert(tree.root(), Node::new("x.img", NodeKind::Image(Image::created())))?;
        let sub = tree.insert(image, property("sub", PropertyValue::SubProperty))?;
        tree.insert(sub, property("leaf", PropertyValue::Int(1)))?;

        tree.clear_children(image);
        assert_eq!(tree.len(), 2);
        assert!(tree.children(image).is_empty());
        assert_eq!(tree.descendants(tree.root()), vec![image]);
        Ok(())
    }
}
