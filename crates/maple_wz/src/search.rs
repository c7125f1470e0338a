//! Path lookup and searches over whole archives
//!
//! Full paths start with the archive name, `Mob.wz/0100100.img/info/speed`. Searches match against full paths and
//! parse every image first, so they are as expensive as reading the whole archive.

use std::io::{Read, Seek};

use regex::Regex;
use tracing::instrument;

use crate::error::Result;
use crate::read::WzArchive;
use crate::tree::{ImageState, Node, NodeId};

/// Whether `text` matches the glob `pattern`, where `*` matches any run of characters and `?` a single one
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, resume)) => {
                    p = star + 1;
                    t = resume + 1;
                    backtrack = Some((star, resume + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

impl<R> WzArchive<R> {
    /// Full path of `id`, the archive name included
    pub fn full_path(&self, id: NodeId) -> Option<String> {
        self.tree.path(id)
    }
}

impl<R: Read + Seek> WzArchive<R> {
    /// Node at the slash separated `path`
    ///
    /// Segments ignore case, images match with or without `.img` and `..` moves to the parent. The path may start
    /// with the archive name.
    pub fn get(&mut self, path: &str) -> Result<Option<NodeId>> {
        let path = path.trim_matches('/');
        let relative = match path.split_once('/') {
            Some((first, rest)) if first.eq_ignore_ascii_case(self.name()) => rest,
            None if path.eq_ignore_ascii_case(self.name()) => "",
            _ => path,
        };
        let root = self.root();
        self.walk(root, relative)
    }

    /// Parses every image that can still be parsed
    pub fn parse_all(&mut self) -> Result<()> {
        let mut pending = vec![self.root()];
        while let Some(id) = pending.pop() {
            let parseable = self
                .tree
                .get(id)
                .and_then(Node::as_image)
                .map_or(true, |image| image.state() != ImageState::Disposed);
            if parseable {
                self.ensure_parsed(id)?;
                pending.extend(self.tree.children(id).into_iter().rev());
            }
        }
        Ok(())
    }

    fn find(&mut self, mut matches: impl FnMut(&str) -> bool) -> Result<Vec<NodeId>> {
        self.parse_all()?;
        let root = self.root();
        let found = std::iter::once(root)
            .chain(self.tree.descendants(root))
            .filter(|&id| self.tree.path(id).is_some_and(|path| matches(&path)))
            .collect();
        Ok(found)
    }

    /// Nodes whose full path matches the glob `pattern`
    #[instrument(skip(self), err)]
    pub fn find_wildcard(&mut self, pattern: &str) -> Result<Vec<NodeId>> {
        self.find(|path| wildcard_match(pattern, path))
    }

    /// Nodes whose full path matches the regular expression `pattern` anywhere
    #[instrument(skip(self), err)]
    pub fn find_regex(&mut self, pattern: &str) -> Result<Vec<NodeId>> {
        let regex = Regex::new(pattern)?;
        self.find(|path| regex.is_match(path))
    }
}
