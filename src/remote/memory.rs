//! In-memory implementation of [`RemoteStore`].
//!
//! Backs `--memory` mounts and the test suite. Conflict checking is strict:
//! putting over an existing object with a stale (or absent) parent revision
//! fails, which is exactly the behavior the write-back path must surface.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

use parking_lot::Mutex;

use crate::{
    remote::{base_name, join_path, parent_path, Metadata, MetadataSource, RemoteStore, Revision},
    Error, Result,
};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        data: Vec<u8>,
        rev: Revision,
        modified: SystemTime,
    },
}

#[derive(Default)]
pub struct MemoryStore {
    nodes: Mutex<HashMap<String, Node>>,
    next_rev: AtomicU64,
    metadata_calls: AtomicU64,
    list_calls: AtomicU64,
    get_calls: AtomicU64,
    put_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `metadata` calls served so far; used to assert cache
    /// behavior in tests.
    pub fn metadata_calls(&self) -> u64 {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn fresh_rev(&self) -> Revision {
        format!("{:08x}", self.next_rev.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn node_metadata(node: &Node) -> Metadata {
        match node {
            Node::Dir => Metadata::directory(),
            Node::File {
                data,
                rev,
                modified,
            } => Metadata::file(data.len() as u64, *modified, rev.clone()),
        }
    }

    /// Register intermediate directories so listings see the new object.
    fn ensure_parents(nodes: &mut HashMap<String, Node>, path: &str) {
        let mut parent = parent_path(path);
        while parent != "/" {
            nodes.entry(parent.to_string()).or_insert(Node::Dir);
            parent = parent_path(parent);
        }
    }
}

impl MetadataSource for MemoryStore {
    fn metadata(&self, path: &str) -> Result<Option<Metadata>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if path == "/" {
            return Ok(Some(Metadata::directory()));
        }
        Ok(self.nodes.lock().get(path).map(Self::node_metadata))
    }

    fn list_folder(&self, path: &str) -> Result<Vec<(String, Metadata)>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.lock();
        if path != "/" && !matches!(nodes.get(path), Some(Node::Dir)) {
            return Err(Error::NotFound(path.to_string()).into());
        }
        let mut children: Vec<(String, Metadata)> = nodes
            .iter()
            .filter(|(p, _)| parent_path(p) == path && p.as_str() != "/")
            .map(|(p, node)| {
                let name = base_name(p).to_string();
                (name, Self::node_metadata(node))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }
}

impl RemoteStore for MemoryStore {
    fn get_content(&self, path: &str) -> Result<Option<(Vec<u8>, Revision)>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        match self.nodes.lock().get(path) {
            Some(Node::File { data, rev, .. }) => Ok(Some((data.clone(), rev.clone()))),
            Some(Node::Dir) => Err(Error::Remote(format!("{path} is a folder")).into()),
            None => Ok(None),
        }
    }

    fn put_content(
        &self,
        path: &str,
        data: &[u8],
        parent_rev: Option<&Revision>,
    ) -> Result<Revision> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(Node::Dir) => {
                return Err(Error::Remote(format!("{path} is a folder")).into());
            }
            Some(Node::File { rev, .. }) => {
                if parent_rev != Some(rev) {
                    return Err(Error::Conflict {
                        path: path.to_string(),
                        expected: parent_rev.cloned().unwrap_or_else(|| "none".into()),
                    }
                    .into());
                }
            }
            None => {}
        }
        Self::ensure_parents(&mut nodes, path);
        let rev = self.fresh_rev();
        nodes.insert(
            path.to_string(),
            Node::File {
                data: data.to_vec(),
                rev: rev.clone(),
                modified: SystemTime::now(),
            },
        );
        Ok(rev)
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .remove(from)
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        // Carry any subtree along with the object itself.
        let prefix = join_path(from, "");
        let moved: Vec<(String, Node)> = nodes
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix))
            .map(|(p, n)| (format!("{to}{}", &p[from.len()..]), n.clone()))
            .collect();
        nodes.retain(|p, _| !p.starts_with(&prefix));
        Self::ensure_parents(&mut nodes, to);
        nodes.insert(to.to_string(), node);
        nodes.extend(moved);
        Ok(())
    }

    fn copy_object(&self, from: &str, to: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get(from)
            .cloned()
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        let prefix = join_path(from, "");
        let copied: Vec<(String, Node)> = nodes
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix))
            .map(|(p, n)| (format!("{to}{}", &p[from.len()..]), n.clone()))
            .collect();
        Self::ensure_parents(&mut nodes, to);
        nodes.insert(to.to_string(), node);
        nodes.extend(copied);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        if nodes.remove(path).is_none() {
            return Err(Error::NotFound(path.to_string()).into());
        }
        let prefix = join_path(path, "");
        nodes.retain(|p, _| !p.starts_with(&prefix));
        Ok(())
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) {
            return Err(Error::Remote(format!("{path} already exists")).into());
        }
        Self::ensure_parents(&mut nodes, path);
        nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }
}
