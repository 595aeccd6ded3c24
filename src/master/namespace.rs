//! Namespace boundary used by the master: file/directory bookkeeping and the
//! logical length of each file.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::NamespaceError;

pub type NamespaceResult<T> = Result<T, NamespaceError>;

/// Hierarchical namespace operations the master delegates to.
pub trait Namespace: Send + Sync {
    fn create(&self, path: &str) -> NamespaceResult<bool>;

    fn mkdir(&self, path: &str) -> NamespaceResult<bool>;

    /// Paths directly under `path`. Empty when `path` is a file.
    fn list(&self, path: &str) -> NamespaceResult<Vec<String>>;

    /// Remove a file or an empty directory.
    fn delete(&self, path: &str) -> NamespaceResult<bool>;

    fn get_file_length(&self, path: &str) -> NamespaceResult<i64>;

    fn set_file_length(&self, path: &str, length: i64) -> NamespaceResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Dir,
    File { length: i64 },
}

/// In-memory namespace; the root directory always exists.
#[derive(Debug)]
pub struct InMemoryNamespace {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        InMemoryNamespace {
            nodes: RwLock::new(nodes),
        }
    }
}

impl InMemoryNamespace {
    pub fn new() -> InMemoryNamespace {
        InMemoryNamespace::default()
    }

    fn insert(&self, path: &str, node: Node) -> NamespaceResult<bool> {
        validate(path)?;
        if path == "/" {
            return Err(NamespaceError::AlreadyExists(path.to_string()));
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let parent = parent_of(path);
        match nodes.get(parent) {
            Some(Node::Dir) => {}
            Some(Node::File { .. }) => {
                return Err(NamespaceError::NotADirectory(parent.to_string()));
            }
            None => return Err(NamespaceError::NotFound(parent.to_string())),
        }
        if nodes.contains_key(path) {
            return Err(NamespaceError::AlreadyExists(path.to_string()));
        }
        nodes.insert(path.to_string(), node);
        debug!(path, ?node, "namespace insert");
        Ok(true)
    }
}

impl Namespace for InMemoryNamespace {
    fn create(&self, path: &str) -> NamespaceResult<bool> {
        self.insert(path, Node::File { length: 0 })
    }

    fn mkdir(&self, path: &str) -> NamespaceResult<bool> {
        self.insert(path, Node::Dir)
    }

    fn list(&self, path: &str) -> NamespaceResult<Vec<String>> {
        validate(path)?;
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(path) {
            Some(Node::Dir) => Ok(children(&nodes, path)),
            Some(Node::File { .. }) => Ok(Vec::new()),
            None => Err(NamespaceError::NotFound(path.to_string())),
        }
    }

    fn delete(&self, path: &str) -> NamespaceResult<bool> {
        validate(path)?;
        if path == "/" {
            return Err(NamespaceError::InvalidPath(path.to_string()));
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(path) {
            None => return Err(NamespaceError::NotFound(path.to_string())),
            Some(Node::Dir) if !children(&nodes, path).is_empty() => {
                return Err(NamespaceError::DirectoryNotEmpty(path.to_string()))
            }
            Some(_) => {}
        }
        nodes.remove(path);
        debug!(path, "namespace delete");
        Ok(true)
    }

    fn get_file_length(&self, path: &str) -> NamespaceResult<i64> {
        validate(path)?;
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(path) {
            Some(Node::File { length }) => Ok(*length),
            Some(Node::Dir) => Err(NamespaceError::NotAFile(path.to_string())),
            None => Err(NamespaceError::NotFound(path.to_string())),
        }
    }

    fn set_file_length(&self, path: &str, length: i64) -> NamespaceResult<()> {
        validate(path)?;
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match nodes.get_mut(path) {
            Some(Node::File { length: current }) => {
                *current = length;
                Ok(())
            }
            Some(Node::Dir) => Err(NamespaceError::NotAFile(path.to_string())),
            None => Err(NamespaceError::NotFound(path.to_string())),
        }
    }
}

/// Absolute, `/`-separated, no empty components, no trailing slash.
fn validate(path: &str) -> NamespaceResult<()> {
    if path == "/" {
        return Ok(());
    }
    let valid = path.starts_with('/')
        && !path.ends_with('/')
        && path[1..].split('/').all(|c| !c.is_empty() && c != "." && c != "..");
    if valid {
        Ok(())
    } else {
        Err(NamespaceError::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn children(nodes: &BTreeMap<String, Node>, dir: &str) -> Vec<String> {
    let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
    nodes
        .range(prefix.clone()..)
        .take_while(|(p, _)| p.starts_with(&prefix))
        .filter(|(p, _)| p.as_str() != "/" && parent_of(p) == dir)
        .map(|(p, _)| p.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_existing_parent_directory() {
        let ns = InMemoryNamespace::new();
        assert_eq!(ns.create("/a/b"), Err(NamespaceError::NotFound("/a".into())));
        assert_eq!(ns.mkdir("/a"), Ok(true));
        assert_eq!(ns.create("/a/b"), Ok(true));
        assert_eq!(ns.create("/a/b"), Err(NamespaceError::AlreadyExists("/a/b".into())));
        assert_eq!(ns.create("/a/b/c"), Err(NamespaceError::NotADirectory("/a/b".into())));
    }

    #[test]
    fn rejects_malformed_paths() {
        let ns = InMemoryNamespace::new();
        for bad in ["", "a", "/a/", "//a", "/a//b", "/a/../b"] {
            assert_eq!(ns.create(bad), Err(NamespaceError::InvalidPath(bad.into())), "{bad}");
        }
        assert!(ns.mkdir("/").is_err());
    }

    #[test]
    fn list_returns_direct_children_only() {
        let ns = InMemoryNamespace::new();
        ns.mkdir("/d").unwrap();
        ns.mkdir("/d/e").unwrap();
        ns.create("/d/f").unwrap();
        ns.create("/d/e/g").unwrap();
        ns.create("/dx").unwrap();

        assert_eq!(ns.list("/").unwrap(), vec!["/d".to_string(), "/dx".to_string()]);
        assert_eq!(ns.list("/d").unwrap(), vec!["/d/e".to_string(), "/d/f".to_string()]);
        assert!(ns.list("/d/f").unwrap().is_empty());
        assert_eq!(ns.list("/nope"), Err(NamespaceError::NotFound("/nope".into())));
    }

    #[test]
    fn delete_only_empty_directories() {
        let ns = InMemoryNamespace::new();
        ns.mkdir("/d").unwrap();
        ns.create("/d/f").unwrap();
        assert_eq!(ns.delete("/d"), Err(NamespaceError::DirectoryNotEmpty("/d".into())));
        assert_eq!(ns.delete("/d/f"), Ok(true));
        assert_eq!(ns.delete("/d"), Ok(true));
        assert_eq!(ns.delete("/d"), Err(NamespaceError::NotFound("/d".into())));
        assert!(ns.delete("/").is_err());
    }

    #[test]
    fn file_length_tracking() {
        let ns = InMemoryNamespace::new();
        ns.create("/f").unwrap();
        assert_eq!(ns.get_file_length("/f"), Ok(0));
        ns.set_file_length("/f", 1000).unwrap();
        assert_eq!(ns.get_file_length("/f"), Ok(1000));
        assert_eq!(ns.get_file_length("/"), Err(NamespaceError::NotAFile("/".into())));
        assert_eq!(ns.set_file_length("/g", 1), Err(NamespaceError::NotFound("/g".into())));
    }
}
