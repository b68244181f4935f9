//! In-memory flash filesystem of the simulated board.
//!
//! Directory entries keep insertion order, which is the order `os.listdir`
//! reports them in.

use std::fmt;

/// POSIX error numbers as MicroPython reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// No such file or directory.
    NoEnt,
    /// Bad file descriptor.
    BadF,
    /// File exists.
    Exist,
    /// Not a directory.
    NotDir,
    /// Is a directory.
    IsDir,
    /// Invalid argument.
    Inval,
    /// Directory not empty.
    NotEmpty,
}

impl Errno {
    /// Numeric value.
    pub fn code(&self) -> u32 {
        match self {
            Errno::NoEnt => 2,
            Errno::BadF => 9,
            Errno::Exist => 17,
            Errno::NotDir => 20,
            Errno::IsDir => 21,
            Errno::Inval => 22,
            Errno::NotEmpty => 39,
        }
    }

    /// Symbolic name.
    pub fn name(&self) -> &'static str {
        match self {
            Errno::NoEnt => "ENOENT",
            Errno::BadF => "EBADF",
            Errno::Exist => "EEXIST",
            Errno::NotDir => "ENOTDIR",
            Errno::IsDir => "EISDIR",
            Errno::Inval => "EINVAL",
            Errno::NotEmpty => "ENOTEMPTY",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Errno {}] {}", self.code(), self.name())
    }
}

/// A file or directory.
#[derive(Debug, Clone)]
pub enum Node {
    /// File contents.
    File(Vec<u8>),
    /// Directory entries in creation order.
    Dir(Vec<(String, Node)>),
}

impl Node {
    fn entries(&self) -> Option<&Vec<(String, Node)>> {
        match self {
            Node::Dir(entries) => Some(entries),
            Node::File(_) => None,
        }
    }

    fn entries_mut(&mut self) -> Option<&mut Vec<(String, Node)>> {
        match self {
            Node::Dir(entries) => Some(entries),
            Node::File(_) => None,
        }
    }
}

/// Result of `os.stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// True for directories.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: usize,
}

/// The simulated filesystem.
#[derive(Debug, Clone)]
pub struct Vfs {
    root: Node,
    cwd: Vec<String>,
}

impl Default for Vfs {
    fn default() -> Self {
        Vfs {
            root: Node::Dir(Vec::new()),
            cwd: Vec::new(),
        }
    }
}

impl Vfs {
    /// Empty filesystem with `/` as working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `path` against the working directory into components.
    pub fn resolve(&self, path: &str) -> Vec<String> {
        let mut parts = if path.starts_with('/') {
            Vec::new()
        } else {
            self.cwd.clone()
        };
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                name => parts.push(name.to_string()),
            }
        }
        parts
    }

    /// The working directory as an absolute path.
    pub fn getcwd(&self) -> String {
        format!("/{}", self.cwd.join("/"))
    }

    /// Change the working directory.
    pub fn chdir(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        match self.node(&parts) {
            Some(Node::Dir(_)) => {
                self.cwd = parts;
                Ok(())
            }
            Some(Node::File(_)) => Err(Errno::NotDir),
            None => Err(Errno::NoEnt),
        }
    }

    fn node(&self, parts: &[String]) -> Option<&Node> {
        let mut node = &self.root;
        for part in parts {
            node = node
                .entries()?
                .iter()
                .find(|(name, _)| name == part)
                .map(|(_, child)| child)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, parts: &[String]) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for part in parts {
            node = node
                .entries_mut()?
                .iter_mut()
                .find(|(name, _)| name == part)
                .map(|(_, child)| child)?;
        }
        Some(node)
    }

    /// The entries of the parent directory of `parts`, plus the final name.
    fn parent_mut<'a>(&mut self, parts: &'a [String]) -> Result<(&mut Vec<(String, Node)>, &'a str), Errno> {
        let (name, parent) = parts.split_last().ok_or(Errno::Inval)?;
        let entries = self
            .node_mut(parent)
            .ok_or(Errno::NoEnt)?
            .entries_mut()
            .ok_or(Errno::NotDir)?;
        Ok((entries, name.as_str()))
    }

    /// `os.listdir`.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>, Errno> {
        let parts = self.resolve(path);
        let node = self.node(&parts).ok_or(Errno::NoEnt)?;
        let entries = node.entries().ok_or(Errno::NotDir)?;
        Ok(entries.iter().map(|(name, _)| name.clone()).collect())
    }

    /// `os.stat`.
    pub fn stat(&self, path: &str) -> Result<Stat, Errno> {
        let parts = self.resolve(path);
        match self.node(&parts).ok_or(Errno::NoEnt)? {
            Node::Dir(_) => Ok(Stat { is_dir: true, size: 0 }),
            Node::File(data) => Ok(Stat {
                is_dir: false,
                size: data.len(),
            }),
        }
    }

    /// `os.mkdir`.
    pub fn mkdir(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        let (entries, name) = self.parent_mut(&parts)?;
        if entries.iter().any(|(n, _)| n == name) {
            return Err(Errno::Exist);
        }
        entries.push((name.to_string(), Node::Dir(Vec::new())));
        Ok(())
    }

    /// `os.rmdir`. Only empty directories can be removed.
    pub fn rmdir(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        let (entries, name) = self.parent_mut(&parts)?;
        let index = entries.iter().position(|(n, _)| n == name).ok_or(Errno::NoEnt)?;
        match &entries[index].1 {
            Node::File(_) => Err(Errno::NotDir),
            Node::Dir(children) if !children.is_empty() => Err(Errno::NotEmpty),
            Node::Dir(_) => {
                entries.remove(index);
                Ok(())
            }
        }
    }

    /// `os.remove`. Directories are refused.
    pub fn remove(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        let (entries, name) = self.parent_mut(&parts)?;
        let index = entries.iter().position(|(n, _)| n == name).ok_or(Errno::NoEnt)?;
        if let Node::Dir(_) = entries[index].1 {
            return Err(Errno::IsDir);
        }
        entries.remove(index);
        Ok(())
    }

    /// `os.rename`. Renaming within one directory keeps the entry's position.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), Errno> {
        let from_parts = self.resolve(from);
        let to_parts = self.resolve(to);
        if self.node(&from_parts).is_none() {
            return Err(Errno::NoEnt);
        }
        if self.node(&to_parts).is_some() {
            return Err(Errno::Exist);
        }
        if to_parts.starts_with(&from_parts) {
            return Err(Errno::Inval);
        }

        let same_parent = from_parts[..from_parts.len() - 1] == to_parts[..to_parts.len().saturating_sub(1)];
        if same_parent {
            let (entries, name) = self.parent_mut(&from_parts)?;
            let new_name = to_parts.last().ok_or(Errno::Inval)?;
            if let Some(entry) = entries.iter_mut().find(|(n, _)| n == name) {
                entry.0 = new_name.clone();
            }
            return Ok(());
        }

        // Make sure the destination directory exists before detaching the node.
        self.parent_mut(&to_parts)?;
        let (entries, name) = self.parent_mut(&from_parts)?;
        let index = entries.iter().position(|(n, _)| n == name).ok_or(Errno::NoEnt)?;
        let (_, node) = entries.remove(index);
        let (entries, name) = self.parent_mut(&to_parts)?;
        entries.push((name.to_string(), node));
        Ok(())
    }

    /// Create `path` as an empty file, truncating an existing one.
    pub fn truncate(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        let (entries, name) = self.parent_mut(&parts)?;
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, Node::Dir(_))) => Err(Errno::IsDir),
            Some((_, Node::File(data))) => {
                data.clear();
                Ok(())
            }
            None => {
                entries.push((name.to_string(), Node::File(Vec::new())));
                Ok(())
            }
        }
    }

    /// Contents of the file at `path`.
    pub fn read(&self, path: &str) -> Result<&[u8], Errno> {
        let parts = self.resolve(path);
        match self.node(&parts).ok_or(Errno::NoEnt)? {
            Node::File(data) => Ok(data),
            Node::Dir(_) => Err(Errno::IsDir),
        }
    }

    /// Append `bytes` to the file at `path`.
    pub fn append(&mut self, path: &str, bytes: &[u8]) -> Result<(), Errno> {
        let parts = self.resolve(path);
        match self.node_mut(&parts).ok_or(Errno::NoEnt)? {
            Node::File(data) => {
                data.extend_from_slice(bytes);
                Ok(())
            }
            Node::Dir(_) => Err(Errno::IsDir),
        }
    }

    /// Create every missing directory along `path`.
    pub fn mkdir_all(&mut self, path: &str) -> Result<(), Errno> {
        let parts = self.resolve(path);
        for depth in 1..=parts.len() {
            let prefix = format!("/{}", parts[..depth].join("/"));
            match self.mkdir(&prefix) {
                Ok(()) | Err(Errno::Exist) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listdir_keeps_creation_order() {
        let mut vfs = Vfs::new();
        vfs.truncate("/main.py").unwrap();
        vfs.mkdir("/lib").unwrap();
        vfs.truncate("/boot.py").unwrap();
        assert_eq!(vfs.listdir("/").unwrap(), vec!["main.py", "lib", "boot.py"]);
    }

    #[test]
    fn test_errors() {
        let mut vfs = Vfs::new();
        vfs.mkdir("/d").unwrap();
        vfs.truncate("/d/f").unwrap();
        assert_eq!(vfs.listdir("/missing"), Err(Errno::NoEnt));
        assert_eq!(vfs.listdir("/d/f"), Err(Errno::NotDir));
        assert_eq!(vfs.rmdir("/d"), Err(Errno::NotEmpty));
        assert_eq!(vfs.remove("/d"), Err(Errno::IsDir));
        assert_eq!(vfs.mkdir("/d"), Err(Errno::Exist));
    }

    #[test]
    fn test_rename_in_place_and_across_directories() {
        let mut vfs = Vfs::new();
        vfs.truncate("/a").unwrap();
        vfs.truncate("/b").unwrap();
        vfs.rename("/a", "/c").unwrap();
        assert_eq!(vfs.listdir("/").unwrap(), vec!["c", "b"]);

        vfs.mkdir("/sub").unwrap();
        vfs.rename("/c", "/sub/c").unwrap();
        assert_eq!(vfs.listdir("/sub").unwrap(), vec!["c"]);
        assert_eq!(vfs.listdir("/").unwrap(), vec!["b", "sub"]);
    }

    #[test]
    fn test_resolve_relative_paths() {
        let mut vfs = Vfs::new();
        vfs.mkdir_all("/lib/pkg").unwrap();
        vfs.chdir("/lib").unwrap();
        assert_eq!(vfs.getcwd(), "/lib");
        assert_eq!(vfs.resolve("pkg/../x"), vec!["lib", "x"]);
    }
}
