use std::fmt;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name, without its directory.
    pub name: String,
    /// True if the entry is a directory.
    pub is_directory: bool,
}

impl RemoteEntry {
    /// A regular file.
    pub fn file(name: impl Into<String>) -> Self {
        RemoteEntry {
            name: name.into(),
            is_directory: false,
        }
    }

    /// A directory.
    pub fn directory(name: impl Into<String>) -> Self {
        RemoteEntry {
            name: name.into(),
            is_directory: true,
        }
    }
}

impl fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_directory {
            write!(f, "{}/", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}
