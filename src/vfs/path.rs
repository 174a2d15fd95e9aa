/// A path inside the archive's virtual filesystem
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualPath {
    /// Path segments (e.g., ["dir", "sub", "file.txt"])
    segments: Vec<String>,
    /// Whether this is an absolute path (starts with /)
    is_absolute: bool,
}

impl VirtualPath {
    /// Parse a path string into a VirtualPath.
    ///
    /// Empty segments and `.` are dropped; `..` is applied, never climbing
    /// above the first segment.
    pub fn parse(path: &str) -> Self {
        let is_absolute = path.starts_with('/');
        VirtualPath::root().join(path).with_absolute(is_absolute)
    }

    /// Segments of an entry path as the archive reports it
    /// (`./dir/b.txt`, `dir/`, `/abs/x` all normalize the same way).
    pub fn from_entry(pathname: &str) -> Self {
        Self::parse(pathname).with_absolute(true)
    }

    /// The root path `/`
    pub fn root() -> Self {
        VirtualPath {
            segments: Vec::new(),
            is_absolute: true,
        }
    }

    /// Create a new absolute path from segments
    pub fn from_segments(segments: Vec<String>) -> Self {
        VirtualPath {
            segments,
            is_absolute: true,
        }
    }

    fn with_absolute(mut self, is_absolute: bool) -> Self {
        self.is_absolute = is_absolute;
        self
    }

    /// Get the path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if this is an absolute path
    pub fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    /// Check if this path is empty (root)
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            None
        } else {
            let mut parent_segments = self.segments.clone();
            parent_segments.pop();
            Some(VirtualPath {
                segments: parent_segments,
                is_absolute: self.is_absolute,
            })
        }
    }

    /// Get the last segment (filename)
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// Join this path with another. An absolute `other` replaces this path.
    pub fn join(&self, other: &str) -> Self {
        let mut new_segments = if other.starts_with('/') {
            Vec::new()
        } else {
            self.segments.clone()
        };

        for segment in other.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            } else if segment == ".." {
                new_segments.pop();
            } else {
                new_segments.push(segment.to_string());
            }
        }

        VirtualPath {
            segments: new_segments,
            is_absolute: self.is_absolute || other.starts_with('/'),
        }
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.segments.join("/"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute() {
        let path = VirtualPath::parse("/dir/sub/file.txt");
        assert!(path.is_absolute());
        assert_eq!(path.segments(), &["dir", "sub", "file.txt"]);
    }

    #[test]
    fn test_parse_relative() {
        let path = VirtualPath::parse("sub/file.txt");
        assert!(!path.is_absolute());
        assert_eq!(path.segments(), &["sub", "file.txt"]);
    }

    #[test]
    fn test_entry_paths_normalize() {
        assert_eq!(VirtualPath::from_entry("./dir/b.txt").segments(), &["dir", "b.txt"]);
        assert_eq!(VirtualPath::from_entry("dir/").segments(), &["dir"]);
        assert_eq!(VirtualPath::from_entry("/abs//x").segments(), &["abs", "x"]);
        assert!(VirtualPath::from_entry("./").is_empty());
    }

    #[test]
    fn test_parent() {
        let path = VirtualPath::parse("/dir/sub/file.txt");
        let parent = path.parent().unwrap();
        assert_eq!(parent.segments(), &["dir", "sub"]);
        assert_eq!(VirtualPath::root().parent(), None);
    }

    #[test]
    fn test_join() {
        let path = VirtualPath::parse("/dir/sub");
        let joined = path.join("deeper/file.txt");
        assert_eq!(joined.segments(), &["dir", "sub", "deeper", "file.txt"]);
    }

    #[test]
    fn test_join_with_dotdot() {
        let path = VirtualPath::parse("/dir/sub/deeper");
        let joined = path.join("../file.txt");
        assert_eq!(joined.segments(), &["dir", "sub", "file.txt"]);
        assert!(VirtualPath::root().join("../..").is_empty());
    }

    #[test]
    fn test_join_absolute_restarts() {
        let path = VirtualPath::parse("/dir/sub");
        assert_eq!(path.join("/other").segments(), &["other"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(VirtualPath::root().to_string(), "/");
        assert_eq!(VirtualPath::parse("a/b").to_string(), "/a/b");
    }
}
