pub mod enumerator;
pub mod file;
pub mod info;
pub mod node;
pub mod path;
pub mod tree;

pub use enumerator::ChildEnumerator;
pub use file::{OpenOptions, VfsFile, VirtualFile};
pub use info::{AttributeMatcher, AttributeValue, FileInfo, QueryFlags};
pub use node::NodeData;
pub use path::VirtualPath;
pub use tree::{NodeId, PathTree};
