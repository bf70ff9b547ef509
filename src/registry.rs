use fsnotifier_sdk::WatchDescriptor;
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

/// Either side of a watch: the kernel descriptor or the watched path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Descriptor(WatchDescriptor),
    Path(PathBuf),
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchTarget::Descriptor(wd) => write!(f, "descriptor '{wd}'"),
            WatchTarget::Path(path) => write!(f, "path '{}'", path.display()),
        }
    }
}

impl From<WatchDescriptor> for WatchTarget {
    fn from(wd: WatchDescriptor) -> Self {
        WatchTarget::Descriptor(wd)
    }
}

impl From<PathBuf> for WatchTarget {
    fn from(path: PathBuf) -> Self {
        WatchTarget::Path(path)
    }
}

impl From<&Path> for WatchTarget {
    fn from(path: &Path) -> Self {
        WatchTarget::Path(path.to_path_buf())
    }
}

impl From<&PathBuf> for WatchTarget {
    fn from(path: &PathBuf) -> Self {
        WatchTarget::Path(path.clone())
    }
}

impl From<&str> for WatchTarget {
    fn from(path: &str) -> Self {
        WatchTarget::Path(PathBuf::from(path))
    }
}

/// Bidirectional descriptor <-> path association.
///
/// Both maps are only ever changed together, so a descriptor is present in
/// one direction iff its path is present in the other.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    paths: HashMap<WatchDescriptor, PathBuf>,
    descriptors: HashMap<PathBuf, WatchDescriptor>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install both directions. Stale associations of either key are dropped
    /// from both maps.
    pub fn insert(&mut self, wd: WatchDescriptor, path: PathBuf) {
        if let Some(old_path) = self.paths.insert(wd, path.clone()) {
            self.descriptors.remove(&old_path);
        }
        if let Some(old_wd) = self.descriptors.insert(path, wd) {
            if old_wd != wd {
                self.paths.remove(&old_wd);
            }
        }
    }

    pub fn path_of(&self, wd: WatchDescriptor) -> Option<&Path> {
        self.paths.get(&wd).map(PathBuf::as_path)
    }

    pub fn descriptor_of(&self, path: &Path) -> Option<WatchDescriptor> {
        self.descriptors.get(path).copied()
    }

    /// Look up a watch from either side.
    pub fn resolve(&self, target: &WatchTarget) -> Option<(WatchDescriptor, &Path)> {
        match target {
            WatchTarget::Descriptor(wd) => self.path_of(*wd).map(|path| (*wd, path)),
            WatchTarget::Path(path) => self
                .descriptors
                .get_key_value(path.as_path())
                .map(|(path, &wd)| (wd, path.as_path())),
        }
    }

    pub fn contains(&self, target: &WatchTarget) -> bool {
        match target {
            WatchTarget::Descriptor(wd) => self.paths.contains_key(wd),
            WatchTarget::Path(path) => self.descriptors.contains_key(path),
        }
    }

    /// Remove both directions, returning the pair that was registered.
    pub fn remove(&mut self, target: &WatchTarget) -> Option<(WatchDescriptor, PathBuf)> {
        let wd = match target {
            WatchTarget::Descriptor(wd) => *wd,
            WatchTarget::Path(path) => self.descriptor_of(path)?,
        };
        let path = self.paths.remove(&wd)?;
        self.descriptors.remove(&path);
        Some((wd, path))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WatchDescriptor, &Path)> {
        self.paths.iter().map(|(&wd, path)| (wd, path.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consistent(registry: &WatchRegistry) {
        assert_eq!(registry.paths.len(), registry.descriptors.len());
        for (wd, path) in registry.iter() {
            assert_eq!(registry.descriptor_of(path), Some(wd));
        }
    }

    #[test]
    fn test_insert_lookup_both_directions() {
        let mut registry = WatchRegistry::new();
        registry.insert(WatchDescriptor(1), PathBuf::from("/tmp/a"));
        registry.insert(WatchDescriptor(2), PathBuf::from("/tmp/b"));

        assert_eq!(registry.path_of(WatchDescriptor(1)), Some(Path::new("/tmp/a")));
        assert_eq!(registry.descriptor_of(Path::new("/tmp/b")), Some(WatchDescriptor(2)));
        assert_eq!(
            registry.resolve(&"/tmp/a".into()),
            Some((WatchDescriptor(1), Path::new("/tmp/a")))
        );
        assert_eq!(
            registry.resolve(&WatchDescriptor(2).into()),
            Some((WatchDescriptor(2), Path::new("/tmp/b")))
        );
        assert!(registry.contains(&WatchDescriptor(1).into()));
        assert!(registry.contains(&Path::new("/tmp/b").into()));
        assert!(!registry.contains(&WatchDescriptor(3).into()));
        assert_eq!(registry.len(), 2);
        consistent(&registry);
    }

    #[test]
    fn test_remove_by_either_key() {
        let mut registry = WatchRegistry::new();
        registry.insert(WatchDescriptor(1), PathBuf::from("/tmp/a"));
        registry.insert(WatchDescriptor(2), PathBuf::from("/tmp/b"));

        assert_eq!(
            registry.remove(&"/tmp/a".into()),
            Some((WatchDescriptor(1), PathBuf::from("/tmp/a")))
        );
        assert!(!registry.contains(&WatchDescriptor(1).into()));
        assert!(!registry.contains(&"/tmp/a".into()));

        assert_eq!(
            registry.remove(&WatchDescriptor(2).into()),
            Some((WatchDescriptor(2), PathBuf::from("/tmp/b")))
        );
        assert!(registry.is_empty());
        assert_eq!(registry.remove(&WatchDescriptor(2).into()), None);
        consistent(&registry);
    }

    #[test]
    fn test_reinsert_drops_stale_direction() {
        let mut registry = WatchRegistry::new();
        registry.insert(WatchDescriptor(1), PathBuf::from("/tmp/a"));
        // Same path, new descriptor.
        registry.insert(WatchDescriptor(5), PathBuf::from("/tmp/a"));
        assert_eq!(registry.path_of(WatchDescriptor(1)), None);
        assert_eq!(registry.descriptor_of(Path::new("/tmp/a")), Some(WatchDescriptor(5)));
        // Same descriptor, new path.
        registry.insert(WatchDescriptor(5), PathBuf::from("/tmp/b"));
        assert_eq!(registry.descriptor_of(Path::new("/tmp/a")), None);
        assert_eq!(registry.len(), 1);
        consistent(&registry);
    }

    #[test]
    fn test_display_target() {
        assert_eq!(WatchTarget::from(WatchDescriptor(4)).to_string(), "descriptor '4'");
        assert_eq!(WatchTarget::from("/x").to_string(), "path '/x'");
    }
}
