//! Module resolution across ordered search paths.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;
use crate::io::manifest::{detect_format, load_descriptor};
use crate::module::ModuleDescriptor;

/// Environment variable holding extra colon-separated search paths, tried
/// before the standard locations.
pub const SEARCH_PATH_ENV: &str = "COGNITIVE_MODULES_PATH";

/// Standard search order: project-local, user-global, system-wide, with any
/// env-configured paths prepended.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(custom) = env::var_os(SEARCH_PATH_ENV) {
        for part in custom.to_string_lossy().split(':') {
            if !part.is_empty() {
                paths.push(PathBuf::from(part));
            }
        }
    }
    paths.push(PathBuf::from("cognitive/modules"));
    if let Some(home) = env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".cognitive/modules"));
    }
    paths.push(PathBuf::from("/usr/local/share/cognitive/modules"));
    paths
}

/// Where a listed module was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// First (project-local) search path.
    Local,
    /// Any later search path.
    Global,
}

/// One entry from [`Resolver::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleListing {
    pub name: String,
    pub path: PathBuf,
    pub location: Location,
}

/// Read-only module lookup over ordered search paths.
///
/// Repeat resolutions of the same name within one invocation are memoized;
/// the cache lives only as long as the resolver, so separate invocations see
/// the filesystem fresh.
pub struct Resolver {
    search_paths: Vec<PathBuf>,
    cache: RefCell<HashMap<String, ModuleDescriptor>>,
}

impl Resolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_default_paths() -> Self {
        Self::new(default_search_paths())
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Locate and parse a module definition; first search path wins.
    pub fn resolve(&self, name: &str) -> Result<ModuleDescriptor, EngineError> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return Ok(cached.clone());
        }
        for base in &self.search_paths {
            let dir = base.join(name);
            if detect_format(&dir).is_none() {
                continue;
            }
            debug!(name, dir = %dir.display(), "resolved module");
            let descriptor = load_descriptor(&dir)?;
            self.cache
                .borrow_mut()
                .insert(name.to_string(), descriptor.clone());
            return Ok(descriptor);
        }
        Err(EngineError::NotFound {
            name: name.to_string(),
        })
    }

    /// Enumerate every module visible across the search paths, deduplicated
    /// by name in path order.
    pub fn list(&self) -> Vec<ModuleListing> {
        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        for (index, base) in self.search_paths.iter().enumerate() {
            let Ok(entries) = std::fs::read_dir(base) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_dir() && detect_format(path).is_some())
                .collect();
            found.sort();
            for path in found {
                let name = module_name(&path);
                if !seen.insert(name.clone()) {
                    continue;
                }
                listings.push(ModuleListing {
                    name,
                    path,
                    location: if index == 0 {
                        Location::Local
                    } else {
                        Location::Global
                    },
                });
            }
        }
        listings
    }
}

fn module_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_module_v1;

    #[test]
    fn resolve_prefers_earlier_search_paths() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        write_module_v1(first.path(), "review", "From first: $ARGUMENTS");
        write_module_v1(second.path(), "review", "From second: $ARGUMENTS");

        let resolver = Resolver::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let descriptor = resolver.resolve("review").expect("resolve");
        assert_eq!(descriptor.prompt_template.trim(), "From first: $ARGUMENTS");
    }

    #[test]
    fn resolve_falls_through_missing_paths() {
        let present = tempfile::tempdir().expect("tempdir");
        write_module_v1(present.path(), "summarize", "S: $ARGUMENTS");

        let resolver = Resolver::new(vec![
            PathBuf::from("/definitely/not/here"),
            present.path().to_path_buf(),
        ]);
        assert!(resolver.resolve("summarize").is_ok());
    }

    #[test]
    fn unknown_module_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = Resolver::new(vec![temp.path().to_path_buf()]);
        let err = resolver.resolve("ghost").expect_err("should fail");
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn repeat_resolution_is_memoized() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_module_v1(temp.path(), "cached", "C: $ARGUMENTS");
        let resolver = Resolver::new(vec![temp.path().to_path_buf()]);

        let first = resolver.resolve("cached").expect("first");
        // Remove the module from disk; the memoized descriptor still serves.
        std::fs::remove_dir_all(temp.path().join("cached")).expect("remove");
        let second = resolver.resolve("cached").expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn list_deduplicates_by_name_in_path_order() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        write_module_v1(first.path(), "shared", "A");
        write_module_v1(second.path(), "shared", "B");
        write_module_v1(second.path(), "only-global", "C");

        let resolver = Resolver::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let listings = resolver.list();
        assert_eq!(listings.len(), 2);
        let shared = listings.iter().find(|l| l.name == "shared").expect("shared");
        assert_eq!(shared.location, Location::Local);
        assert!(shared.path.starts_with(first.path()));
        let global = listings
            .iter()
            .find(|l| l.name == "only-global")
            .expect("global");
        assert_eq!(global.location, Location::Global);
    }
}
