//! Project registry
//!
//! Maps project names to directories and back, persisted as one JSON
//! document (`projects.json`). Updates to the registry are not covered by
//! any project lock; concurrent writers are last-writer-wins.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock;

/// Registry record for one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub path: PathBuf,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRegistry {
    #[serde(default)]
    projects: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    path_to_project: BTreeMap<PathBuf, String>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry, creating and saving an empty one if the file is
    /// missing.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let registry = Self::new();
                registry.save(path)?;
                return Ok(registry);
            }
            Err(err) => return Err(Error::Io(err)),
        };
        serde_json::from_str(&content).map_err(Error::from_decode)
    }

    /// Save atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        lock::write_atomic(path, json.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Register `name` at `path` (normalized to an absolute path).
    /// Both the name and the path must be unused.
    pub fn register(&mut self, name: &str, path: &Path) -> Result<RegistryEntry> {
        let path = normalize_path(path)?;
        if self.projects.contains_key(name) {
            return Err(Error::Conflict(format!("project '{name}' already exists")));
        }
        if let Some(existing) = self.path_to_project.get(&path) {
            return Err(Error::Conflict(format!(
                "{} is already registered as project '{existing}'",
                path.display()
            )));
        }

        let now = Utc::now();
        let entry = RegistryEntry {
            path: path.clone(),
            name: name.to_string(),
            created_at: now,
            last_accessed: now,
        };
        self.projects.insert(name.to_string(), entry.clone());
        self.path_to_project.insert(path, name.to_string());
        Ok(entry)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.projects.get(name)
    }

    /// Exact lookup of a directory (normalized first)
    pub fn get_by_path(&self, path: &Path) -> Option<&RegistryEntry> {
        let path = normalize_path(path).ok()?;
        self.path_to_project
            .get(&path)
            .and_then(|name| self.projects.get(name))
    }

    /// The project registered at `dir` or at its nearest registered ancestor
    pub fn resolve(&self, dir: &Path) -> Option<&RegistryEntry> {
        let dir = normalize_path(dir).ok()?;
        dir.ancestors().find_map(|candidate| {
            self.path_to_project
                .get(candidate)
                .and_then(|name| self.projects.get(name))
        })
    }

    pub fn update_last_accessed(&mut self, name: &str) -> Result<()> {
        let entry = self
            .projects
            .get_mut(name)
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))?;
        entry.last_accessed = Utc::now().max(entry.created_at);
        Ok(())
    }

    /// Remove both map entries for `name`
    pub fn remove(&mut self, name: &str) -> Result<RegistryEntry> {
        let entry = self
            .projects
            .remove(name)
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))?;
        self.path_to_project.remove(&entry.path);
        Ok(entry)
    }

    /// Registered projects ordered by name
    pub fn list(&self) -> Vec<&RegistryEntry> {
        self.projects.values().collect()
    }

    /// Check that the name and path maps mirror each other
    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.projects {
            if entry.name != *name {
                return Err(Error::Validation(format!(
                    "registry entry '{name}' records name '{}'",
                    entry.name
                )));
            }
            match self.path_to_project.get(&entry.path) {
                Some(mapped) if mapped == name => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "path {} of project '{name}' is not mapped back to it",
                        entry.path.display()
                    )))
                }
            }
        }
        for (path, name) in &self.path_to_project {
            match self.projects.get(name) {
                Some(entry) if entry.path == *path => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "path {} maps to unknown project '{name}'",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Drop every project whose directory no longer exists. Returns the
    /// removed names.
    pub fn cleanup(&mut self) -> Vec<String> {
        let missing: Vec<String> = self
            .projects
            .values()
            .filter(|entry| !entry.path.exists())
            .map(|entry| entry.name.clone())
            .collect();
        for name in &missing {
            if let Some(entry) = self.projects.remove(name) {
                self.path_to_project.remove(&entry.path);
            }
        }
        missing
    }
}

/// Absolute, lexically normalized form of `path` (`.` and `..` resolved
/// without touching the filesystem)
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn register_and_lookup() {
        let mut registry = ProjectRegistry::new();
        let entry = registry.register("demo", Path::new("/work/demo")).unwrap();
        assert_eq!(entry.path, PathBuf::from("/work/demo"));

        assert_eq!(registry.get_by_name("demo"), Some(&entry));
        assert_eq!(registry.get_by_path(Path::new("/work/./demo")), Some(&entry));
        assert_eq!(registry.get_by_path(Path::new("/work/other/../demo")), Some(&entry));
        assert!(registry.get_by_name("nope").is_none());
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn duplicate_name_or_path_conflicts() {
        let mut registry = ProjectRegistry::new();
        registry.register("demo", Path::new("/work/demo")).unwrap();

        let dup_name = registry.register("demo", Path::new("/work/other"));
        assert!(matches!(dup_name, Err(Error::Conflict(_))));

        let dup_path = registry.register("other", Path::new("/work/demo/"));
        assert!(matches!(dup_path, Err(Error::Conflict(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_walks_ancestors() {
        let mut registry = ProjectRegistry::new();
        registry.register("demo", Path::new("/work/demo")).unwrap();

        let found = registry.resolve(Path::new("/work/demo/src/bin")).unwrap();
        assert_eq!(found.name, "demo");
        assert!(registry.get_by_path(Path::new("/work/demo/src")).is_none());
        assert!(registry.resolve(Path::new("/work")).is_none());
    }

    #[test]
    fn remove_and_touch_unknown_project() {
        let mut registry = ProjectRegistry::new();
        assert!(matches!(
            registry.update_last_accessed("ghost"),
            Err(Error::ProjectNotFound(_))
        ));
        assert!(registry.remove("ghost").is_err());

        registry.register("demo", Path::new("/work/demo")).unwrap();
        registry.remove("demo").unwrap();
        assert!(registry.get_by_path(Path::new("/work/demo")).is_none());
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn validate_detects_one_sided_entries() {
        let mut registry = ProjectRegistry::new();
        registry.register("demo", Path::new("/work/demo")).unwrap();
        registry
            .path_to_project
            .insert(PathBuf::from("/work/stray"), "ghost".to_string());
        assert!(matches!(registry.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn load_missing_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.json");

        let registry = ProjectRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn save_load_round_trip_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept");
        fs::create_dir_all(&kept).unwrap();
        let path = dir.path().join("projects.json");

        let mut registry = ProjectRegistry::new();
        registry.register("kept", &kept).unwrap();
        registry.register("gone", &dir.path().join("gone")).unwrap();
        registry.save(&path).unwrap();

        let mut loaded = ProjectRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["projects"]["kept"]["last_accessed"].is_string());
        assert_eq!(raw["path_to_project"][kept.to_str().unwrap()], "kept");

        assert_eq!(loaded.cleanup(), vec!["gone".to_string()]);
        assert_eq!(loaded.len(), 1);
    }
}
