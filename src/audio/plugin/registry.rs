//! Plugin discovery: scan directories and the descriptor catalogue
//!
//! The registry owns an ordered, duplicate-free list of scan directories and
//! the catalogue produced by the last completed scan. Scanning walks the
//! directories without holding any lock, probes candidates through the
//! injected `Prober`, and replaces the catalogue in a single write so
//! readers never observe a half-built one. A scan superseded by a newer scan
//! or a path-set change abandons itself and leaves the catalogue alone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use walkdir::WalkDir;

use super::probe::{PluginDescriptor, Prober, WorkerProber};

/// Module file extension; CLAP uses `.clap` on every platform (a bundle
/// directory on macOS, a shared library elsewhere)
const MODULE_EXTENSION: &str = "clap";

pub struct PluginRegistry {
    paths: RwLock<Vec<PathBuf>>,
    catalogue: RwLock<Vec<PluginDescriptor>>,
    scan_epoch: AtomicU64,
    prober: Box<dyn Prober>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::with_prober(Box::new(WorkerProber))
    }

    pub fn with_prober(prober: Box<dyn Prober>) -> Self {
        Self {
            paths: RwLock::new(Vec::new()),
            catalogue: RwLock::new(Vec::new()),
            scan_epoch: AtomicU64::new(0),
            prober,
        }
    }

    /// Platform-standard CLAP directories, used when no settings exist yet
    pub fn default_directories() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        #[cfg(target_os = "macos")]
        {
            if let Some(home) = dirs::home_dir() {
                dirs.push(home.join("Library/Audio/Plug-Ins/CLAP"));
            }
            dirs.push(PathBuf::from("/Library/Audio/Plug-Ins/CLAP"));
        }
        #[cfg(target_os = "windows")]
        {
            if let Ok(common) = std::env::var("COMMONPROGRAMFILES") {
                dirs.push(PathBuf::from(common).join("CLAP"));
            }
        }
        #[cfg(target_os = "linux")]
        {
            if let Some(home) = dirs::home_dir() {
                dirs.push(home.join(".clap"));
            }
            dirs.push(PathBuf::from("/usr/lib/clap"));
        }
        dirs
    }

    pub fn add_plugin_path(&self, dir: &Path) {
        let dir = normalize_dir(dir);
        let mut paths = self.paths.write();
        if !paths.contains(&dir) {
            paths.push(dir);
            self.scan_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn remove_plugin_path(&self, dir: &Path) {
        let dir = normalize_dir(dir);
        let mut paths = self.paths.write();
        let before = paths.len();
        paths.retain(|p| p != &dir);
        if paths.len() != before {
            self.scan_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Replace the directory list, preserving order and dropping duplicates
    pub fn set_plugin_paths(&self, dirs: Vec<PathBuf>) {
        let mut seen = HashSet::new();
        let deduped: Vec<PathBuf> = dirs
            .into_iter()
            .map(|d| normalize_dir(&d))
            .filter(|d| seen.insert(d.clone()))
            .collect();
        *self.paths.write() = deduped;
        // Invalidate any scan that is still walking the old set
        self.scan_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn plugin_paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    /// Walk all configured directories, probe every candidate, and replace
    /// the catalogue. Returns the catalogue that is current afterwards —
    /// which is the previous one if this scan was superseded mid-flight.
    pub fn scan(&self) -> Vec<PluginDescriptor> {
        let epoch = self.scan_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let paths = self.paths.read().clone();

        let candidates = collect_candidates(&paths);
        log::info!(
            "Scanning {} directories, {} candidate modules",
            paths.len(),
            candidates.len()
        );

        let mut found = Vec::new();
        for candidate in candidates {
            if self.scan_epoch.load(Ordering::SeqCst) != epoch {
                log::info!("Scan superseded, abandoning");
                return self.discovered();
            }
            match self.prober.probe(&candidate) {
                Ok(descriptor) => found.push(descriptor),
                Err(e) => log::warn!("Skipping {:?}: {}", candidate, e),
            }
        }

        if !self.commit_catalogue(epoch, found) {
            log::info!("Scan superseded before commit, catalogue unchanged");
        }
        self.discovered()
    }

    /// Atomically replace the catalogue, but only if no newer scan or
    /// path-set change has started since `epoch`.
    fn commit_catalogue(&self, epoch: u64, found: Vec<PluginDescriptor>) -> bool {
        // The paths lock serializes against set_plugin_paths bumping the
        // epoch while we decide
        let _paths = self.paths.read();
        if self.scan_epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        *self.catalogue.write() = found;
        true
    }

    /// The last completed catalogue; never triggers a rescan
    pub fn discovered(&self) -> Vec<PluginDescriptor> {
        self.catalogue.read().clone()
    }

    pub fn discovered_paths(&self) -> Vec<PathBuf> {
        self.catalogue.read().iter().map(|d| d.path.clone()).collect()
    }

    pub fn descriptor_for(&self, path: &Path) -> Option<PluginDescriptor> {
        self.catalogue
            .read()
            .iter()
            .find(|d| d.path == path)
            .cloned()
    }

    /// Resolve a path to a descriptor, probing on demand when the catalogue
    /// has not seen it; the probed descriptor is cached.
    pub fn ensure_descriptor(&self, path: &Path) -> Result<PluginDescriptor, String> {
        if let Some(descriptor) = self.descriptor_for(path) {
            return Ok(descriptor);
        }
        let descriptor = self.prober.probe(path)?;
        let mut catalogue = self.catalogue.write();
        if !catalogue.iter().any(|d| d.path == descriptor.path) {
            catalogue.push(descriptor.clone());
        }
        Ok(descriptor)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonicalize where possible and strip the Windows UNC prefix that
/// `canonicalize` adds
fn normalize_dir(dir: &Path) -> PathBuf {
    let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let text = canonical.to_string_lossy();
    match text.strip_prefix(r"\\?\") {
        Some(stripped) => PathBuf::from(stripped),
        None => canonical,
    }
}

/// Recursively collect module candidates under the given directories,
/// ordered, deduplicated by path. macOS-style bundle directories are
/// candidates themselves and are not descended into.
pub fn collect_candidates(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for dir in dirs {
        if !dir.exists() {
            log::info!("Skipping non-existent scan directory {:?}", dir);
            continue;
        }

        let mut walker = WalkDir::new(dir).follow_links(false).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::info!("Error while scanning: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            let is_module = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case(MODULE_EXTENSION));
            if !is_module {
                continue;
            }
            if entry.file_type().is_dir() {
                // Bundle: one candidate, nothing inside it to scan
                walker.skip_current_dir();
            } else if !entry.file_type().is_file() {
                continue;
            }
            if seen.insert(path.to_path_buf()) {
                candidates.push(path.to_path_buf());
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Derives descriptors from file names; fails paths containing "broken"
    struct StubProber;

    impl Prober for StubProber {
        fn probe(&self, path: &Path) -> Result<PluginDescriptor, String> {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if stem.contains("broken") {
                return Err("stub probe failure".to_string());
            }
            Ok(PluginDescriptor {
                id: format!("test.{}", stem),
                name: stem,
                vendor: "stub".to_string(),
                version: "1.0.0".to_string(),
                path: path.to_path_buf(),
            })
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn candidates_are_collected_recursively_by_extension() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("vendor/deep");
        fs::create_dir_all(&nested).unwrap();
        touch(&dir.path().join("verb.clap"));
        touch(&nested.join("comp.clap"));
        touch(&dir.path().join("readme.txt"));

        let found = collect_candidates(&[dir.path().to_path_buf()]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "clap"));
    }

    #[test]
    fn bundle_directories_are_single_candidates() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("Shine.clap");
        let binary_dir = bundle.join("Contents/MacOS");
        fs::create_dir_all(&binary_dir).unwrap();
        touch(&binary_dir.join("Shine"));

        let found = collect_candidates(&[dir.path().to_path_buf()]);
        assert_eq!(found, vec![bundle]);
    }

    #[test]
    fn duplicate_directories_yield_no_duplicate_candidates() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("verb.clap"));
        let twice = vec![dir.path().to_path_buf(), dir.path().to_path_buf()];
        assert_eq!(collect_candidates(&twice).len(), 1);
    }

    #[test]
    fn path_list_stays_ordered_and_duplicate_free() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            a.path().to_path_buf(),
        ]);
        let paths = registry.plugin_paths();
        assert_eq!(paths.len(), 2);

        registry.remove_plugin_path(b.path());
        assert_eq!(registry.plugin_paths().len(), 1);
    }

    #[test]
    fn scan_over_union_equals_union_of_scans() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        touch(&a.path().join("one.clap"));
        touch(&a.path().join("two.clap"));
        touch(&b.path().join("three.clap"));

        let scan_only = |dir: &Path| {
            let registry = PluginRegistry::with_prober(Box::new(StubProber));
            registry.set_plugin_paths(vec![dir.to_path_buf()]);
            registry.scan()
        };
        let mut separate: Vec<_> = scan_only(a.path())
            .into_iter()
            .chain(scan_only(b.path()))
            .map(|d| d.path)
            .collect();
        separate.sort();

        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let mut combined: Vec<_> = registry.scan().into_iter().map(|d| d.path).collect();
        combined.sort();

        assert_eq!(combined, separate);
        let unique: HashSet<_> = combined.iter().collect();
        assert_eq!(unique.len(), combined.len());
    }

    #[test]
    fn failed_probes_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("good.clap"));
        touch(&dir.path().join("broken.clap"));

        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![dir.path().to_path_buf()]);
        let catalogue = registry.scan();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].name, "good");
    }

    #[test]
    fn rescan_replaces_the_catalogue() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("old.clap"));

        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![dir.path().to_path_buf()]);
        registry.scan();
        assert_eq!(registry.discovered().len(), 1);

        fs::remove_file(dir.path().join("old.clap")).unwrap();
        touch(&dir.path().join("new.clap"));
        let catalogue = registry.scan();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].name, "new");
    }

    #[test]
    fn superseded_scan_cannot_commit() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("kept.clap"));
        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![dir.path().to_path_buf()]);
        registry.scan();
        let before = registry.discovered();

        // A commit carrying a stale epoch must leave the catalogue alone
        let stale_epoch = registry.scan_epoch.load(Ordering::SeqCst) - 1;
        let committed = registry.commit_catalogue(stale_epoch, Vec::new());
        assert!(!committed);
        assert_eq!(registry.discovered(), before);
    }

    #[test]
    fn discovered_does_not_rescan() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("one.clap"));
        let registry = PluginRegistry::with_prober(Box::new(StubProber));
        registry.set_plugin_paths(vec![dir.path().to_path_buf()]);
        registry.scan();

        touch(&dir.path().join("two.clap"));
        // Catalogue still reflects the last completed scan
        assert_eq!(registry.discovered().len(), 1);
    }
}
