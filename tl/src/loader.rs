//! Template loader
//!
//! [`TemplateLoader`] owns the file registry and the Handlebars template set
//! for one template root. `load` performs a full walk and parses everything;
//! `reload` walks again and re-parses only the files whose modification time
//! moved since they were last registered.
//!
//! ## Locking
//!
//! Registry and template set share one `RwLock`. Directory walks and file
//! reads happen without the write guard held; only the merge into the
//! registry and template set takes it. Renders take the read guard, so a
//! render never observes a template halfway through replacement.
//!
//! `walk`, `parse_files`, `load` and `reload` also hold a separate update
//! mutex from start to finish. Two updates never interleave, so a reload that
//! read an older version of a file cannot merge it over a newer one. Renders
//! never touch the update mutex.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use handlebars::{Handlebars, HelperDef, Template};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::helpers::{HelperMap, builtin_helpers};
use crate::registry::{FileRegistry, TrackedFile};
use crate::scan;
use crate::source::{FsSource, TemplateSource};

/// Names of the templates a reload re-parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Logical names, in the order they were merged
    pub updated: Vec<String>,
}

impl ReloadSummary {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updated.len()
    }
}

struct LoaderState {
    registry: FileRegistry,
    templates: Handlebars<'static>,
    /// Set by a successful full walk, cleared by a failed one
    walked: bool,
}

/// Loads a directory of templates and keeps it in sync with the filesystem
pub struct TemplateLoader {
    root: PathBuf,
    extension: RwLock<String>,
    cache_source: bool,
    verbose: bool,
    source: Box<dyn TemplateSource>,
    /// Held for the whole of every walk, parse and reload
    update: Mutex<()>,
    state: RwLock<LoaderState>,
}

impl TemplateLoader {
    /// Loader over the real filesystem rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_source(root, FsSource::new())
    }

    /// Loader rooted at `root` that walks and reads through `source`
    pub fn with_source(root: impl AsRef<Path>, source: impl TemplateSource + 'static) -> Self {
        Self::with_config(&LoaderConfig::with_root(root.as_ref()), source)
    }

    /// Loader over the real filesystem, configured from `config`
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::with_config(config, FsSource::new())
    }

    pub fn with_config(config: &LoaderConfig, source: impl TemplateSource + 'static) -> Self {
        debug!(?config, "TemplateLoader::with_config: called");
        let mut templates = Handlebars::new();
        templates.set_strict_mode(config.strict_mode);
        for (name, helper) in builtin_helpers() {
            templates.register_helper(&name, helper);
        }

        Self {
            root: config.root.clone(),
            extension: RwLock::new(config.extension.clone()),
            cache_source: config.cache_source,
            verbose: config.verbose_reload,
            source: Box::new(source),
            update: Mutex::new(()),
            state: RwLock::new(LoaderState {
                registry: FileRegistry::new(),
                templates,
                walked: false,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Change the template extension; takes effect at the next walk or reload
    pub fn set_extension(&self, extension: impl Into<String>) {
        let extension = extension.into();
        debug!(%extension, "TemplateLoader::set_extension: called");
        *self.extension.write().unwrap_or_else(PoisonError::into_inner) = extension;
    }

    pub fn extension(&self) -> String {
        self.extension.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Register helpers with the template set
    ///
    /// Call before the first parse so every template sees them.
    pub fn add_helpers(&self, helpers: HelperMap) {
        let mut state = self.write_state();
        for (name, helper) in helpers {
            debug!(%name, "TemplateLoader::add_helpers: registering");
            state.templates.register_helper(&name, helper);
        }
    }

    pub fn register_helper(&self, name: &str, helper: Box<dyn HelperDef + Send + Sync>) {
        debug!(%name, "TemplateLoader::register_helper: called");
        self.write_state().templates.register_helper(name, helper);
    }

    /// Rebuild the registry from a full walk of the root
    ///
    /// Duplicate logical names and walk errors abort the walk. On failure the
    /// registry is left empty.
    pub fn walk(&self) -> Result<()> {
        let _update = self.lock_update();
        self.walk_locked()
    }

    fn walk_locked(&self) -> Result<()> {
        let extension = self.extension();
        debug!(root = ?self.root, %extension, "TemplateLoader::walk: called");
        let result = scan::full_scan(self.source.walk(&self.root), &self.root, &extension);

        let mut state = self.write_state();
        match result {
            Ok(registry) => {
                debug!(count = registry.len(), "TemplateLoader::walk: complete");
                state.registry = registry;
                state.walked = true;
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "TemplateLoader::walk: failed, resetting registry");
                state.registry.reset();
                state.walked = false;
                Err(err)
            }
        }
    }

    /// Parse every registered file into the template set
    pub fn parse_files(&self) -> Result<()> {
        let _update = self.lock_update();
        self.parse_files_locked()
    }

    fn parse_files_locked(&self) -> Result<()> {
        debug!("TemplateLoader::parse_files: called");
        let files: Vec<(String, PathBuf)> = {
            let state = self.read_state();
            if !state.walked {
                return Err(LoaderError::Precondition(
                    "no templates walked, call walk() before parse_files()".to_string(),
                ));
            }
            let mut files: Vec<_> = state
                .registry
                .iter()
                .map(|(name, file)| (name.to_string(), file.path.clone()))
                .collect();
            files.sort_by(|a, b| a.0.cmp(&b.0));
            files
        };

        let mut contents = Vec::with_capacity(files.len());
        for (name, path) in files {
            let content = self.read_file(&path)?;
            contents.push((name, content));
        }

        let mut state = self.write_state();
        for (name, content) in contents {
            Self::parse_into(&mut state.templates, &name, &content)?;
            if self.cache_source
                && let Some(file) = state.registry.lookup_mut(&name)
            {
                file.content = Some(content);
            }
        }
        Ok(())
    }

    /// Walk the root and parse every template found
    pub fn load(&self) -> Result<()> {
        debug!(root = ?self.root, "TemplateLoader::load: called");
        let _update = self.lock_update();
        self.walk_locked()?;
        if self.verbose {
            for name in self.read_state().registry.names() {
                info!(%name, "Loading template");
            }
        }
        self.parse_files_locked()?;
        info!(root = %self.root.display(), count = self.tracked_count(), "Loaded templates");
        Ok(())
    }

    /// Re-parse templates that are new or modified since they were registered
    ///
    /// Unreadable entries are skipped. The first template that fails to parse
    /// aborts the reload; templates merged before it stay in place. Files
    /// deleted from disk stay registered and renderable.
    pub fn reload(&self) -> Result<ReloadSummary> {
        let extension = self.extension();
        debug!(root = ?self.root, %extension, "TemplateLoader::reload: called");
        let _update = self.lock_update();
        let entries: Vec<_> = self.source.walk(&self.root).collect();

        let changed = {
            let state = self.read_state();
            scan::incremental_scan(entries, &self.root, &extension, &state.registry)?
        };
        if changed.is_empty() {
            debug!("TemplateLoader::reload: no changes");
            return Ok(ReloadSummary::default());
        }

        let mut batch = Vec::with_capacity(changed.len());
        for file in changed {
            let content = self.read_file(&file.path)?;
            batch.push((file, content));
        }

        let mut summary = ReloadSummary::default();
        let mut state = self.write_state();
        for (mut file, content) in batch {
            Self::parse_into(&mut state.templates, &file.name, &content)?;
            if self.verbose {
                info!(name = %file.name, "Updating template");
            }
            if self.cache_source {
                file.content = Some(content);
            }
            summary.updated.push(file.name.clone());
            state.registry.upsert(file);
        }

        info!(count = summary.len(), "Reloaded templates");
        Ok(summary)
    }

    /// A copy of the parsed template registered under `name`
    pub fn lookup_template(&self, name: &str) -> Option<Template> {
        self.read_state().templates.get_template(name).cloned()
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.read_state().templates.has_template(name)
    }

    /// Names of all parsed templates, sorted
    pub fn template_names(&self) -> Vec<String> {
        let state = self.read_state();
        let mut names: Vec<String> = state.templates.get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    /// The registry record for `name`
    pub fn tracked_file(&self, name: &str) -> Option<TrackedFile> {
        self.read_state().registry.lookup(name).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.read_state().registry.len()
    }

    /// Render the template `name` with `data`
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        debug!(%name, "TemplateLoader::render: called");
        self.read_state()
            .templates
            .render(name, data)
            .map_err(|e| LoaderError::Render {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        self.source.read(path).map_err(|source| LoaderError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse_into(templates: &mut Handlebars<'static>, name: &str, content: &str) -> Result<()> {
        debug!(%name, "TemplateLoader::parse_into: called");
        templates
            .register_template_string(name, content)
            .map_err(|e| LoaderError::Parse {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    fn lock_update(&self) -> MutexGuard<'_, ()> {
        self.update.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LoaderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LoaderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceEntry, WalkError, WalkIter};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, SystemTime};

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// In-memory tree that counts reads
    #[derive(Default)]
    struct MemorySource {
        files: Mutex<BTreeMap<PathBuf, (String, SystemTime)>>,
        broken: Mutex<Vec<PathBuf>>,
        reads: AtomicUsize,
    }

    impl MemorySource {
        fn put(&self, path: &str, content: &str, secs: u64) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), (content.to_string(), at(secs)));
        }

        fn remove(&self, path: &str) {
            self.files.lock().unwrap().remove(Path::new(path));
        }

        fn break_entry(&self, path: &str) {
            self.broken.lock().unwrap().push(PathBuf::from(path));
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl TemplateSource for MemorySource {
        fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
            let mut entries = vec![Ok(SourceEntry::dir(root, at(0)))];
            for (path, (_, modified)) in self.files.lock().unwrap().iter() {
                entries.push(Ok(SourceEntry::file(path.clone(), *modified)));
            }
            for path in self.broken.lock().unwrap().iter() {
                entries.push(Err(WalkError {
                    path: Some(path.clone()),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                }));
            }
            Box::new(entries.into_iter())
        }

        fn read(&self, path: &Path) -> io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(content, _)| content.clone())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    /// Memory source whose next read, once armed, reports in and then blocks
    /// until released
    #[derive(Default)]
    struct GatedSource {
        inner: MemorySource,
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Option<Receiver<()>>>,
    }

    impl GatedSource {
        /// Returns (entered, release) channel ends for the test to drive
        fn arm(&self) -> (Receiver<()>, Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            *self.entered.lock().unwrap() = Some(entered_tx);
            *self.release.lock().unwrap() = Some(release_rx);
            (entered_rx, release_tx)
        }
    }

    impl TemplateSource for GatedSource {
        fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
            self.inner.walk(root)
        }

        fn read(&self, path: &Path) -> io::Result<String> {
            let content = self.inner.read(path);
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                let release = self.release.lock().unwrap().take().unwrap();
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            content
        }
    }

    fn sample() -> (Arc<MemorySource>, TemplateLoader) {
        let source = Arc::new(MemorySource::default());
        source.put("/tpl/a.html", "A", 1);
        source.put("/tpl/b.html", "B", 1);
        source.put("/tpl/c/d.html", "D", 1);
        let loader = TemplateLoader::with_source("/tpl", source.clone());
        (source, loader)
    }

    #[test]
    fn test_default_extension() {
        let loader = TemplateLoader::new("/tpl");
        assert_eq!(loader.extension(), ".html");
        loader.set_extension(".tpl");
        assert_eq!(loader.extension(), ".tpl");
    }

    #[test]
    fn test_load_parses_all() {
        let (source, loader) = sample();
        loader.load().unwrap();

        assert_eq!(loader.template_names(), vec!["a.html", "b.html", "c/d.html"]);
        assert_eq!(loader.render("a.html", &json!({})).unwrap(), "A");
        assert_eq!(loader.render("c/d.html", &json!({})).unwrap(), "D");
        assert_eq!(source.reads(), 3);
        assert_eq!(loader.tracked_count(), 3);
    }

    #[test]
    fn test_parse_files_before_walk_is_precondition_error() {
        let (_source, loader) = sample();
        let err = loader.parse_files().unwrap_err();
        assert!(matches!(err, LoaderError::Precondition(_)));
    }

    #[test]
    fn test_walk_error_aborts_load() {
        let (source, loader) = sample();
        source.break_entry("/tpl/locked");

        let err = loader.load().unwrap_err();
        assert!(matches!(err, LoaderError::Traversal { .. }));
        assert_eq!(loader.tracked_count(), 0);
        assert!(matches!(loader.parse_files(), Err(LoaderError::Precondition(_))));
    }

    #[test]
    fn test_parse_error_aborts_load() {
        let (source, loader) = sample();
        source.put("/tpl/bad.html", "{{#if}}", 1);

        let err = loader.load().unwrap_err();
        assert!(err.is_parse());
        assert_eq!(err.template_name(), Some("bad.html"));
        // Templates sorted before the broken one are already parsed
        assert!(loader.has_template("a.html"));
    }

    #[test]
    fn test_reload_only_touches_changed() {
        let (source, loader) = sample();
        loader.load().unwrap();

        source.put("/tpl/b.html", "B2", 2);
        let summary = loader.reload().unwrap();

        assert_eq!(summary.updated, vec!["b.html"]);
        assert_eq!(source.reads(), 4);
        assert_eq!(loader.render("a.html", &json!({})).unwrap(), "A");
        assert_eq!(loader.render("b.html", &json!({})).unwrap(), "B2");
        assert_eq!(loader.render("c/d.html", &json!({})).unwrap(), "D");
        assert_eq!(loader.tracked_file("b.html").unwrap().modified, at(2));
    }

    #[test]
    fn test_reload_without_changes_reads_nothing() {
        let (source, loader) = sample();
        loader.load().unwrap();
        let reads = source.reads();

        assert!(loader.reload().unwrap().is_empty());
        assert!(loader.reload().unwrap().is_empty());
        assert_eq!(source.reads(), reads);
    }

    #[test]
    fn test_reload_picks_up_new_file() {
        let (source, loader) = sample();
        loader.load().unwrap();

        source.put("/tpl/e/f.html", "F {{name}}", 5);
        let summary = loader.reload().unwrap();
        assert_eq!(summary.updated, vec!["e/f.html"]);
        assert_eq!(loader.render("e/f.html", &json!({"name": "x"})).unwrap(), "F x");
    }

    #[test]
    fn test_reload_skips_walk_errors() {
        let (source, loader) = sample();
        loader.load().unwrap();

        source.break_entry("/tpl/locked");
        source.put("/tpl/a.html", "A2", 3);
        let summary = loader.reload().unwrap();
        assert_eq!(summary.updated, vec!["a.html"]);
    }

    #[test]
    fn test_reload_keeps_deleted_templates() {
        let (source, loader) = sample();
        loader.load().unwrap();

        source.remove("/tpl/b.html");
        assert!(loader.reload().unwrap().is_empty());
        assert!(loader.has_template("b.html"));
        assert!(loader.tracked_file("b.html").is_some());

        // A fresh load forgets it from the registry
        loader.load().unwrap();
        assert!(loader.tracked_file("b.html").is_none());
    }

    #[test]
    fn test_reload_parse_error_keeps_earlier_merges() {
        let (source, loader) = sample();
        loader.load().unwrap();

        source.put("/tpl/a.html", "A2", 2);
        source.put("/tpl/b.html", "{{#each}}", 2);
        source.put("/tpl/c/d.html", "D2", 2);

        let err = loader.reload().unwrap_err();
        assert!(err.is_parse());
        assert_eq!(err.template_name(), Some("b.html"));

        assert_eq!(loader.render("a.html", &json!({})).unwrap(), "A2");
        assert_eq!(loader.render("b.html", &json!({})).unwrap(), "B");
        assert_eq!(loader.render("c/d.html", &json!({})).unwrap(), "D");

        // The broken file is retried on the next reload
        source.put("/tpl/b.html", "B3", 3);
        let summary = loader.reload().unwrap();
        assert_eq!(summary.updated, vec!["b.html", "c/d.html"]);
        assert_eq!(loader.render("c/d.html", &json!({})).unwrap(), "D2");
    }

    #[test]
    fn test_reload_before_load_parses_everything() {
        let (_source, loader) = sample();
        let summary = loader.reload().unwrap();
        assert_eq!(summary.updated, vec!["a.html", "b.html", "c/d.html"]);
    }

    #[test]
    fn test_extension_switch() {
        let (source, loader) = sample();
        source.put("/tpl/body.tpl", "T", 1);

        loader.load().unwrap();
        assert!(loader.tracked_file("body.tpl").is_none());

        loader.set_extension(".tpl");
        loader.load().unwrap();
        assert!(loader.tracked_file("body.tpl").is_some());
        assert!(loader.tracked_file("a.html").is_none());
        assert_eq!(loader.tracked_count(), 1);

        // The template set is never pruned: templates parsed under the old
        // extension stay renderable after the registry forgot them
        assert_eq!(loader.template_names(), vec!["a.html", "b.html", "body.tpl", "c/d.html"]);
        assert_eq!(loader.render("a.html", &json!({})).unwrap(), "A");
    }

    #[test]
    fn test_overlapping_reloads_keep_newest_version() {
        let source = Arc::new(GatedSource::default());
        source.inner.put("/tpl/a.html", "v0", 0);
        let loader = Arc::new(TemplateLoader::with_source("/tpl", source.clone()));
        loader.load().unwrap();

        // First reload reads v1, then stalls before merging
        source.inner.put("/tpl/a.html", "v1", 1);
        let (entered, release) = source.arm();
        let first = {
            let loader = loader.clone();
            thread::spawn(move || loader.reload().unwrap().updated)
        };
        entered.recv().unwrap();

        // The file moves on to v2 and a second reload starts meanwhile
        source.inner.put("/tpl/a.html", "v2", 2);
        let second = {
            let loader = loader.clone();
            thread::spawn(move || loader.reload().unwrap().updated)
        };
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        assert_eq!(first.join().unwrap(), vec!["a.html"]);
        assert_eq!(second.join().unwrap(), vec!["a.html"]);
        assert_eq!(loader.render("a.html", &json!({})).unwrap(), "v2");
        assert_eq!(loader.tracked_file("a.html").unwrap().modified, at(2));
    }

    #[test]
    fn test_cache_source() {
        let source = Arc::new(MemorySource::default());
        source.put("/tpl/a.html", "A", 1);
        let config = LoaderConfig {
            cache_source: true,
            ..LoaderConfig::with_root("/tpl")
        };
        let loader = TemplateLoader::with_config(&config, source.clone());
        loader.load().unwrap();
        assert_eq!(loader.tracked_file("a.html").unwrap().content.as_deref(), Some("A"));

        source.put("/tpl/a.html", "A2", 2);
        loader.reload().unwrap();
        assert_eq!(loader.tracked_file("a.html").unwrap().content.as_deref(), Some("A2"));
    }

    #[test]
    fn test_source_not_cached_by_default() {
        let (_source, loader) = sample();
        loader.load().unwrap();
        assert!(loader.tracked_file("a.html").unwrap().content.is_none());
    }

    fn shout_helper(
        h: &handlebars::Helper,
        _: &Handlebars,
        _: &handlebars::Context,
        _: &mut handlebars::RenderContext,
        out: &mut dyn handlebars::Output,
    ) -> handlebars::HelperResult {
        let text = h.param(0).and_then(|p| p.value().as_str()).unwrap_or_default();
        out.write(&text.to_uppercase())?;
        Ok(())
    }

    #[test]
    fn test_helpers_survive_reload() {
        let (source, loader) = sample();
        let mut helpers: HelperMap = HelperMap::new();
        helpers.insert("shout".to_string(), Box::new(shout_helper));
        loader.add_helpers(helpers);
        source.put("/tpl/a.html", "{{shout name}}", 1);
        loader.load().unwrap();
        assert_eq!(loader.render("a.html", &json!({"name": "hi"})).unwrap(), "HI");

        source.put("/tpl/b.html", "{{shout name}}!", 2);
        loader.reload().unwrap();
        assert_eq!(loader.render("b.html", &json!({"name": "yo"})).unwrap(), "YO!");
        assert_eq!(loader.render("a.html", &json!({"name": "hi"})).unwrap(), "HI");
    }

    #[test]
    fn test_lookup_template() {
        let (_source, loader) = sample();
        assert!(loader.lookup_template("a.html").is_none());
        loader.load().unwrap();
        let template = loader.lookup_template("a.html").unwrap();
        assert_eq!(template.name.as_deref(), Some("a.html"));
    }

    #[test]
    fn test_render_missing_template() {
        let (_source, loader) = sample();
        loader.load().unwrap();
        let err = loader.render("nope.html", &json!({})).unwrap_err();
        assert!(matches!(err, LoaderError::Render { .. }));
    }

    #[test]
    fn test_strict_mode() {
        let source = Arc::new(MemorySource::default());
        source.put("/tpl/a.html", "{{missing}}", 1);
        let config = LoaderConfig {
            strict_mode: true,
            ..LoaderConfig::with_root("/tpl")
        };
        let loader = TemplateLoader::with_config(&config, source);
        loader.load().unwrap();
        assert!(loader.render("a.html", &json!({})).is_err());
    }
}
