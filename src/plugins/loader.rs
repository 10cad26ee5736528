//! Plugin resolution and lifecycle
//!
//! Architecture: Registry - `PluginLoader` resolves configured entries, validates them and
//! owns every loaded instance until `unload_all`
//! - Linked in-process plugins take precedence over bundle files
//! - Local names try the exact path, then known extensions, then a `plugin.*` index file
//! - Package names resolve through `<plugin_dir>/<name>/manifest.yaml`

use super::{DeclarativePlugin, LoadContext, LoadedPlugin, Plugin, PluginKind, PluginLog};
use crate::config::{GuardianConfig, PluginEntry};
use crate::domain::{GuardianError, GuardianResult};
use crate::rules::engine::panic_message;
use crate::rules::Rule;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};

const BUNDLE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];
const INDEX_FILES: &[&str] = &["plugin.yaml", "plugin.yml", "plugin.json"];
const MANIFEST_FILE: &str = "manifest.yaml";

type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Dependency manifest of a packaged plugin
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default = "default_entry")]
    entry: String,
}

fn default_entry() -> String {
    INDEX_FILES[0].to_string()
}

pub struct PluginLoader {
    root_dir: PathBuf,
    plugin_dir: PathBuf,
    linked: BTreeMap<String, PluginFactory>,
    plugins: Vec<LoadedPlugin>,
}

impl PluginLoader {
    pub fn new(root_dir: impl Into<PathBuf>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            plugin_dir: plugin_dir.into(),
            linked: BTreeMap::new(),
            plugins: Vec::new(),
        }
    }

    pub fn from_config(config: &GuardianConfig) -> Self {
        let plugin_dir = if config.plugin_dir.is_relative() {
            config.root.join(&config.plugin_dir)
        } else {
            config.plugin_dir.clone()
        };
        Self::new(config.root.clone(), plugin_dir)
    }

    /// Make an in-process plugin available under `name`
    pub fn link<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.linked.insert(name.into(), Box::new(factory));
    }

    /// Load every enabled entry; failures are recorded per plugin and never abort the batch
    pub fn load_plugins(&mut self, entries: &[PluginEntry]) -> &[LoadedPlugin] {
        for entry in entries {
            let name = entry.name();
            if !entry.enabled() {
                tracing::debug!("Plugin '{}' is disabled", name);
                continue;
            }
            if self.plugins.iter().any(|loaded| loaded.name == name) {
                tracing::warn!("Plugin '{}' is configured more than once; keeping the first", name);
                continue;
            }

            let outcome = self.load_one(name, &entry.options());
            match &outcome.error {
                None => tracing::info!("Loaded plugin '{}'", name),
                Some(error) => tracing::warn!("Plugin '{}' failed to load: {}", name, error),
            }
            self.plugins.push(outcome);
        }
        &self.plugins
    }

    /// A panic anywhere in construction, validation or `on_load` fails only this plugin
    fn load_one(&self, name: &str, options: &serde_json::Value) -> LoadedPlugin {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_load(name, options))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                LoadedPlugin::failed(name, None, GuardianError::plugin(name, format!("panicked while loading: {message}")))
            }
        }
    }

    fn try_load(&self, name: &str, options: &serde_json::Value) -> LoadedPlugin {
        let (mut plugin, path) = match self.linked.get(name) {
            Some(factory) => (factory(), None),
            None => {
                let path = match self.resolve(name) {
                    Ok(path) => path,
                    Err(e) => return LoadedPlugin::failed(name, None, e),
                };
                match DeclarativePlugin::from_file(&path, options) {
                    Ok(plugin) => (Box::new(plugin) as Box<dyn Plugin>, Some(path)),
                    Err(e) => return LoadedPlugin::failed(name, Some(path), e),
                }
            }
        };

        let result = validate_plugin(plugin.as_ref()).and_then(|()| {
            let ctx = LoadContext {
                version: env!("CARGO_PKG_VERSION"),
                root_dir: self.root_dir.clone(),
                config: options.clone(),
                log: PluginLog::new(&plugin.metadata().name),
            };
            plugin.on_load(&ctx)
        });

        LoadedPlugin {
            name: name.to_string(),
            loaded: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            plugin: Some(plugin),
            path,
        }
    }

    /// Locate the bundle file for a configured name
    pub fn resolve(&self, name: &str) -> GuardianResult<PathBuf> {
        if is_local(name) {
            let base = self.root_dir.join(name);
            return local_candidates(&base)
                .into_iter()
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| GuardianError::plugin(name, format!("No bundle found at '{}'", base.display())));
        }

        let escapes = Path::new(name)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if name.trim().is_empty() || escapes {
            return Err(GuardianError::plugin(name, "Invalid package name"));
        }

        let package = self.plugin_dir.join(name);
        let manifest_path = package.join(MANIFEST_FILE);
        let manifest = std::fs::read_to_string(&manifest_path).map_err(|e| {
            GuardianError::plugin(name, format!("Cannot read '{}': {e}", manifest_path.display()))
        })?;
        let manifest: Manifest = serde_yaml::from_str(&manifest)
            .map_err(|e| GuardianError::plugin(name, format!("Invalid manifest: {e}")))?;

        let entry = package.join(&manifest.entry);
        if entry.is_file() {
            Ok(entry)
        } else {
            Err(GuardianError::plugin(name, format!("Manifest entry '{}' does not exist", manifest.entry)))
        }
    }

    /// Every plugin the loader attempted, in configuration order
    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn loaded(&self) -> impl Iterator<Item = &LoadedPlugin> {
        self.plugins.iter().filter(|plugin| plugin.loaded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &LoadedPlugin> {
        self.plugins.iter().filter(|plugin| !plugin.loaded)
    }

    /// Fresh rules from loaded plugins, paired with the contributing plugin's name.
    /// A plugin that panics while producing its rules contributes none.
    pub fn all_rules(&self) -> Vec<(String, Box<dyn Rule>)> {
        let mut rules = Vec::new();
        for loaded in self.loaded() {
            let Some(plugin) = loaded.plugin.as_ref() else {
                continue;
            };
            let produced = panic::catch_unwind(AssertUnwindSafe(|| (plugin.metadata().name.clone(), plugin.rules())));
            match produced {
                Ok((name, produced)) => rules.extend(produced.into_iter().map(|rule| (name.clone(), rule))),
                Err(payload) => tracing::warn!(
                    "Plugin '{}' panicked while producing rules: {}",
                    loaded.name,
                    panic_message(payload.as_ref())
                ),
            }
        }
        rules
    }

    /// Run `on_unload` for every loaded plugin and clear the registry
    pub fn unload_all(&mut self) {
        for loaded in self.plugins.iter_mut().filter(|plugin| plugin.loaded) {
            let Some(plugin) = loaded.plugin.as_mut() else {
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| plugin.on_unload())) {
                Ok(Ok(())) => tracing::info!("Unloaded plugin '{}'", loaded.name),
                Ok(Err(e)) => tracing::warn!("Plugin '{}' failed to unload: {}", loaded.name, e),
                Err(payload) => tracing::warn!(
                    "Plugin '{}' panicked while unloading: {}",
                    loaded.name,
                    panic_message(payload.as_ref())
                ),
            }
        }
        self.plugins.clear();
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        if self.plugins.iter().any(|plugin| plugin.loaded) {
            self.unload_all();
        }
    }
}

fn is_local(name: &str) -> bool {
    name.starts_with("./") || name.starts_with("../") || Path::new(name).is_absolute()
}

fn local_candidates(base: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![base.to_path_buf()];
    let file_name = base.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    candidates.extend(BUNDLE_EXTENSIONS.iter().map(|ext| base.with_file_name(format!("{file_name}.{ext}"))));
    candidates.extend(INDEX_FILES.iter().map(|index| base.join(index)));
    candidates
}

/// Structural checks every plugin must pass before `on_load`
pub fn validate_plugin(plugin: &dyn Plugin) -> GuardianResult<()> {
    let metadata = plugin.metadata();
    if metadata.name.trim().is_empty() {
        return Err(GuardianError::plugin("<unnamed>", "metadata.name is required"));
    }
    let name = metadata.name.as_str();
    if metadata.version.trim().is_empty() {
        return Err(GuardianError::plugin(name, "metadata.version is required"));
    }
    if metadata.types.is_empty() {
        return Err(GuardianError::plugin(name, "metadata.types must list at least one capability"));
    }
    for unknown in metadata.types.iter().filter(|t| PluginKind::from_name(t).is_none()) {
        tracing::warn!("Plugin '{}' declares unknown type '{}'", name, unknown);
    }

    for (index, rule) in plugin.rules().iter().enumerate() {
        if rule.id().trim().is_empty() {
            return Err(GuardianError::plugin(name, format!("rule #{} has no id", index + 1)));
        }
        if rule.name().trim().is_empty() {
            return Err(GuardianError::plugin(name, format!("rule '{}' has no name", rule.id())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginMetadata;
    use crate::rules::UnresolvedImportRule;
    use rstest::rstest;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn bundle(name: &str, version: Option<&str>, rule_id: &str) -> String {
        let version = version.map(|v| format!("  version: \"{v}\"\n")).unwrap_or_default();
        format!(
            "metadata:\n  name: {name}\n{version}  types: [rules]\nrules:\n  - id: {rule_id}\n    name: {rule_id}\n    kind: content-pattern\n    pattern: TODO\n"
        )
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn loader(dir: &TempDir) -> PluginLoader {
        PluginLoader::new(dir.path(), dir.path().join("vendor"))
    }

    #[test]
    fn test_invalid_plugin_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "plugins/broken.yaml", &bundle("broken", None, "broken-rule"));
        write(dir.path(), "plugins/good.yaml", &bundle("good", Some("1.0.0"), "good-rule"));

        let mut loader = loader(&dir);
        let outcomes = loader.load_plugins(&["./plugins/broken".into(), "./plugins/good.yaml".into()]);

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].loaded);
        assert!(outcomes[0].error.as_deref().unwrap().contains("metadata.version"));
        assert!(outcomes[1].loaded, "{:?}", outcomes[1].error);

        let rules = loader.all_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].0, "good");
        assert_eq!(rules[0].1.id(), "good-rule");
        assert_eq!(loader.failed().count(), 1);
    }

    #[rstest]
    #[case("rules/exact.bundle", "./rules/exact.bundle")]
    #[case("rules/by-ext.yml", "./rules/by-ext")]
    #[case("rules/by-json.json", "./rules/by-json")]
    #[case("rules/dir/plugin.yaml", "./rules/dir")]
    #[case("rules/dir-json/plugin.json", "./rules/dir-json/")]
    fn test_local_resolution_order(#[case] file: &str, #[case] name: &str) {
        let dir = TempDir::new().unwrap();
        write(dir.path(), file, "");
        let resolved = loader(&dir).resolve(name).unwrap();
        assert_eq!(resolved, dir.path().join(file));
    }

    #[test]
    fn test_exact_path_wins_over_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "p/rules", "exact");
        write(dir.path(), "p/rules.yaml", "ext");
        let resolved = loader(&dir).resolve("./p/rules").unwrap();
        assert_eq!(fs::read_to_string(resolved).unwrap(), "exact");
    }

    #[test]
    fn test_package_resolution_through_manifest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "vendor/@acme/style/manifest.yaml", "entry: dist/bundle.json\n");
        write(
            dir.path(),
            "vendor/@acme/style/dist/bundle.json",
            r#"{"metadata": {"name": "acme-style", "version": "2.0.0", "types": ["rules"]}, "rules": []}"#,
        );
        write(dir.path(), "vendor/plain/manifest.yaml", "{}\n");
        write(dir.path(), "vendor/plain/plugin.yaml", &bundle("plain", Some("0.1.0"), "plain-rule"));

        let mut loader = loader(&dir);
        assert_eq!(
            loader.resolve("@acme/style").unwrap(),
            dir.path().join("vendor/@acme/style/dist/bundle.json")
        );
        assert!(loader.resolve("missing").is_err());
        assert!(loader.resolve("../escape").is_err());

        loader.load_plugins(&["@acme/style".into(), "plain".into(), "missing".into()]);
        assert_eq!(loader.loaded().count(), 2);
        assert_eq!(loader.all_rules().len(), 1);
    }

    struct Linked {
        metadata: PluginMetadata,
        fail_on_load: bool,
        seen_options: Arc<Mutex<Option<serde_json::Value>>>,
        unloads: Arc<AtomicUsize>,
    }

    impl Plugin for Linked {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn rules(&self) -> Vec<Box<dyn Rule>> {
            vec![Box::new(UnresolvedImportRule::new())]
        }

        fn on_load(&mut self, ctx: &LoadContext) -> GuardianResult<()> {
            ctx.log.info("loading");
            *self.seen_options.lock().unwrap() = Some(ctx.config.clone());
            if self.fail_on_load {
                return Err(GuardianError::plugin(&self.metadata.name, "refusing to start"));
            }
            Ok(())
        }

        fn on_unload(&mut self) -> GuardianResult<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_linked_plugin_lifecycle() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let unloads = Arc::new(AtomicUsize::new(0));

        let mut loader = loader(&dir);
        for (name, fail_on_load) in [("linked", false), ("sulky", true)] {
            let seen = Arc::clone(&seen);
            let unloads = Arc::clone(&unloads);
            loader.link(name, move || {
                Box::new(Linked {
                    metadata: PluginMetadata::new(name, "0.3.0", &[PluginKind::Rules]),
                    fail_on_load,
                    seen_options: Arc::clone(&seen),
                    unloads: Arc::clone(&unloads),
                }) as Box<dyn Plugin>
            });
        }

        let entries = vec![
            PluginEntry::Detailed {
                name: "linked".into(),
                enabled: true,
                options: serde_json::json!({ "strict": true }),
            },
            PluginEntry::from("sulky"),
            PluginEntry::Detailed { name: "skipped".into(), enabled: false, options: serde_json::Value::Null },
        ];
        let outcomes = loader.load_plugins(&entries);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].loaded);
        assert!(outcomes[0].path.is_none());
        assert!(!outcomes[1].loaded);
        assert!(outcomes[1].error.as_deref().unwrap().contains("refusing to start"));
        assert_eq!(loader.all_rules().len(), 1);

        loader.unload_all();
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
        assert!(loader.plugins().is_empty());
        assert!(loader.all_rules().is_empty());
    }

    /// Panics in `rules()` once `calm_calls` calls have been served
    struct Volatile {
        metadata: PluginMetadata,
        calm_calls: usize,
        calls: AtomicUsize,
    }

    impl Plugin for Volatile {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        fn rules(&self) -> Vec<Box<dyn Rule>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.calm_calls {
                panic!("rule table corrupted");
            }
            vec![Box::new(UnresolvedImportRule::new())]
        }
    }

    fn link_volatile(loader: &mut PluginLoader, name: &'static str, calm_calls: usize) {
        loader.link(name, move || {
            Box::new(Volatile {
                metadata: PluginMetadata::new(name, "1.0.0", &[PluginKind::Rules]),
                calm_calls,
                calls: AtomicUsize::new(0),
            }) as Box<dyn Plugin>
        });
    }

    #[test]
    fn test_panicking_plugin_is_isolated_from_others() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "plugins/good.yaml", &bundle("good", Some("1.0.0"), "good-rule"));

        let mut loader = loader(&dir);
        link_volatile(&mut loader, "volatile", 0);
        link_volatile(&mut loader, "flaky", 1);
        loader.link("exploding", || panic!("factory failed"));

        let outcomes = loader.load_plugins(&[
            "volatile".into(),
            "exploding".into(),
            "./plugins/good.yaml".into(),
            "flaky".into(),
        ]);
        assert_eq!(outcomes.len(), 4);
        assert!(!outcomes[0].loaded);
        assert!(outcomes[0].error.as_deref().unwrap().contains("rule table corrupted"));
        assert!(!outcomes[1].loaded);
        assert!(outcomes[1].error.as_deref().unwrap().contains("panicked while loading"));
        assert!(outcomes[2].loaded, "{:?}", outcomes[2].error);
        assert!(outcomes[3].loaded, "{:?}", outcomes[3].error);

        let rules = loader.all_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].0, "good");
        assert_eq!(rules[0].1.id(), "good-rule");
    }

    struct Nameless(PluginMetadata);

    impl Plugin for Nameless {
        fn metadata(&self) -> &PluginMetadata {
            &self.0
        }

        fn rules(&self) -> Vec<Box<dyn Rule>> {
            let spec = serde_yaml::from_str("{id: r1, kind: content-pattern, pattern: x}").unwrap();
            vec![Box::new(crate::plugins::DeclarativeRule::compile(spec).unwrap())]
        }
    }

    #[test]
    fn test_structural_validation() {
        let ok = PluginMetadata::new("p", "1.0.0", &[PluginKind::Rules]);
        assert!(validate_plugin(&Nameless(ok.clone())).is_err());

        let mut no_types = ok.clone();
        no_types.types.clear();
        let error = validate_plugin(&Nameless(no_types)).unwrap_err().to_string();
        assert!(error.contains("metadata.types"));

        let mut no_name = ok;
        no_name.name.clear();
        assert!(validate_plugin(&Nameless(no_name)).unwrap_err().to_string().contains("metadata.name"));
    }
}
