//! Prompt template management.
//!
//! Prompts are named `.md` files under a configured directory; the file stem
//! is the prompt name. Templates use minijinja syntax with strict undefined
//! behavior, so referencing a variable the caller did not bind is a render
//! error rather than silent empty output.
//!
//! With `hot_reload` enabled a filesystem watcher reparses the single
//! affected template on create/modify and drops it on delete. A template
//! that fails to parse is logged and skipped; the previous version (if any)
//! stays in place.

use ferrocode_core::error::PromptError;
use minijinja::{Environment, UndefinedBehavior};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

pub struct PromptManager {
    directory: PathBuf,
    env: Arc<RwLock<Environment<'static>>>,
    // Held for the lifetime of the manager; dropping it stops the watch.
    _watcher: Option<notify::RecommendedWatcher>,
}

impl PromptManager {
    /// Create a manager over the given directory, loading all templates.
    /// The directory is created if missing.
    pub fn new(directory: impl Into<PathBuf>, hot_reload: bool) -> Result<Self, PromptError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| PromptError::Io(format!("failed to create prompts directory: {e}")))?;

        let env = Arc::new(RwLock::new(load_all(&directory)));

        let watcher = if hot_reload {
            match setup_watcher(&directory, Arc::clone(&env)) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "Failed to set up prompt watcher, hot reload disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            directory,
            env,
            _watcher: watcher,
        })
    }

    /// Render a prompt with no variables.
    pub fn get(&self, name: &str) -> Result<String, PromptError> {
        self.get_with_data(name, minijinja::context! {})
    }

    /// Render a prompt with the given variable bindings.
    pub fn get_with_data(&self, name: &str, data: impl Serialize) -> Result<String, PromptError> {
        let env = self.env.read().expect("prompt env lock poisoned");
        let template = env
            .get_template(name)
            .map_err(|_| PromptError::NotFound(name.to_string()))?;
        template.render(data).map_err(|e| PromptError::Render {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Rebuild the whole template table atomically.
    pub fn reload(&self) -> Result<(), PromptError> {
        let fresh = load_all(&self.directory);
        *self.env.write().expect("prompt env lock poisoned") = fresh;
        info!(directory = %self.directory.display(), "Reloaded prompts");
        Ok(())
    }

    /// Names of all loaded prompts.
    pub fn list_prompts(&self) -> Vec<String> {
        let env = self.env.read().expect("prompt env lock poisoned");
        env.templates().map(|(name, _)| name.to_string()).collect()
    }
}

/// Load every `.md` file in the directory into a fresh environment.
/// Parse failures are logged and the file skipped.
fn load_all(directory: &Path) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            error!(directory = %directory.display(), error = %e, "Failed to read prompts directory");
            return env;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        add_template_from_file(&mut env, &path);
    }

    env
}

/// Parse one file into the environment, keyed by its stem.
fn add_template_from_file(env: &mut Environment<'static>, path: &Path) {
    let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
        return;
    };

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!(file = %path.display(), error = %e, "Failed to read prompt file");
            return;
        }
    };

    match env.add_template_owned(name.clone(), content) {
        Ok(()) => debug!(prompt = %name, "Loaded prompt"),
        Err(e) => error!(prompt = %name, error = %e, "Failed to parse prompt template"),
    }
}

/// Handle a single watcher event against the shared environment.
fn apply_fs_event(env: &Arc<RwLock<Environment<'static>>>, event: &Event) {
    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                info!(file = %path.display(), "Prompt file changed, reloading");
                let mut env = env.write().expect("prompt env lock poisoned");
                add_template_from_file(&mut env, path);
            }
            EventKind::Remove(_) => {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    info!(prompt = %name, "Prompt file removed");
                    let mut env = env.write().expect("prompt env lock poisoned");
                    env.remove_template(name);
                }
            }
            _ => {}
        }
    }
}

fn setup_watcher(
    directory: &Path,
    env: Arc<RwLock<Environment<'static>>>,
) -> notify::Result<notify::RecommendedWatcher> {
    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => apply_fs_event(&env, &event),
            Err(e) => error!(error = %e, "Prompt watcher error"),
        })?;
    watcher.watch(directory, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_prompt(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(format!("{name}.md"));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_and_renders_templates() {
        let dir = tempfile::tempdir().unwrap();
        write_prompt(dir.path(), "greeting", "Hello from {{ model_provider }}!");
        write_prompt(dir.path(), "plain", "No variables here.");

        let pm = PromptManager::new(dir.path(), false).unwrap();

        let rendered = pm
            .get_with_data("greeting", minijinja::context! { model_provider => "claude" })
            .unwrap();
        assert_eq!(rendered, "Hello from claude!");

        assert_eq!(pm.get("plain").unwrap(), "No variables here.");

        let mut names = pm.list_prompts();
        names.sort();
        assert_eq!(names, vec!["greeting", "plain"]);
    }

    #[test]
    fn missing_prompt_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pm = PromptManager::new(dir.path(), false).unwrap();
        let err = pm.get("nope").unwrap_err();
        assert!(matches!(err, PromptError::NotFound(_)));
    }

    #[test]
    fn missing_variable_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        write_prompt(dir.path(), "needs_var", "value: {{ missing_thing }}");

        let pm = PromptManager::new(dir.path(), false).unwrap();
        let err = pm.get("needs_var").unwrap_err();
        assert!(matches!(err, PromptError::Render { .. }));
    }

    #[test]
    fn parse_failure_skips_template_but_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        write_prompt(dir.path(), "broken", "unclosed {% if x %} block");
        write_prompt(dir.path(), "fine", "ok");

        let pm = PromptManager::new(dir.path(), false).unwrap();
        assert!(matches!(pm.get("broken"), Err(PromptError::NotFound(_))));
        assert_eq!(pm.get("fine").unwrap(), "ok");
    }

    #[test]
    fn reload_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let pm = PromptManager::new(dir.path(), false).unwrap();
        assert!(pm.get("later").is_err());

        write_prompt(dir.path(), "later", "I arrived late");
        pm.reload().unwrap();
        assert_eq!(pm.get("later").unwrap(), "I arrived late");
    }

    #[test]
    fn reload_drops_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_prompt(dir.path(), "fleeting", "soon gone");
        let pm = PromptManager::new(dir.path(), false).unwrap();
        assert!(pm.get("fleeting").is_ok());

        std::fs::remove_file(path).unwrap();
        pm.reload().unwrap();
        assert!(matches!(pm.get("fleeting"), Err(PromptError::NotFound(_))));
    }

    #[test]
    fn fs_event_reloads_single_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_prompt(dir.path(), "live", "version one");
        let pm = PromptManager::new(dir.path(), false).unwrap();
        assert_eq!(pm.get("live").unwrap(), "version one");

        std::fs::write(&path, "version two").unwrap();
        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(path.clone());
        apply_fs_event(&pm.env, &event);
        assert_eq!(pm.get("live").unwrap(), "version two");

        let remove =
            Event::new(EventKind::Remove(notify::event::RemoveKind::Any)).add_path(path);
        apply_fs_event(&pm.env, &remove);
        assert!(matches!(pm.get("live"), Err(PromptError::NotFound(_))));
    }

    #[test]
    fn conditional_rendering() {
        let dir = tempfile::tempdir().unwrap();
        write_prompt(
            dir.path(),
            "cond",
            "{% if verbose %}long form{% else %}short{% endif %}",
        );
        let pm = PromptManager::new(dir.path(), false).unwrap();
        assert_eq!(
            pm.get_with_data("cond", minijinja::context! { verbose => true })
                .unwrap(),
            "long form"
        );
        assert_eq!(
            pm.get_with_data("cond", minijinja::context! { verbose => false })
                .unwrap(),
            "short"
        );
    }
}
