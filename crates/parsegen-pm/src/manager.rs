use std::collections::BTreeSet;
use std::path::Path;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use tracing::debug;

use crate::error::PmError;
use crate::template::{BUILTIN_TEMPLATES, PromptTemplate, TEMPLATE_EXTENSIONS};

/// Manages prompt templates and renders them with context variables.
///
/// Starts out with the built-in templates. Templates loaded later under the
/// same name replace the earlier ones, which is how project-level overrides
/// take effect.
#[derive(Debug, Clone)]
pub struct PromptManager {
    env: Environment<'static>,
    names: BTreeSet<String>,
}

impl PromptManager {
    /// Create a prompt manager preloaded with the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns `PmError::InvalidTemplate` if a built-in template fails to parse.
    pub fn new() -> Result<Self, PmError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let mut pm = Self {
            env,
            names: BTreeSet::new(),
        };
        for (name, source) in BUILTIN_TEMPLATES {
            pm.add_template(PromptTemplate::new(*name, *source))?;
        }
        Ok(pm)
    }

    /// Load all `.j2` / `.jinja` templates below a directory.
    ///
    /// The template name is the path relative to `dir` without its extension,
    /// using `/` as separator, so `dir/parser/generate.j2` overrides the
    /// built-in `parser/generate`.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, PmError> {
        let mut loaded = 0;
        self.load_dir_inner(dir, dir, &mut loaded)?;
        debug!(dir = %dir.display(), loaded, "loaded prompt templates");
        Ok(loaded)
    }

    fn load_dir_inner(
        &mut self,
        root: &Path,
        dir: &Path,
        loaded: &mut usize,
    ) -> Result<(), PmError> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.load_dir_inner(root, &path, loaded)?;
                continue;
            }

            let is_template = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext));
            if !is_template {
                continue;
            }

            let Some(name) = template_name(root, &path) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            self.add_template(PromptTemplate::new(name, source))?;
            *loaded += 1;
        }
        Ok(())
    }

    /// Register a single template, replacing any template with the same name.
    pub fn add_template(&mut self, template: PromptTemplate) -> Result<(), PmError> {
        let PromptTemplate { name, source } = template;
        self.env
            .add_template_owned(name.clone(), source)
            .map_err(|e| PmError::InvalidTemplate {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        self.names.insert(name);
        Ok(())
    }

    /// Render a template by name with the given context.
    pub fn render(&self, name: &str, ctx: &serde_json::Value) -> Result<String, PmError> {
        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => PmError::TemplateNotFound(name.to_owned()),
            _ => PmError::RenderError(e.to_string()),
        })?;

        template
            .render(ctx)
            .map_err(|e| PmError::RenderError(format!("{name}: {e}")))
    }

    /// Names of all registered templates, sorted.
    pub fn list_templates(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}

/// Derive the lookup name of a template file relative to its root directory.
fn template_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
