use crate::error::{AssistantError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed data for a template. Rendering refuses data that fails `validate`.
pub trait TemplateData: Serialize {
    fn validate(&self) -> Result<()>;
}

pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub description: String,
    pub body: String,
    engine: tera::Tera,
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl PromptTemplate {
    /// Compiles `body`; syntax errors surface here rather than at render time.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        let body = body.into();
        if name.trim().is_empty() || version.trim().is_empty() {
            return Err(AssistantError::invalid("template name and version are required"));
        }

        let mut engine = tera::Tera::default();
        engine.autoescape_on(vec![]);
        engine
            .add_raw_template(&name, &body)
            .map_err(|e| AssistantError::invalid(format!("template {name}@{version} does not compile: {e}")))?;

        Ok(Self {
            name,
            version,
            description: description.into(),
            body,
            engine,
        })
    }

    pub fn render<D: TemplateData>(&self, data: &D) -> Result<String> {
        data.validate()?;
        let context = tera::Context::from_serialize(data).map_err(|e| {
            AssistantError::invalid(format!("template data for {} is not an object: {e}", self.name))
        })?;
        self.engine.render(&self.name, &context).map_err(|e| {
            AssistantError::invalid(format!("failed to render {}@{}: {e}", self.name, self.version))
        })
    }
}

/// Name → version → template. Read-mostly after startup.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: Arc<RwLock<BTreeMap<String, BTreeMap<String, Arc<PromptTemplate>>>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in templates.
    pub fn with_builtins() -> Result<Self> {
        let registry = Self::new();
        for template in super::templates::builtin_templates()? {
            registry.register(template)?;
        }
        Ok(registry)
    }

    pub fn register(&self, template: PromptTemplate) -> Result<()> {
        let mut templates = self.templates.write();
        let versions = templates.entry(template.name.clone()).or_default();
        if versions.contains_key(&template.version) {
            return Err(AssistantError::invalid(format!(
                "template already registered: {}@{}",
                template.name, template.version
            )));
        }
        tracing::debug!(name = %template.name, version = %template.version, "registering prompt template");
        versions.insert(template.version.clone(), Arc::new(template));
        Ok(())
    }

    pub fn get(&self, name: &str, version: &str) -> Result<Arc<PromptTemplate>> {
        self.templates
            .read()
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
            .ok_or_else(|| AssistantError::not_found(format!("template not found: {name}@{version}")))
    }

    /// Highest registered version of `name`.
    pub fn latest(&self, name: &str) -> Result<Arc<PromptTemplate>> {
        self.templates
            .read()
            .get(name)
            .and_then(|versions| {
                versions
                    .values()
                    .max_by(|a, b| compare_versions(&a.version, &b.version))
                    .cloned()
            })
            .ok_or_else(|| AssistantError::not_found(format!("template not found: {name}")))
    }

    pub fn versions(&self, name: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .templates
            .read()
            .get(name)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions
    }

    pub fn render<D: TemplateData>(&self, name: &str, version: &str, data: &D) -> Result<String> {
        self.get(name, version)?.render(data)
    }
}

/// Dot-separated comparison, numeric where both parts are numbers.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.trim_start_matches('v').split('.');
    let mut right = b.trim_start_matches('v').split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
