//! Plain-text templates with named-field substitution.
//!
//! Templates live as files under a base directory and use Tera syntax,
//! e.g. `Hello {{ receiver_name }}`. Every render reads the file again.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_derive::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::error::{chain, Error, Result};

/// Named fields handed to a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateData(toml::Table);

impl TemplateData {
    pub fn new() -> TemplateData {
        TemplateData::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> TemplateData {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<toml::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_toml(text: &str) -> Result<TemplateData> {
        toml::from_str(text)
            .map(TemplateData)
            .map_err(|e| Error::Config(format!("invalid template data: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<TemplateData> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read template data {}: {}", path.display(), e))
        })?;
        TemplateData::from_toml(&text)
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    base_dir: PathBuf,
}

impl Renderer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Renderer {
        Renderer {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Names must stay inside the base directory.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let contained = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(Error::TemplateNotFound(name.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }

    pub fn render(&self, name: &str, data: &TemplateData) -> Result<String> {
        let path = self.resolve(name)?;
        let source = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::TemplateNotFound(path.display().to_string()),
            _ => Error::Render {
                name: name.to_string(),
                reason: e.to_string(),
            },
        })?;

        let mut tera = Tera::default();
        tera.add_raw_template(name, &source)
            .map_err(|e| Error::TemplateSyntax {
                name: name.to_string(),
                reason: chain(&e),
            })?;
        let context = Context::from_serialize(data).map_err(|e| Error::Render {
            name: name.to_string(),
            reason: chain(&e),
        })?;
        let body = tera.render(name, &context).map_err(|e| Error::Render {
            name: name.to_string(),
            reason: chain(&e),
        })?;
        tracing::debug!(template = %path.display(), bytes = body.len(), "rendered template");
        Ok(body)
    }
}
