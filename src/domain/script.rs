//! Typed post-run script template.
//!
//! The template carries an enumerated parameter set instead of blind text
//! substitution: rendering substitutes every known placeholder and then
//! fails fast if any `{placeholder}` survives in the output.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::TemplateError;
use crate::domain::spec::ScriptParams;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // compile-time constant pattern
    Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder regex")
});

/// A post-run shell script with `{config_file}`, `{exec_mode}`,
/// `{output_dir}` and `{extra_args}` placeholders.
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    body: String,
}

impl ScriptTemplate {
    #[must_use]
    pub fn new(body: String) -> Self {
        Self { body }
    }

    /// Renders the template against a resolved remote config path.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Unresolved`] naming the first placeholder
    /// the parameter set does not cover.
    pub fn render(&self, config_file: &str, params: &ScriptParams) -> Result<String, TemplateError> {
        let rendered = self
            .body
            .replace("{config_file}", config_file)
            .replace("{exec_mode}", &params.exec_mode)
            .replace("{output_dir}", &params.output_dir)
            .replace("{extra_args}", &params.extra_args);

        if let Some(caps) = PLACEHOLDER.captures(&rendered) {
            return Err(TemplateError::Unresolved {
                name: caps[1].to_owned(),
            });
        }
        Ok(rendered)
    }
}
