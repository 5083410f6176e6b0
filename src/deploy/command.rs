//! Rendering of the remote deployment command from its template.
//!
//! The template carries named placeholders (`{image}`,
//! `{registry_username}`, `{registry_password}`); every substituted value
//! is shell-escaped before it reaches the SSH client.

use shell_escape::unix::escape;

use super::config::DeployError;
use super::types::DeployInputs;

/// A remote command template with named placeholders.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandTemplate {
    template: String,
}

impl RemoteCommandTemplate {
    /// Wraps a template string.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Renders the template, substituting shell-escaped runtime values.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Template`] for unknown placeholders or an
    /// unterminated `{`.
    pub fn render(&self, inputs: &DeployInputs) -> Result<String, DeployError> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut chars = self.template.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '{' {
                rendered.push(ch);
                continue;
            }

            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(inner) => name.push(inner),
                    None => {
                        return Err(DeployError::Template {
                            message: String::from("unterminated placeholder"),
                        });
                    }
                }
            }

            let value = match name.as_str() {
                "image" => inputs.image.clone(),
                "registry_username" => inputs.registry_username.clone(),
                "registry_password" => inputs.registry_password.expose().to_owned(),
                unknown => {
                    return Err(DeployError::Template {
                        message: format!("unknown placeholder {{{unknown}}}"),
                    });
                }
            };
            rendered.push_str(&escape(value.into()));
        }

        Ok(rendered)
    }
}
