/// Insert-Command Templating Module
///
/// A `Command` is a statement skeleton with `#name#` placeholders. Values are
/// bound by column name (case-insensitively) and substituted textually when
/// the final statement is rendered. Everything is text; no native typing
/// survives past the row model.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#([A-Za-z_][A-Za-z0-9_]*)#").expect("placeholder pattern is valid")
});

/// Parameterized statement template bound by column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    parameters: Vec<String>,
    values: HashMap<String, String>,
}

impl Command {
    /// Parses a template, collecting its placeholder names.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbbridge::core::db::Command;
    ///
    /// let mut cmd = Command::new("insert into t2 values (#id#,'#val#')");
    /// cmd.set_value("ID", "1", false);
    /// cmd.set_value("val", "a", false);
    /// assert_eq!(cmd.updated_text(), "insert into t2 values (1,'a')");
    /// ```
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut parameters: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&text) {
            let name = caps[1].to_lowercase();
            if !parameters.contains(&name) {
                parameters.push(name);
            }
        }
        Command {
            text,
            parameters,
            values: HashMap::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lower-cased placeholder names in order of first appearance.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains(&name.to_lowercase())
    }

    /// Binds one value. Names the template does not mention are ignored.
    ///
    /// With `sanitize` set, the value is stripped of characters that could
    /// terminate or comment out the surrounding statement.
    pub fn set_value(&mut self, name: &str, value: &str, sanitize: bool) {
        let key = name.to_lowercase();
        if !self.parameters.contains(&key) {
            return;
        }
        let value = if sanitize {
            remove_unwanted_chars(value)
        } else {
            value.to_string()
        };
        self.values.insert(key, value);
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    /// Forgets every bound value.
    pub fn clear_values(&mut self) {
        self.values.clear();
    }

    /// Renders the statement. Unbound placeholders render as empty text.
    pub fn updated_text(&self) -> String {
        PLACEHOLDER
            .replace_all(&self.text, |caps: &regex::Captures| {
                self.values
                    .get(&caps[1].to_lowercase())
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Strips characters not permitted inside a value spliced into statement text.
pub fn remove_unwanted_chars(value: &str) -> String {
    let stripped: String = value
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ';' | '\\' | '`') && !c.is_control())
        .collect();
    let mut result = stripped;
    while result.contains("--") {
        result = result.replace("--", "-");
    }
    result
}

/// Strips characters never valid in an ad-hoc executed statement.
///
/// Quotes and separators survive here since whole statements legitimately
/// carry them; only NUL and non-whitespace control characters are removed.
pub fn remove_unwanted_chars_execute(sql: &str) -> String {
    sql.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
