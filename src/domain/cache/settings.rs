//! Settings-form descriptors contributed by drivers

use serde::Serialize;

/// Input widget an external admin form should render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Password,
    Int,
    Check,
}

/// One configuration field a driver asks the admin form to show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingField {
    pub name: String,
    pub label: String,
    pub input: InputType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtext: Option<String>,
}

impl SettingField {
    pub fn new(name: impl Into<String>, label: impl Into<String>, input: InputType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            input,
            value: None,
            subtext: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_subtext(mut self, subtext: impl Into<String>) -> Self {
        self.subtext = Some(subtext.into());
        self
    }
}

/// Caller-owned form descriptor. Drivers only append to it; validation and
/// persistence belong to whoever renders the form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsForm {
    pub fields: Vec<SettingField>,
    pub scripts: Vec<String>,
}

impl SettingsForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: SettingField) {
        self.fields.push(field);
    }

    /// Adds a script that enables `fields` only while `backend` is selected
    pub fn toggle_with_backend(&mut self, backend: &str, fields: &[&str]) {
        let names = fields
            .iter()
            .map(|f| format!("'{}'", f))
            .collect::<Vec<_>>()
            .join(", ");

        self.scripts.push(format!(
            "toggleCacheFields('{}', [{}]);",
            backend, names
        ));
    }

    pub fn field(&self, name: &str) -> Option<&SettingField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_script() {
        let mut form = SettingsForm::new();
        form.toggle_with_backend("memcached", &["cache_memcached", "cache_persistent"]);

        assert_eq!(
            form.scripts[0],
            "toggleCacheFields('memcached', ['cache_memcached', 'cache_persistent']);"
        );
    }

    #[test]
    fn test_field_serialization_skips_empty() {
        let field = SettingField::new("cachedir_sqlite", "SQLite cache directory", InputType::Text);
        let json = serde_json::to_value(&field).unwrap();

        assert_eq!(json["input"], "text");
        assert!(json.get("value").is_none());
    }
}
