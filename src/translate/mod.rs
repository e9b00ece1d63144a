//! Layered-dictionary translator (spec §4.C): locale strings with `%{name}`
//! placeholder substitution and count-based pluralization.
//!
//! Grounded on the teacher's layered `ConfigStore` (`config::mod`), which
//! merges a base `Ini` under a user-supplied override `Ini` and resolves
//! lookups most-specific-first; the same shape applies here to dictionaries
//! instead of ini sections.

use std::collections::HashMap;

use crate::util::strings::escape_replacement_dollars;

/// One dictionary entry: either a single string, or a set of plural forms
/// selected by a `smart_count` parameter (spec §4.C, "pluralization").
#[derive(Clone, Debug)]
pub enum Translation {
    Single(String),
    /// `[zero, one, other]`. A two-element array is `[one, other]` (no
    /// distinct zero form); English-style dictionaries use this shape.
    Plural(Vec<String>),
}

impl From<&str> for Translation {
    fn from(s: &str) -> Self {
        Translation::Single(s.to_owned())
    }
}

impl From<Vec<&str>> for Translation {
    fn from(forms: Vec<&str>) -> Self {
        Translation::Plural(forms.into_iter().map(String::from).collect())
    }
}

type Dictionary = HashMap<String, Translation>;

/// Resolves translation keys against a stack of dictionaries, most
/// recently added taking priority, falling back to earlier layers
/// (spec §4.C, "layered dictionaries").
#[derive(Default)]
pub struct Translator {
    layers: Vec<Dictionary>,
}

impl Translator {
    pub fn new() -> Self {
        Translator { layers: Vec::new() }
    }

    /// Push a dictionary on top of the stack. Later layers shadow keys
    /// present in earlier ones; nothing is merged key-by-key within a layer.
    pub fn add_dictionary(&mut self, dictionary: Dictionary) {
        self.layers.push(dictionary);
    }

    fn lookup(&self, key: &str) -> Option<&Translation> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    /// Translate `key`, substituting `%{name}` placeholders from `params`
    /// (the literal placeholder name `_` is never substituted: it is
    /// reserved for internal smart-count bookkeeping). Falls back to `key`
    /// itself if no dictionary defines it.
    pub fn translate(&self, key: &str, params: &HashMap<String, String>) -> String {
        let template = match self.lookup(key) {
            Some(Translation::Single(s)) => s.clone(),
            Some(Translation::Plural(forms)) => self.select_plural_form(forms, params),
            None => key.to_owned(),
        };
        self.interpolate(&template, params)
    }

    /// Translate every item in `keys`, in order (spec §4.C, `translateArray`).
    pub fn translate_array(&self, keys: &[&str], params: &HashMap<String, String>) -> Vec<String> {
        keys.iter().map(|k| self.translate(k, params)).collect()
    }

    fn select_plural_form(&self, forms: &[String], params: &HashMap<String, String>) -> String {
        let count: i64 = params
            .get("smart_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        match (forms.len(), count) {
            (3, 0) => forms[0].clone(),
            (3, 1) => forms[1].clone(),
            (3, _) => forms[2].clone(),
            (2, 1) => forms[0].clone(),
            (2, _) => forms[1].clone(),
            (_, _) => forms.last().cloned().unwrap_or_default(),
        }
    }

    fn interpolate(&self, template: &str, params: &HashMap<String, String>) -> String {
        let mut out = template.to_owned();
        for (name, value) in params {
            if name == "_" {
                continue;
            }
            let placeholder = format!("%{{{}}}", name);
            out = out.replace(&placeholder, &escape_replacement_dollars(value));
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_named_placeholders() {
        let mut t = Translator::new();
        let mut dict = Dictionary::new();
        dict.insert(
            "youHaveLeft".into(),
            Translation::from("%{name} has %{remaining} left"),
        );
        t.add_dictionary(dict);

        let out = t.translate("youHaveLeft", &params(&[("name", "a.png"), ("remaining", "3")]));
        assert_eq!(out, "a.png has 3 left");
    }

    #[test]
    fn later_layers_shadow_earlier_ones() {
        let mut t = Translator::new();
        let mut base = Dictionary::new();
        base.insert("cancel".into(), Translation::from("Cancel"));
        t.add_dictionary(base);

        let mut overrides = Dictionary::new();
        overrides.insert("cancel".into(), Translation::from("Abbrechen"));
        t.add_dictionary(overrides);

        assert_eq!(t.translate("cancel", &HashMap::new()), "Abbrechen");
    }

    #[test]
    fn falls_back_to_earlier_layer_for_untouched_keys() {
        let mut t = Translator::new();
        let mut base = Dictionary::new();
        base.insert("cancel".into(), Translation::from("Cancel"));
        base.insert("retry".into(), Translation::from("Retry"));
        t.add_dictionary(base);

        let mut overrides = Dictionary::new();
        overrides.insert("cancel".into(), Translation::from("Abbrechen"));
        t.add_dictionary(overrides);

        assert_eq!(t.translate("retry", &HashMap::new()), "Retry");
    }

    #[test]
    fn plural_form_selected_by_smart_count() {
        let mut t = Translator::new();
        let mut dict = Dictionary::new();
        dict.insert(
            "filesChosen".into(),
            Translation::from(vec!["%{smart_count} file", "%{smart_count} files"]),
        );
        t.add_dictionary(dict);

        assert_eq!(
            t.translate("filesChosen", &params(&[("smart_count", "1")])),
            "1 file"
        );
        assert_eq!(
            t.translate("filesChosen", &params(&[("smart_count", "5")])),
            "5 files"
        );
    }

    #[test]
    fn underscore_placeholder_is_never_substituted() {
        let mut t = Translator::new();
        let mut dict = Dictionary::new();
        dict.insert("raw".into(), Translation::from("literal %{_} stays"));
        t.add_dictionary(dict);
        assert_eq!(
            t.translate("raw", &params(&[("_", "should not appear")])),
            "literal %{_} stays"
        );
    }

    #[test]
    fn missing_key_falls_back_to_the_key_itself() {
        let t = Translator::new();
        assert_eq!(t.translate("unknownKey", &HashMap::new()), "unknownKey");
    }
}
