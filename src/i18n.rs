//! Message catalog lookup.
//!
//! Catalogs use the Chrome extension `messages.json` layout:
//! `{ "key": { "message": "text" } }`. Lookup order is the selected locale
//! under `<exe_dir>/_locales/`, then the embedded English catalog, then the
//! key itself.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

/// Global catalog instance, initialized once at startup.
static CATALOG: OnceLock<Catalog> = OnceLock::new();

const EMBEDDED_EN: &str = include_str!("../_locales/en/messages.json");

#[derive(Debug, Deserialize)]
struct MessageEntry {
    message: String,
}

/// Loaded messages for one locale plus the English fallback.
#[derive(Debug, Default)]
pub struct Catalog {
    messages: HashMap<String, String>,
    fallback: HashMap<String, String>,
}

fn parse_messages(json: &str) -> Result<HashMap<String, String>, serde_json::Error> {
    let entries: HashMap<String, MessageEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .map(|(key, entry)| (key, entry.message))
        .collect())
}

impl Catalog {
    /// Builds a catalog from JSON text, with the embedded English catalog as fallback.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            messages: parse_messages(json)?,
            fallback: parse_messages(EMBEDDED_EN).unwrap_or_default(),
        })
    }

    /// Loads `<locales_dir>/<locale>/messages.json`, falling back to English.
    pub fn load(locales_dir: &Path, locale: &str) -> Self {
        let path = locales_dir.join(locale).join("messages.json");
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(catalog) => {
                    crate::log(&format!("Loaded messages from {}", path.display()));
                    return catalog;
                }
                Err(e) => {
                    crate::log(&format!(
                        "Failed to parse {}: {}. Using English.",
                        path.display(),
                        e
                    ));
                }
            },
            Err(e) => {
                crate::log(&format!(
                    "No messages for locale '{}' ({}). Using English.",
                    locale, e
                ));
            }
        }
        Self::from_json("{}").unwrap_or_default()
    }

    /// Looks up `key`; returns the key itself when no catalog has it.
    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        self.messages
            .get(key)
            .or_else(|| self.fallback.get(key))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(key)
    }
}

/// Picks the locale: explicit config, then `LANG` (`ja_JP.UTF-8` → `ja`), then `en`.
pub fn detect_locale(configured: Option<&str>) -> String {
    if let Some(locale) = configured.map(str::trim).filter(|l| !l.is_empty()) {
        return locale.to_string();
    }
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            lang.split(['_', '.', '-'])
                .next()
                .map(|s| s.to_ascii_lowercase())
        })
        .filter(|l| !l.is_empty() && l != "c" && l != "posix")
        .unwrap_or_else(|| "en".to_string())
}

/// Initializes the global catalog. Call once at startup.
pub fn init_catalog(locale: &str) {
    let _ = CATALOG.set(Catalog::load(&crate::paths::get_locales_dir(), locale));
}

/// Translates `key` through the global catalog.
///
/// Works before initialization too, using the embedded English messages.
pub fn t(key: &str) -> String {
    CATALOG
        .get_or_init(|| Catalog::from_json("{}").unwrap_or_default())
        .get(key)
        .to_string()
}
