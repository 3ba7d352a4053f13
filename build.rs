// build.rs

//! Compiles `locales/*.toml` into the `t!` macro.
//!
//! `locales/en.toml` is the reference table. A translation may only use
//! keys it defines and must keep the same `{placeholders}`, since the
//! strings are fed to `format!` with named arguments. Every `t!("key")`
//! under `src/` must have an entry, so a missing string fails the build
//! with a list instead of one `compile_error!` per call site.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const LOCALES_DIR: &str = "locales";
const REFERENCE_LANG: &str = "en";

type Table = BTreeMap<String, String>;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={LOCALES_DIR}");
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-env-changed=KILN_LANG");

    let lang = selected_language();
    println!("cargo:rustc-env=KILN_LANG_EFFECTIVE={lang}");

    let mut table = load_table(REFERENCE_LANG).unwrap_or_else(|e| panic!("{e}"));
    if lang != REFERENCE_LANG {
        match load_table(&lang) {
            Ok(translation) => merge_translation(&mut table, translation, &lang),
            Err(e) => println!("cargo:warning={e}; falling back to '{REFERENCE_LANG}'"),
        }
    }

    let used = used_keys(Path::new("src"));
    let missing: Vec<&str> = used
        .iter()
        .map(String::as_str)
        .filter(|key| !table.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        panic!(
            "{LOCALES_DIR}/{REFERENCE_LANG}.toml lacks keys used in src/: {}",
            missing.join(", ")
        );
    }
    for key in table.keys().filter(|key| !used.contains(*key)) {
        println!("cargo:warning=locale key '{key}' is never used");
    }

    let out_dir = env::var("OUT_DIR").unwrap_or_else(|e| panic!("OUT_DIR: {e}"));
    let dest = Path::new(&out_dir).join("translations.rs");
    fs::write(&dest, render_macro(&table)).unwrap_or_else(|e| panic!("{}: {e}", dest.display()));
}

/// A `lang_*` feature wins over `KILN_LANG`; English otherwise.
fn selected_language() -> String {
    let features: Vec<String> = env::vars()
        .filter_map(|(key, _)| key.strip_prefix("CARGO_FEATURE_LANG_").map(str::to_lowercase))
        .collect();
    if let Some(first) = features.first() {
        if features.len() > 1 {
            println!("cargo:warning=several lang_* features enabled {features:?}; using '{first}'");
        }
        return first.clone();
    }
    env::var("KILN_LANG").unwrap_or_else(|_| REFERENCE_LANG.to_string())
}

fn load_table(lang: &str) -> Result<Table, String> {
    let path = format!("{LOCALES_DIR}/{lang}.toml");
    let text = fs::read_to_string(&path).map_err(|e| format!("cannot read {path}: {e}"))?;
    toml::from_str(&text).map_err(|e| format!("cannot parse {path}: {e}"))
}

fn merge_translation(table: &mut Table, translation: Table, lang: &str) {
    for (key, text) in translation {
        let Some(reference) = table.get(&key) else {
            panic!("{LOCALES_DIR}/{lang}.toml defines '{key}', which {REFERENCE_LANG}.toml does not");
        };
        if placeholders(reference) != placeholders(&text) {
            panic!(
                "{LOCALES_DIR}/{lang}.toml: '{key}' must use the placeholders {:?}",
                placeholders(reference)
            );
        }
        table.insert(key, text);
    }
}

/// Named `{placeholders}` in a format string; `{{` escapes are skipped.
fn placeholders(text: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        if let Some(stripped) = after.strip_prefix('{') {
            rest = stripped;
            continue;
        }
        let Some(end) = after.find('}') else { break };
        names.insert(after[..end].to_string());
        rest = &after[end + 1..];
    }
    names
}

/// Every literal key passed to `t!` in `.rs` files below `root`.
fn used_keys(root: &Path) -> BTreeSet<String> {
    const CALL: &str = "t!(\"";
    let mut keys = BTreeSet::new();
    let sources = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"));
    for entry in sources {
        let Ok(text) = fs::read_to_string(entry.path()) else { continue };
        let mut rest = text.as_str();
        while let Some(start) = rest.find(CALL) {
            // `format!(` also ends in `t!(`.
            let standalone = !rest[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
            rest = &rest[start + CALL.len()..];
            if standalone && let Some(end) = rest.find('"') {
                keys.insert(rest[..end].to_string());
                rest = &rest[end..];
            }
        }
    }
    keys
}

/// One literal arm per key, so `t!` expands to a `&'static str` usable as a
/// `format!` string, plus a `compile_error!` arm for anything else.
fn render_macro(table: &Table) -> String {
    let mut code = String::from("#[macro_export]\nmacro_rules! t {\n");
    for (key, text) in table {
        code.push_str(&format!("    ({key:?}) => {{ {text:?} }};\n"));
    }
    code.push_str(
        "    ($key:expr) => {{ compile_error!(concat!(\"Missing translation key: \", $key)) }};\n}\n",
    );
    code
}
