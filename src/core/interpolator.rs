// src/core/interpolator.rs

use crate::core::options::{OptionError, OptionTable};
use crate::core::overrides;
use crate::core::value::OptionValue;
use lazy_static::lazy_static;
use regex::Regex;

const MAX_SUBSTITUTIONS: usize = 1024;

lazy_static! {
    // Innermost placeholder: the name class excludes braces, so `{a{b}}`
    // matches `{b}` first.
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid");
}

/// Resolves options against a table, expanding `{name}` placeholders.
///
/// A placeholder that spans a whole string takes on the referenced value's
/// kind; otherwise the referenced value is rendered to text and spliced in.
#[derive(Debug, Clone)]
pub struct Interpolator<'a> {
    table: &'a OptionTable,
    // Keys currently being resolved, outermost first.
    recursion_stack: Vec<String>,
}

impl<'a> Interpolator<'a> {
    pub fn new(table: &'a OptionTable) -> Self {
        Self {
            table,
            recursion_stack: Vec::new(),
        }
    }

    fn cycle_error(&self, key: &str) -> OptionError {
        let mut chain = self.recursion_stack.clone();
        chain.push(key.to_string());
        OptionError::InterpolationCycle {
            chain: chain.join(" -> "),
        }
    }

    /// Folds the interpolated override stack of `key`.
    pub fn resolve(&mut self, key: &str) -> Result<OptionValue, OptionError> {
        if self.recursion_stack.iter().any(|k| k == key) {
            return Err(self.cycle_error(key));
        }
        let table = self.table;
        let stack = table.raw(key)?;

        self.recursion_stack.push(key.to_string());
        let result = (|| -> Result<OptionValue, OptionError> {
            let mut entries = stack.iter();
            let mut computed = match entries.next() {
                Some(default) => self.expand_value(&default.operand)?,
                None => OptionValue::None,
            };
            for entry in entries {
                let operand = self.expand_value(&entry.operand)?;
                computed = overrides::apply(&computed, entry.op, &operand)
                    .map_err(|e| OptionError::from_override(key, e))?;
            }
            Ok(computed)
        })();
        self.recursion_stack.pop();

        result
    }

    /// Interpolates every string reachable inside `value`, mapping keys
    /// included.
    pub fn expand_value(&mut self, value: &OptionValue) -> Result<OptionValue, OptionError> {
        Ok(match value {
            OptionValue::String(s) => self.expand_string(s)?,
            OptionValue::Sequence(items) => OptionValue::Sequence(
                items
                    .iter()
                    .map(|item| self.expand_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            OptionValue::Set(items) => OptionValue::Set(
                items
                    .iter()
                    .map(|item| self.expand_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            OptionValue::Mapping(entries) => {
                let mut expanded = std::collections::BTreeMap::new();
                for (k, v) in entries {
                    let key = self.expand_string(k)?.to_string();
                    expanded.insert(key, self.expand_value(v)?);
                }
                OptionValue::Mapping(expanded)
            }
            other => other.clone(),
        })
    }

    /// Expands placeholders in `template`, innermost first.
    pub fn expand_string(&mut self, template: &str) -> Result<OptionValue, OptionError> {
        let mut current = template.to_string();
        let mut substitutions = 0;

        loop {
            let Some((range, name)) = PLACEHOLDER_RE.captures(&current).and_then(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?;
                Some((whole.range(), name.as_str().to_string()))
            }) else {
                return Ok(OptionValue::String(current));
            };

            substitutions += 1;
            if substitutions > MAX_SUBSTITUTIONS {
                return Err(OptionError::ExpansionLimit {
                    template: template.to_string(),
                    limit: MAX_SUBSTITUTIONS,
                });
            }
            let value = self.resolve(&name)?;

            if range.start == 0 && range.end == current.len() {
                match value {
                    OptionValue::String(s) => current = s,
                    other => return Ok(other),
                }
            } else {
                // Splicing can assemble a new placeholder out of the pieces.
                current.replace_range(range, &value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::overrides::OverrideOp;

    fn table(entries: &[(&str, OptionValue)]) -> OptionTable {
        let mut table = OptionTable::new();
        for (k, v) in entries {
            table.push(k, OverrideOp::Replace, v.clone()).unwrap();
        }
        table
    }

    #[test]
    fn test_plain_strings_are_unchanged() {
        let t = table(&[]);
        assert_eq!(
            t.expand(&OptionValue::from("no placeholders")).unwrap(),
            OptionValue::from("no placeholders")
        );
    }

    #[test]
    fn test_whole_placeholder_preserves_kind() {
        // --- Setup ---
        let t = table(&[
            ("files", OptionValue::from(vec!["a.c", "b.c"])),
            ("alias", OptionValue::from("{files}")),
            ("flag", OptionValue::Bool(true)),
        ]);

        // --- Execute & Assert ---
        assert_eq!(
            t.resolve("alias").unwrap(),
            OptionValue::from(vec!["a.c", "b.c"])
        );
        assert_eq!(
            t.expand(&OptionValue::from("{flag}")).unwrap(),
            OptionValue::Bool(true)
        );
    }

    #[test]
    fn test_partial_placeholder_substitutes_text() {
        let t = table(&[
            ("project_anchor", OptionValue::from("/src")),
            ("build_dir", OptionValue::from("build")),
            ("level", OptionValue::Int(2)),
            ("build_anchor", OptionValue::from("{project_anchor}/{build_dir}")),
            ("opt", OptionValue::from("-O{level}")),
        ]);
        assert_eq!(
            t.resolve("build_anchor").unwrap(),
            OptionValue::from("/src/build")
        );
        assert_eq!(t.resolve("opt").unwrap(), OptionValue::from("-O2"));
    }

    #[test]
    fn test_innermost_placeholder_first() {
        let t = table(&[
            ("kind", OptionValue::from("debug")),
            ("flags_debug", OptionValue::from("-g")),
            ("flags", OptionValue::from("{flags_{kind}}")),
        ]);
        assert_eq!(t.resolve("flags").unwrap(), OptionValue::from("-g"));
    }

    #[test]
    fn test_collections_are_interpolated() {
        let t = table(&[
            ("dir", OptionValue::from("src")),
            ("name", OptionValue::from("main")),
            (
                "sources",
                OptionValue::from(vec!["{dir}/a.c", "{dir}/b.c"]),
            ),
            ("env", OptionValue::mapping_of([("{name}_HOME", "{dir}")])),
        ]);
        assert_eq!(
            t.resolve("sources").unwrap(),
            OptionValue::from(vec!["src/a.c", "src/b.c"])
        );
        assert_eq!(
            t.resolve("env").unwrap(),
            OptionValue::mapping_of([("main_HOME", "src")])
        );
    }

    #[test]
    fn test_overrides_are_interpolated_before_folding() {
        let mut t = table(&[
            ("extra", OptionValue::from("-Wall")),
            ("flags", OptionValue::from(vec!["-g"])),
        ]);
        t.push("flags", OverrideOp::Add, OptionValue::from("{extra}"))
            .unwrap();
        assert_eq!(
            t.resolve("flags").unwrap(),
            OptionValue::from(vec!["-g", "-Wall"])
        );
    }

    #[test]
    fn test_cycle_is_detected() {
        let t = table(&[
            ("a", OptionValue::from("{b}")),
            ("b", OptionValue::from("x{a}")),
        ]);
        let err = t.resolve("a").unwrap_err();
        assert_eq!(
            err,
            OptionError::InterpolationCycle {
                chain: "a -> b -> a".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_reference() {
        let t = table(&[("a", OptionValue::from("{missing}"))]);
        assert_eq!(
            t.resolve("a").unwrap_err(),
            OptionError::UnknownOption {
                key: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_long_acyclic_chain_resolves() {
        // --- Setup: k0 -> k1 -> ... -> k40 = "end", no key repeats ---
        let mut t = OptionTable::new();
        for i in 0..40 {
            t.push(
                &format!("k{i}"),
                OverrideOp::Replace,
                OptionValue::from(format!("{{k{}}}", i + 1)),
            )
            .unwrap();
        }
        t.push("k40", OverrideOp::Replace, OptionValue::from("end"))
            .unwrap();

        // --- Execute & Assert ---
        assert_eq!(t.resolve("k0").unwrap(), OptionValue::from("end"));
        assert_eq!(t.resolve("k30").unwrap(), OptionValue::from("end"));
    }
}
