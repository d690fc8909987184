//! Column-name normalization.
//!
//! Source files use a human-authored naming convention (`department_email`,
//! `employee_id`, `ad_id`); storage expects a canonical vocabulary (`email`,
//! `source_id`). A [`NormalizeRule`] maps one to the other for every entity
//! its glob pattern matches.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::IngestError;
use crate::model::RecordSet;

/// Upper bound on rule passes per column. Validated rule sets settle in far
/// fewer: stripping shortens the name and a rename target is final.
const MAX_PASSES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NormalizeRule {
    /// Glob matched against the entity name (`number_of_clicks_*`).
    pub entity: String,
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

impl NormalizeRule {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            strip_prefixes: Vec::new(),
            renames: BTreeMap::new(),
        }
    }

    pub fn strip(mut self, prefix: &str) -> Self {
        self.strip_prefixes.push(prefix.to_string());
        self
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.renames.insert(from.to_string(), to.to_string());
        self
    }
}

/// The rule set the pipeline ships with.
pub fn default_rules() -> Vec<NormalizeRule> {
    vec![
        NormalizeRule::new("department")
            .strip("department_")
            .rename("employee_id", "source_id"),
        NormalizeRule::new("employee")
            .strip("department_")
            .rename("employee_id", "source_id"),
        NormalizeRule::new("ads_click").rename("ad_id", "source_id"),
        NormalizeRule::new("revenue_from_ads").rename("user_id", "source_id"),
        NormalizeRule::new("number_of_clicks_*").rename("user_id", "source_id"),
        NormalizeRule::new("site").rename("id", "source_id"),
    ]
}

struct CompiledRule {
    pattern: glob::Pattern,
    rule: NormalizeRule,
}

/// Compiled, validated rule set. Pure: never touches its input.
pub struct ColumnNormalizer {
    rules: Vec<CompiledRule>,
}

impl ColumnNormalizer {
    pub fn new(rules: &[NormalizeRule]) -> Result<Self, IngestError> {
        validate_rules(rules)?;
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = glob::Pattern::new(&rule.entity).map_err(|e| {
                    IngestError::Config(format!("normalize rule '{}': {e}", rule.entity))
                })?;
                Ok(CompiledRule {
                    pattern,
                    rule: rule.clone(),
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;
        Ok(Self { rules })
    }

    pub fn with_defaults() -> Result<Self, IngestError> {
        Self::new(&default_rules())
    }

    /// Canonical name of one column for `entity`.
    pub fn normalize_column(&self, column: &str, entity: &str) -> String {
        let matching: Vec<&NormalizeRule> = self
            .rules
            .iter()
            .filter(|c| c.pattern.matches(entity))
            .map(|c| &c.rule)
            .collect();

        let mut name = column.to_string();
        for _ in 0..MAX_PASSES {
            let next = matching.iter().fold(name.clone(), |acc, rule| apply_rule(rule, acc));
            if next == name {
                break;
            }
            name = next;
        }
        name
    }

    /// Rewrite every column name of `records` for `entity`. Two columns that
    /// land on the same name, ignoring case, are an error rather than a
    /// silent overwrite.
    pub fn normalize(&self, records: &RecordSet, entity: &str) -> Result<RecordSet, IngestError> {
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(records.columns().len());
        for column in records.columns() {
            let canonical = self.normalize_column(column, entity);
            if canonical != *column {
                log::debug!("{entity}: column '{column}' -> '{canonical}'");
            }
            if !seen.insert(canonical.to_lowercase()) {
                return Err(IngestError::DuplicateColumn {
                    entity: entity.to_string(),
                    column: canonical,
                });
            }
            columns.push(canonical);
        }
        Ok(records.with_columns(columns))
    }
}

fn apply_rule(rule: &NormalizeRule, mut name: String) -> String {
    loop {
        let stripped = rule
            .strip_prefixes
            .iter()
            .find_map(|p| name.strip_prefix(p.as_str()).filter(|rest| !rest.is_empty()));
        match stripped {
            Some(rest) => name = rest.to_string(),
            None => break,
        }
    }
    match rule.renames.get(&name) {
        Some(target) => target.clone(),
        None => name,
    }
}

/// Rejects rule sets whose output could be rewritten again: a rename target
/// that is also a rename source, or that starts with a strip prefix.
pub fn validate_rules(rules: &[NormalizeRule]) -> Result<(), IngestError> {
    let sources: HashSet<&str> = rules
        .iter()
        .flat_map(|r| r.renames.keys().map(String::as_str))
        .collect();
    let prefixes: Vec<&str> = rules
        .iter()
        .flat_map(|r| r.strip_prefixes.iter().map(String::as_str))
        .collect();

    for rule in rules {
        if rule.entity.trim().is_empty() {
            return Err(IngestError::Config("normalize rule with empty entity pattern".into()));
        }
        if rule.strip_prefixes.iter().any(|p| p.is_empty()) {
            return Err(IngestError::Config(format!(
                "normalize rule '{}': empty strip prefix",
                rule.entity
            )));
        }
        for (from, to) in &rule.renames {
            if to.is_empty() {
                return Err(IngestError::Config(format!(
                    "normalize rule '{}': '{from}' renamed to an empty name",
                    rule.entity
                )));
            }
            if sources.contains(to.as_str()) {
                return Err(IngestError::Config(format!(
                    "normalize rule '{}': rename target '{to}' is itself renamed",
                    rule.entity
                )));
            }
            if let Some(prefix) = prefixes.iter().find(|p| to.starts_with(**p)) {
                return Err(IngestError::Config(format!(
                    "normalize rule '{}': rename target '{to}' starts with strip prefix '{prefix}'",
                    rule.entity
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn columns(names: &[&str]) -> RecordSet {
        RecordSet::with_rows(
            names.iter().map(|s| s.to_string()).collect(),
            vec![names.iter().map(|_| Value::Int(1)).collect()],
        )
    }

    #[test]
    fn strips_prefix_and_renames() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        let out = n
            .normalize(
                &columns(&["department_email", "department_name", "employee_id", "notes"]),
                "department",
            )
            .unwrap();
        assert_eq!(out.columns(), &["email", "name", "source_id", "notes"]);
    }

    #[test]
    fn input_is_untouched() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        let input = columns(&["ad_id", "clicks"]);
        let out = n.normalize(&input, "ads_click").unwrap();
        assert_eq!(input.columns(), &["ad_id", "clicks"]);
        assert_eq!(out.columns(), &["source_id", "clicks"]);
        assert_eq!(out.rows(), input.rows());
    }

    #[test]
    fn glob_patterns_select_rules() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        assert_eq!(n.normalize_column("user_id", "number_of_clicks_2024_01"), "source_id");
        assert_eq!(n.normalize_column("user_id", "revenue_from_ads"), "source_id");
        assert_eq!(n.normalize_column("user_id", "something_else"), "user_id");
        assert_eq!(n.normalize_column("department_email", "ads_click"), "department_email");
    }

    #[test]
    fn repeated_prefix_is_fully_stripped() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        assert_eq!(n.normalize_column("department_department_code", "department"), "code");
        // never strip down to nothing
        assert_eq!(n.normalize_column("department_", "department"), "department_");
    }

    #[test]
    fn normalizing_twice_is_a_noop() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        let once = n
            .normalize(&columns(&["department_email", "employee_id"]), "employee")
            .unwrap();
        let twice = n.normalize(&once, "employee").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn collapsing_columns_is_an_error() {
        let n = ColumnNormalizer::with_defaults().unwrap();
        let err = n
            .normalize(&columns(&["department_email", "email"]), "department")
            .unwrap_err();
        assert!(
            matches!(err, IngestError::DuplicateColumn { ref column, .. } if column == "email")
        );
    }

    #[test]
    fn rename_chains_are_rejected() {
        let rules = vec![
            NormalizeRule::new("a").rename("x", "y"),
            NormalizeRule::new("b").rename("y", "z"),
        ];
        assert!(matches!(ColumnNormalizer::new(&rules), Err(IngestError::Config(_))));

        let rules = vec![NormalizeRule::new("a").strip("p_").rename("x", "p_x")];
        assert!(matches!(ColumnNormalizer::new(&rules), Err(IngestError::Config(_))));
    }

    #[test]
    fn bad_glob_is_a_config_error() {
        let rules = vec![NormalizeRule::new("[unclosed")];
        assert!(matches!(ColumnNormalizer::new(&rules), Err(IngestError::Config(_))));
    }
}
