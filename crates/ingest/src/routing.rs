//! File-name → entity routing.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// What happens to a sheet the routing table does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSheetPolicy {
    /// Log and count the sheet as rejected.
    #[default]
    Reject,
    /// Append the sheet to `<stem>__<sheet slug>`.
    Append,
}

impl std::fmt::Display for UnknownSheetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Append => write!(f, "append"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetRoute {
    Entity(String),
    Rejected,
}

/// Sheet → entity table for one multi-sheet file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRoutes {
    stem: String,
    sheets: BTreeMap<String, String>,
    policy: UnknownSheetPolicy,
}

impl SheetRoutes {
    pub fn resolve(&self, sheet: &str) -> SheetRoute {
        match self.sheets.get(sheet) {
            Some(entity) => SheetRoute::Entity(entity.clone()),
            None => match self.policy {
                UnknownSheetPolicy::Reject => SheetRoute::Rejected,
                UnknownSheetPolicy::Append => {
                    SheetRoute::Entity(format!("{}__{}", self.stem, slug(sheet)))
                }
            },
        }
    }

    /// Entity of the first configured sheet (by sheet name), used when a
    /// multi-sheet file arrives as a single record set.
    pub fn first(&self) -> Option<(&str, &str)> {
        self.sheets
            .iter()
            .next()
            .map(|(sheet, entity)| (sheet.as_str(), entity.as_str()))
    }

    pub fn policy(&self) -> UnknownSheetPolicy {
        self.policy
    }

    pub fn sheets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sheets.iter().map(|(s, e)| (s.as_str(), e.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    Direct(String),
    MultiSheet(SheetRoutes),
}

/// Static routing table, immutable once built.
#[derive(Debug, Clone)]
pub struct EntityRouter {
    multi_sheet: BTreeMap<String, BTreeMap<String, String>>,
    policy: UnknownSheetPolicy,
}

impl EntityRouter {
    pub fn new(
        multi_sheet: BTreeMap<String, BTreeMap<String, String>>,
        policy: UnknownSheetPolicy,
    ) -> Self {
        Self {
            multi_sheet,
            policy,
        }
    }

    /// Route a staged file by its stem. Unknown stems route directly to a
    /// table of the same name; this never fails.
    pub fn route(&self, file_name: &str) -> RoutingOutcome {
        let stem = file_stem(file_name);
        match self.multi_sheet.get(&stem) {
            Some(sheets) => RoutingOutcome::MultiSheet(SheetRoutes {
                stem,
                sheets: sheets.clone(),
                policy: self.policy,
            }),
            None => RoutingOutcome::Direct(stem),
        }
    }
}

/// The routing table the pipeline ships with.
pub fn default_multi_sheet() -> BTreeMap<String, BTreeMap<String, String>> {
    let mut table = BTreeMap::new();
    table.insert(
        "department".to_string(),
        BTreeMap::from([("Sheet1".to_string(), "department".to_string())]),
    );
    table.insert(
        "people_in_department_merged".to_string(),
        BTreeMap::from([
            ("Sheet1".to_string(), "employee".to_string()),
            ("Sheet1 (2)".to_string(), "department".to_string()),
        ]),
    );
    table
}

/// File name without directory and last extension.
pub fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// Lowercase table-safe rendering of a sheet name: `Sheet1 (2)` → `sheet1_2`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "sheet".to_string()
    } else {
        trimmed.to_string()
    }
}
