use std::str::FromStr;

use serde::Deserialize;

use crate::error::BehaviorError;

/// Encoding used to store a hierarchy.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeStrategyKind {
    #[default]
    Nested,
    Closure,
    MaterializedPath,
}

impl FromStr for TreeStrategyKind {
    type Err = BehaviorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "nested" => Ok(Self::Nested),
            "closure" => Ok(Self::Closure),
            "materializedPath" | "materialized_path" => Ok(Self::MaterializedPath),
            other => Err(BehaviorError::configuration(format!(
                "unknown tree strategy `{other}`"
            ))),
        }
    }
}

/// Static configuration describing how a model is kept as a tree.
///
/// Only the columns of the selected strategy are used; the others keep their
/// defaults.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    strategy: TreeStrategyKind,
    parent_column: String,
    level_column: Option<String>,
    level_base: i64,
    left_column: String,
    right_column: String,
    root_column: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: String,
    descendant_column: String,
    generations_column: String,
    path_column: String,
    path_source_column: Option<String>,
    path_separator: String,
    path_append_id: Option<bool>,
    path_starts_with_separator: bool,
    path_ends_with_separator: bool,
    lock_time_column: Option<String>,
    lock_timeout_secs: i64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(TreeStrategyKind::default())
    }
}

impl TreeConfig {
    pub fn new(strategy: TreeStrategyKind) -> Self {
        Self {
            strategy,
            parent_column: "parent_id".to_string(),
            level_column: Some("lvl".to_string()),
            level_base: 0,
            left_column: "lft".to_string(),
            right_column: "rgt".to_string(),
            root_column: None,
            hierarchy_table: None,
            ancestor_column: "ancestor_id".to_string(),
            descendant_column: "descendant_id".to_string(),
            generations_column: "generations".to_string(),
            path_column: "path".to_string(),
            path_source_column: None,
            path_separator: ",".to_string(),
            path_append_id: None,
            path_starts_with_separator: false,
            path_ends_with_separator: true,
            lock_time_column: None,
            lock_timeout_secs: 3,
        }
    }

    pub fn nested() -> Self {
        Self::new(TreeStrategyKind::Nested)
    }

    pub fn closure() -> Self {
        Self::new(TreeStrategyKind::Closure)
    }

    pub fn materialized_path() -> Self {
        Self::new(TreeStrategyKind::MaterializedPath)
    }

    /// Merge options produced by [`TreeOptions`].
    pub(crate) fn apply_options(mut self, options: TreeOptions) -> Self {
        if let Some(value) = options.parent_column {
            self.parent_column = value;
        }
        if let Some(value) = options.level_column {
            self.level_column = value;
        }
        if let Some(value) = options.level_base {
            self.level_base = value;
        }
        if let Some(value) = options.left_column {
            self.left_column = value;
        }
        if let Some(value) = options.right_column {
            self.right_column = value;
        }
        if let Some(value) = options.root_column {
            self.root_column = value;
        }
        if let Some(value) = options.hierarchy_table {
            self.hierarchy_table = Some(value);
        }
        if let Some(value) = options.ancestor_column {
            self.ancestor_column = value;
        }
        if let Some(value) = options.descendant_column {
            self.descendant_column = value;
        }
        if let Some(value) = options.generations_column {
            self.generations_column = value;
        }
        if let Some(value) = options.path_column {
            self.path_column = value;
        }
        if let Some(value) = options.path_source_column {
            self.path_source_column = Some(value);
        }
        if let Some(value) = options.path_separator {
            self.path_separator = value;
        }
        if let Some(value) = options.path_append_id {
            self.path_append_id = Some(value);
        }
        if let Some(value) = options.path_starts_with_separator {
            self.path_starts_with_separator = value;
        }
        if let Some(value) = options.path_ends_with_separator {
            self.path_ends_with_separator = value;
        }
        if let Some(value) = options.lock_time_column {
            self.lock_time_column = value;
        }
        if let Some(value) = options.lock_timeout_secs {
            self.lock_timeout_secs = value;
        }
        self
    }

    pub fn strategy(&self) -> TreeStrategyKind {
        self.strategy
    }

    /// Column storing the parent identifier.
    pub fn parent_column(&self) -> &str {
        &self.parent_column
    }

    pub fn level_column(&self) -> Option<&str> {
        self.level_column.as_deref()
    }

    /// Level assigned to root nodes.
    pub fn level_base(&self) -> i64 {
        self.level_base
    }

    pub fn left_column(&self) -> &str {
        &self.left_column
    }

    pub fn right_column(&self) -> &str {
        &self.right_column
    }

    /// Column holding the owning tree when several trees share a collection.
    pub fn root_column(&self) -> Option<&str> {
        self.root_column.as_deref()
    }

    /// Table of ancestor/descendant rows; defaults to `<collection>_hierarchies`.
    pub fn hierarchy_table(&self, collection: &str) -> String {
        self.hierarchy_table
            .clone()
            .unwrap_or_else(|| format!("{collection}_hierarchies"))
    }

    pub fn ancestor_column(&self) -> &str {
        &self.ancestor_column
    }

    pub fn descendant_column(&self) -> &str {
        &self.descendant_column
    }

    pub fn generations_column(&self) -> &str {
        &self.generations_column
    }

    pub fn path_column(&self) -> &str {
        &self.path_column
    }

    /// Column whose value names a node inside its path; defaults to the identifier.
    pub fn path_source_column(&self) -> Option<&str> {
        self.path_source_column.as_deref()
    }

    pub fn path_separator(&self) -> &str {
        &self.path_separator
    }

    pub fn path_append_id(&self) -> Option<bool> {
        self.path_append_id
    }

    pub fn path_starts_with_separator(&self) -> bool {
        self.path_starts_with_separator
    }

    pub fn path_ends_with_separator(&self) -> bool {
        self.path_ends_with_separator
    }

    /// Column on the tree root recording when the tree was locked.
    pub fn lock_time_column(&self) -> Option<&str> {
        self.lock_time_column.as_deref()
    }

    pub fn lock_timeout_secs(&self) -> i64 {
        self.lock_timeout_secs
    }
}

/// Builder-style options merged into a [`TreeConfig`].
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    parent_column: Option<String>,
    level_column: Option<Option<String>>,
    level_base: Option<i64>,
    left_column: Option<String>,
    right_column: Option<String>,
    root_column: Option<Option<String>>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    path_column: Option<String>,
    path_source_column: Option<String>,
    path_separator: Option<String>,
    path_append_id: Option<bool>,
    path_starts_with_separator: Option<bool>,
    path_ends_with_separator: Option<bool>,
    lock_time_column: Option<Option<String>>,
    lock_timeout_secs: Option<i64>,
}

impl TreeOptions {
    pub fn parent_column(mut self, value: impl Into<String>) -> Self {
        self.parent_column = Some(value.into());
        self
    }

    pub fn level_column(mut self, value: impl Into<String>) -> Self {
        self.level_column = Some(Some(value.into()));
        self
    }

    pub fn without_level(mut self) -> Self {
        self.level_column = Some(None);
        self
    }

    pub fn level_base(mut self, value: i64) -> Self {
        self.level_base = Some(value);
        self
    }

    pub fn left_column(mut self, value: impl Into<String>) -> Self {
        self.left_column = Some(value.into());
        self
    }

    pub fn right_column(mut self, value: impl Into<String>) -> Self {
        self.right_column = Some(value.into());
        self
    }

    pub fn root_column(mut self, value: impl Into<String>) -> Self {
        self.root_column = Some(Some(value.into()));
        self
    }

    pub fn hierarchy_table(mut self, value: impl Into<String>) -> Self {
        self.hierarchy_table = Some(value.into());
        self
    }

    pub fn ancestor_column(mut self, value: impl Into<String>) -> Self {
        self.ancestor_column = Some(value.into());
        self
    }

    pub fn descendant_column(mut self, value: impl Into<String>) -> Self {
        self.descendant_column = Some(value.into());
        self
    }

    pub fn generations_column(mut self, value: impl Into<String>) -> Self {
        self.generations_column = Some(value.into());
        self
    }

    pub fn path_column(mut self, value: impl Into<String>) -> Self {
        self.path_column = Some(value.into());
        self
    }

    pub fn path_source_column(mut self, value: impl Into<String>) -> Self {
        self.path_source_column = Some(value.into());
        self
    }

    pub fn path_separator(mut self, value: impl Into<String>) -> Self {
        self.path_separator = Some(value.into());
        self
    }

    pub fn path_append_id(mut self, value: bool) -> Self {
        self.path_append_id = Some(value);
        self
    }

    pub fn path_starts_with_separator(mut self, value: bool) -> Self {
        self.path_starts_with_separator = Some(value);
        self
    }

    pub fn path_ends_with_separator(mut self, value: bool) -> Self {
        self.path_ends_with_separator = Some(value);
        self
    }

    pub fn lock_time_column(mut self, value: impl Into<String>) -> Self {
        self.lock_time_column = Some(Some(value.into()));
        self
    }

    pub fn lock_timeout_secs(mut self, value: i64) -> Self {
        self.lock_timeout_secs = Some(value);
        self
    }

    pub fn apply(self, base: TreeConfig) -> TreeConfig {
        base.apply_options(self)
    }
}

/// Static configuration of a sortable model.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SortableConfig {
    position_column: String,
    group_columns: Vec<String>,
}

impl Default for SortableConfig {
    fn default() -> Self {
        Self {
            position_column: "position".to_string(),
            group_columns: Vec::new(),
        }
    }
}

impl SortableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn apply_options(mut self, options: SortableOptions) -> Self {
        if let Some(value) = options.position_column {
            self.position_column = value;
        }
        self.group_columns.extend(options.group_columns);
        self
    }

    pub fn position_column(&self) -> &str {
        &self.position_column
    }

    /// Columns partitioning the ordering space.
    pub fn group_columns(&self) -> &[String] {
        &self.group_columns
    }
}

#[derive(Clone, Debug, Default)]
pub struct SortableOptions {
    position_column: Option<String>,
    group_columns: Vec<String>,
}

impl SortableOptions {
    pub fn position_column(mut self, value: impl Into<String>) -> Self {
        self.position_column = Some(value.into());
        self
    }

    pub fn group_column(mut self, value: impl Into<String>) -> Self {
        self.group_columns.push(value.into());
        self
    }

    pub fn apply(self, base: SortableConfig) -> SortableConfig {
        base.apply_options(self)
    }
}

/// Letter case applied to a generated slug.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlugStyle {
    #[default]
    Default,
    Camel,
    Lower,
    Upper,
}

impl FromStr for SlugStyle {
    type Err = BehaviorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "default" => Ok(Self::Default),
            "camel" => Ok(Self::Camel),
            "lower" => Ok(Self::Lower),
            "upper" => Ok(Self::Upper),
            other => Err(BehaviorError::configuration(format!(
                "unknown slug style `{other}`"
            ))),
        }
    }
}

/// Static configuration of a sluggable model.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SluggableConfig {
    slug_column: String,
    source_columns: Vec<String>,
    separator: String,
    style: SlugStyle,
    unique: bool,
    unique_base: Option<String>,
    prefix: String,
    suffix: String,
    updatable: bool,
    max_length: Option<usize>,
    nullable: bool,
}

impl Default for SluggableConfig {
    fn default() -> Self {
        Self {
            slug_column: "slug".to_string(),
            source_columns: Vec::new(),
            separator: "-".to_string(),
            style: SlugStyle::Default,
            unique: true,
            unique_base: None,
            prefix: String::new(),
            suffix: String::new(),
            updatable: true,
            max_length: Some(255),
            nullable: false,
        }
    }
}

impl SluggableConfig {
    pub fn new<I, S>(source_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_columns: source_columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn apply_options(mut self, options: SluggableOptions) -> Self {
        if let Some(value) = options.slug_column {
            self.slug_column = value;
        }
        if let Some(value) = options.separator {
            self.separator = value;
        }
        if let Some(value) = options.style {
            self.style = value;
        }
        if let Some(value) = options.unique {
            self.unique = value;
        }
        if let Some(value) = options.unique_base {
            self.unique_base = Some(value);
        }
        if let Some(value) = options.prefix {
            self.prefix = value;
        }
        if let Some(value) = options.suffix {
            self.suffix = value;
        }
        if let Some(value) = options.updatable {
            self.updatable = value;
        }
        if let Some(value) = options.max_length {
            self.max_length = value;
        }
        if let Some(value) = options.nullable {
            self.nullable = value;
        }
        self
    }

    pub fn slug_column(&self) -> &str {
        &self.slug_column
    }

    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn style(&self) -> SlugStyle {
        self.style
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    /// Column scoping uniqueness; slugs only collide within equal values.
    pub fn unique_base(&self) -> Option<&str> {
        self.unique_base.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether updates to source columns regenerate the slug.
    pub fn updatable(&self) -> bool {
        self.updatable
    }

    /// Length limit of the slug column, in characters.
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }
}

#[derive(Clone, Debug, Default)]
pub struct SluggableOptions {
    slug_column: Option<String>,
    separator: Option<String>,
    style: Option<SlugStyle>,
    unique: Option<bool>,
    unique_base: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
    updatable: Option<bool>,
    max_length: Option<Option<usize>>,
    nullable: Option<bool>,
}

impl SluggableOptions {
    pub fn slug_column(mut self, value: impl Into<String>) -> Self {
        self.slug_column = Some(value.into());
        self
    }

    pub fn separator(mut self, value: impl Into<String>) -> Self {
        self.separator = Some(value.into());
        self
    }

    pub fn style(mut self, style: SlugStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = Some(value);
        self
    }

    pub fn unique_base(mut self, value: impl Into<String>) -> Self {
        self.unique_base = Some(value.into());
        self
    }

    pub fn prefix(mut self, value: impl Into<String>) -> Self {
        self.prefix = Some(value.into());
        self
    }

    pub fn suffix(mut self, value: impl Into<String>) -> Self {
        self.suffix = Some(value.into());
        self
    }

    pub fn updatable(mut self, value: bool) -> Self {
        self.updatable = Some(value);
        self
    }

    pub fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(Some(value));
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_length = Some(None);
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = Some(value);
        self
    }

    pub fn apply(self, base: SluggableConfig) -> SluggableConfig {
        base.apply_options(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selector_accepts_mapping_names() {
        assert_eq!(
            "materializedPath".parse::<TreeStrategyKind>().unwrap(),
            TreeStrategyKind::MaterializedPath
        );
        assert!("adjacency".parse::<TreeStrategyKind>().is_err());
    }

    #[test]
    fn tree_config_reads_from_mapping_documents() {
        let config: TreeConfig = serde_json::from_value(serde_json::json!({
            "strategy": "nested",
            "root_column": "tree_root",
            "level_base": 1
        }))
        .unwrap();
        assert_eq!(config.root_column(), Some("tree_root"));
        assert_eq!(config.level_base(), 1);
        assert_eq!(config.left_column(), "lft");
    }

    #[test]
    fn options_override_defaults() {
        let config = SluggableOptions::default()
            .separator("_")
            .max_length(32)
            .apply(SluggableConfig::new(["title"]));
        assert_eq!(config.separator(), "_");
        assert_eq!(config.max_length(), Some(32));
        assert_eq!(config.source_columns(), ["title".to_string()]);
    }
}
