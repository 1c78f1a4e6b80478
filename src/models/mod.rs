use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[cfg(test)]
mod tests;

// ============================================================================
// Menu Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub weight: Option<String>,
    pub calories: Option<i64>,
    pub is_available: bool,
    pub sort_order: i64,
    #[serde(default)]
    pub images: DishImages,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dish {
    pub fn has_image(&self) -> bool {
        self.images.small.is_some()
    }

    /// The importable/editable subset of this dish.
    pub fn fields(&self) -> DishFields {
        DishFields {
            category_id: self.category_id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            price: self.price,
            weight: self.weight.clone(),
            calories: self.calories,
            is_available: self.is_available,
            sort_order: self.sort_order,
        }
    }
}

impl Category {
    pub fn fields(&self) -> CategoryFields {
        CategoryFields {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            sort_order: self.sort_order,
            is_active: self.is_active,
        }
    }
}

/// Fields written by a category create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFields {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub is_active: bool,
}

/// Fields written by a dish create/update. Images are managed separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishFields {
    pub category_id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub weight: Option<String>,
    pub calories: Option<i64>,
    pub is_available: bool,
    pub sort_order: i64,
}

/// Image columns stored on a dish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DishImages {
    pub thumbnail: Option<String>,
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
    pub tiny_base64: Option<String>,
    pub dominant_color: Option<String>,
    pub small_avif: Option<String>,
    pub medium_avif: Option<String>,
    pub large_avif: Option<String>,
}

impl DishImages {
    /// Replaces every column with the matching key of `set`.
    pub fn from_set(set: &DerivativeSet) -> Self {
        let get = |d: Derivative| set.get(d).map(str::to_string);
        Self {
            thumbnail: get(Derivative::Thumbnail),
            small: get(Derivative::Small),
            medium: get(Derivative::Medium),
            large: get(Derivative::Large),
            tiny_base64: get(Derivative::TinyBase64),
            dominant_color: get(Derivative::DominantColor),
            small_avif: get(Derivative::SmallAvif),
            medium_avif: get(Derivative::MediumAvif),
            large_avif: get(Derivative::LargeAvif),
        }
    }

    /// Keeps the primary files and takes placeholder, colour and AVIF
    /// columns from a regenerated set.
    pub fn with_optimization(&self, set: &DerivativeSet) -> Self {
        let regenerated = Self::from_set(set);
        Self {
            thumbnail: self.thumbnail.clone(),
            small: self.small.clone(),
            medium: self.medium.clone(),
            large: self.large.clone(),
            ..regenerated
        }
    }
}

/// One staged write against the menu.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuChange {
    CreateCategory(CategoryFields),
    UpdateCategory { id: i64, fields: CategoryFields },
    DeleteCategory(i64),
    CreateDish(DishFields),
    UpdateDish { id: i64, fields: DishFields },
    SetDishImages { id: i64, images: DishImages },
    DeleteDish(i64),
}

/// Changes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MenuBatch {
    changes: Vec<MenuChange>,
}

impl MenuBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: MenuChange) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[MenuChange] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<MenuChange> {
        self.changes
    }
}

impl From<Vec<MenuChange>> for MenuBatch {
    fn from(changes: Vec<MenuChange>) -> Self {
        Self { changes }
    }
}

/// Ids assigned by a commit, in the order the creates were staged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub created_ids: Vec<i64>,
    pub applied: usize,
}

// ============================================================================
// Image Derivatives
// ============================================================================

/// One uploaded image, consumed once by the derivative generator.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivative {
    TinyBase64,
    Thumbnail,
    Small,
    Medium,
    Large,
    SmallAvif,
    MediumAvif,
    LargeAvif,
    DominantColor,
}

impl Derivative {
    pub fn key(self) -> &'static str {
        match self {
            Derivative::TinyBase64 => "tiny_base64",
            Derivative::Thumbnail => "thumbnail",
            Derivative::Small => "small",
            Derivative::Medium => "medium",
            Derivative::Large => "large",
            Derivative::SmallAvif => "small_avif",
            Derivative::MediumAvif => "medium_avif",
            Derivative::LargeAvif => "large_avif",
            Derivative::DominantColor => "dominant_color",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "tiny_base64" => Some(Derivative::TinyBase64),
            "thumbnail" => Some(Derivative::Thumbnail),
            "small" => Some(Derivative::Small),
            "medium" => Some(Derivative::Medium),
            "large" => Some(Derivative::Large),
            "small_avif" => Some(Derivative::SmallAvif),
            "medium_avif" => Some(Derivative::MediumAvif),
            "large_avif" => Some(Derivative::LargeAvif),
            "dominant_color" => Some(Derivative::DominantColor),
            _ => None,
        }
    }

    /// File extension, `None` for inline values.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Derivative::Thumbnail | Derivative::Small | Derivative::Medium | Derivative::Large => {
                Some("webp")
            }
            Derivative::SmallAvif | Derivative::MediumAvif | Derivative::LargeAvif => Some("avif"),
            Derivative::TinyBase64 | Derivative::DominantColor => None,
        }
    }

    /// File name prefix: `small_avif` files are named `small_{version}.avif`.
    pub fn file_stem(self) -> &'static str {
        match self {
            Derivative::SmallAvif => "small",
            Derivative::MediumAvif => "medium",
            Derivative::LargeAvif => "large",
            other => other.key(),
        }
    }

    pub fn avif_counterpart(self) -> Option<Derivative> {
        match self {
            Derivative::Small => Some(Derivative::SmallAvif),
            Derivative::Medium => Some(Derivative::MediumAvif),
            Derivative::Large => Some(Derivative::LargeAvif),
            _ => None,
        }
    }
}

impl fmt::Display for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Name → value mapping produced by the derivative generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivativeSet {
    entries: BTreeMap<Derivative, String>,
}

impl DerivativeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, derivative: Derivative, value: impl Into<String>) {
        self.entries.insert(derivative, value.into());
    }

    pub fn get(&self, derivative: Derivative) -> Option<&str> {
        self.entries.get(&derivative).map(String::as_str)
    }

    pub fn contains(&self, derivative: Derivative) -> bool {
        self.entries.contains_key(&derivative)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Derivative, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Flat `key → value` map for callers that copy known keys onto records.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.key().to_string(), v.clone()))
            .collect()
    }
}

// ============================================================================
// Tabular Data
// ============================================================================

/// A raw spreadsheet scalar, passed through undecoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => {
                write!(f, "{}", *v as i64)
            }
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Float(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Empty)
    }
}

/// One decoded data row. `number` counts the header as row 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub number: usize,
    pub cells: HashMap<String, CellValue>,
}

impl ImportRow {
    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells.get(header)
    }

    /// Cell as trimmed text; absent and empty cells give `""`.
    pub fn text(&self, header: &str) -> String {
        self.get(header)
            .map(|v| v.to_string().trim().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Dish,
    Category,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Dish => "dish",
            EntityKind::Category => "category",
        }
    }

    /// Plural used in export file names.
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Dish => "dishes",
            EntityKind::Category => "categories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabularFormat {
    Csv,
    Xlsx,
}

impl TabularFormat {
    /// Picks the codec from an uploaded file name.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".xlsx") {
            Some(TabularFormat::Xlsx)
        } else if lower.ends_with(".csv") {
            Some(TabularFormat::Csv)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TabularFormat::Csv => "csv",
            TabularFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TabularFormat::Csv => "text/csv; charset=utf-8",
            TabularFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

// ============================================================================
// Import Results
// ============================================================================

/// What happened to one import row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Created { row: usize },
    Updated { row: usize, id: i64 },
    Failed { row: usize, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    pub fn record(mut self, outcome: &RowOutcome) -> Self {
        match outcome {
            RowOutcome::Created { .. } => self.created += 1,
            RowOutcome::Updated { .. } => self.updated += 1,
            RowOutcome::Failed { reason, .. } => self.errors.push(reason.clone()),
        }
        self
    }
}

/// Import result as shown to an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

/// A downloadable export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}
