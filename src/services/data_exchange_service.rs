use std::collections::HashMap;
use std::sync::Arc;

use crate::log_info;
use crate::models::{Category, CellValue, Dish, EntityKind, ImportSummary, TabularFormat};
use crate::services::import_service::{
    self, bool_to_str, ImportService, CATEGORY_HEADERS, CATEGORY_HEADERS_SHORT,
    CATEGORY_TEMPLATE_ROW, DISH_HEADERS, DISH_HEADERS_SHORT, DISH_TEMPLATE_ROW,
};
use crate::services::menu_store::MenuRepository;
use crate::services::tabular;
use crate::utils::Result;

pub const DISHES_SHEET_TITLE: &str = "Блюда";
pub const CATEGORIES_SHEET_TITLE: &str = "Категории";

/// Export, template and import entry points over a menu repository.
pub struct DataExchangeService<R: MenuRepository + ?Sized> {
    repo: Arc<R>,
}

impl<R: MenuRepository + ?Sized> DataExchangeService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    fn dish_to_row(dish: &Dish, category_names: &HashMap<i64, String>) -> Vec<CellValue> {
        vec![
            CellValue::Int(dish.id),
            dish.name.as_str().into(),
            category_names
                .get(&dish.category_id)
                .cloned()
                .unwrap_or_default()
                .into(),
            dish.description.clone().unwrap_or_default().into(),
            CellValue::Float(dish.price),
            dish.weight.clone().unwrap_or_default().into(),
            dish.calories.into(),
            bool_to_str(dish.is_available).into(),
            CellValue::Int(dish.sort_order),
        ]
    }

    fn category_to_row(category: &Category) -> Vec<CellValue> {
        vec![
            CellValue::Int(category.id),
            category.name.as_str().into(),
            category.description.clone().unwrap_or_default().into(),
            bool_to_str(category.is_active).into(),
            CellValue::Int(category.sort_order),
        ]
    }

    async fn dish_rows(&self) -> Result<Vec<Vec<CellValue>>> {
        let category_names: HashMap<i64, String> = self
            .repo
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        Ok(self
            .repo
            .list_dishes()
            .await?
            .iter()
            .map(|d| Self::dish_to_row(d, &category_names))
            .collect())
    }

    async fn category_rows(&self) -> Result<Vec<Vec<CellValue>>> {
        Ok(self
            .repo
            .list_categories()
            .await?
            .iter()
            .map(Self::category_to_row)
            .collect())
    }

    // ==================== EXPORT ====================

    pub async fn export_dishes_csv(&self) -> Result<Vec<u8>> {
        let rows = self.dish_rows().await?;
        log_info!(entity = "dish", rows = rows.len(), format = "csv", "Exporting");
        tabular::encode_csv_with_bom(&DISH_HEADERS, &rows)
    }

    pub async fn export_dishes_xlsx(&self) -> Result<Vec<u8>> {
        let rows = self.dish_rows().await?;
        log_info!(entity = "dish", rows = rows.len(), format = "xlsx", "Exporting");
        tabular::encode_xlsx(DISHES_SHEET_TITLE, &DISH_HEADERS_SHORT, &rows)
    }

    pub async fn export_categories_csv(&self) -> Result<Vec<u8>> {
        let rows = self.category_rows().await?;
        log_info!(entity = "category", rows = rows.len(), format = "csv", "Exporting");
        tabular::encode_csv_with_bom(&CATEGORY_HEADERS, &rows)
    }

    pub async fn export_categories_xlsx(&self) -> Result<Vec<u8>> {
        let rows = self.category_rows().await?;
        log_info!(entity = "category", rows = rows.len(), format = "xlsx", "Exporting");
        tabular::encode_xlsx(CATEGORIES_SHEET_TITLE, &CATEGORY_HEADERS_SHORT, &rows)
    }

    pub async fn export(&self, kind: EntityKind, format: TabularFormat) -> Result<Vec<u8>> {
        match (kind, format) {
            (EntityKind::Dish, TabularFormat::Csv) => self.export_dishes_csv().await,
            (EntityKind::Dish, TabularFormat::Xlsx) => self.export_dishes_xlsx().await,
            (EntityKind::Category, TabularFormat::Csv) => self.export_categories_csv().await,
            (EntityKind::Category, TabularFormat::Xlsx) => self.export_categories_xlsx().await,
        }
    }

    // ==================== TEMPLATES ====================

    pub fn dishes_template_csv(&self) -> Result<Vec<u8>> {
        tabular::csv_template(&DISH_HEADERS, &DISH_TEMPLATE_ROW)
    }

    pub fn categories_template_csv(&self) -> Result<Vec<u8>> {
        tabular::csv_template(&CATEGORY_HEADERS, &CATEGORY_TEMPLATE_ROW)
    }

    pub fn template_csv(&self, kind: EntityKind) -> Result<Vec<u8>> {
        match kind {
            EntityKind::Dish => self.dishes_template_csv(),
            EntityKind::Category => self.categories_template_csv(),
        }
    }

    // ==================== IMPORT ====================

    pub async fn import_dishes_csv(&self, content: Vec<u8>) -> ImportSummary {
        self.import(EntityKind::Dish, TabularFormat::Csv, content).await
    }

    pub async fn import_dishes_xlsx(&self, content: Vec<u8>) -> ImportSummary {
        self.import(EntityKind::Dish, TabularFormat::Xlsx, content).await
    }

    pub async fn import_categories_csv(&self, content: Vec<u8>) -> ImportSummary {
        self.import(EntityKind::Category, TabularFormat::Csv, content).await
    }

    pub async fn import_categories_xlsx(&self, content: Vec<u8>) -> ImportSummary {
        self.import(EntityKind::Category, TabularFormat::Xlsx, content).await
    }

    /// Decodes and reconciles `content`. An unreadable file becomes the
    /// single batch-level error of the summary.
    pub async fn import(
        &self,
        kind: EntityKind,
        format: TabularFormat,
        content: Vec<u8>,
    ) -> ImportSummary {
        let rows = match tabular::decode(format, content) {
            Ok(rows) => rows,
            Err(e) => {
                return ImportSummary {
                    errors: vec![import_service::batch_error(&e)],
                    ..ImportSummary::default()
                }
            }
        };

        ImportService::new(self.repo.as_ref())
            .import_rows(rows, kind)
            .await
    }
}
