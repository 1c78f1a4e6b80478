//! Row reconciliation for bulk imports.
//!
//! Each decoded row folds into a [`RowOutcome`] and, when valid, a staged
//! [`MenuChange`]. Staged changes are committed once at the end; a stream
//! or commit failure discards all of them.

use std::collections::HashMap;

use crate::models::{
    CategoryFields, DishFields, EntityKind, ImportRow, ImportSummary, MenuBatch, MenuChange,
    RowOutcome,
};
use crate::services::menu_store::MenuRepository;
use crate::utils::{AppError, Result};
use crate::{log_debug, log_info, log_warn};

pub const COL_ID: &str = "ID";
pub const COL_NAME: &str = "Название";
pub const COL_CATEGORY: &str = "Категория";
pub const COL_DESCRIPTION: &str = "Описание";
pub const COL_PRICE: &str = "Цена";
pub const COL_WEIGHT: &str = "Вес";
pub const COL_CALORIES: &str = "Калории";
pub const COL_AVAILABLE: &str = "В наличии";
pub const COL_ACTIVE: &str = "Активна";
pub const COL_SORT_ORDER: &str = "Порядок сортировки";
pub const COL_SORT_ORDER_SHORT: &str = "Порядок";

pub const DISH_HEADERS: [&str; 9] = [
    COL_ID,
    COL_NAME,
    COL_CATEGORY,
    COL_DESCRIPTION,
    COL_PRICE,
    COL_WEIGHT,
    COL_CALORIES,
    COL_AVAILABLE,
    COL_SORT_ORDER,
];

/// Header row of XLSX exports.
pub const DISH_HEADERS_SHORT: [&str; 9] = [
    COL_ID,
    COL_NAME,
    COL_CATEGORY,
    COL_DESCRIPTION,
    COL_PRICE,
    COL_WEIGHT,
    COL_CALORIES,
    COL_AVAILABLE,
    COL_SORT_ORDER_SHORT,
];

pub const CATEGORY_HEADERS: [&str; 5] = [COL_ID, COL_NAME, COL_DESCRIPTION, COL_ACTIVE, COL_SORT_ORDER];

pub const CATEGORY_HEADERS_SHORT: [&str; 5] =
    [COL_ID, COL_NAME, COL_DESCRIPTION, COL_ACTIVE, COL_SORT_ORDER_SHORT];

pub const DISH_TEMPLATE_ROW: [&str; 9] = [
    "",
    "Пример блюда",
    "Закуски",
    "Описание блюда",
    "500",
    "250 г",
    "350",
    "Да",
    "1",
];

pub const CATEGORY_TEMPLATE_ROW: [&str; 5] = ["", "Пример категории", "Описание категории", "Да", "1"];

const TRUTHY: [&str; 4] = ["да", "yes", "true", "1"];

pub fn bool_to_str(value: bool) -> &'static str {
    if value {
        "Да"
    } else {
        "Нет"
    }
}

pub fn str_to_bool(value: &str) -> bool {
    TRUTHY.contains(&value.trim().to_lowercase().as_str())
}

/// Blank or unparseable gives `None`.
pub fn safe_int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

/// Accepts `,` as the decimal separator. Blank, unparseable or non-finite
/// gives `None`.
pub fn safe_float(value: &str) -> Option<f64> {
    value
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub fn slugify(name: &str) -> String {
    slug::slugify(name)
}

fn optional_text(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// `0` and blank both mean "no id".
fn row_id(row: &ImportRow) -> Option<i64> {
    safe_int(&row.text(COL_ID)).filter(|id| *id != 0)
}

fn row_sort_order(row: &ImportRow) -> i64 {
    let full = row.text(COL_SORT_ORDER);
    let value = if full.is_empty() {
        row.text(COL_SORT_ORDER_SHORT)
    } else {
        full
    };
    safe_int(&value).unwrap_or(0)
}

/// Validates and maps one dish row. `Err` carries the operator-facing
/// message.
pub fn parse_dish_row(
    row: &ImportRow,
    categories: &HashMap<String, i64>,
) -> std::result::Result<(Option<i64>, DishFields), String> {
    let n = row.number;

    let name = row.text(COL_NAME);
    if name.is_empty() {
        return Err(format!("Строка {}: Пустое название", n));
    }

    let category_name = row.text(COL_CATEGORY).to_lowercase();
    let category_id = categories
        .get(&category_name)
        .copied()
        .ok_or_else(|| format!("Строка {}: Категория '{}' не найдена", n, category_name))?;

    let price = safe_float(&row.text(COL_PRICE))
        .filter(|p| *p > 0.0)
        .ok_or_else(|| format!("Строка {}: Некорректная цена", n))?;

    let fields = DishFields {
        category_id,
        slug: slugify(&name),
        name,
        description: optional_text(row.text(COL_DESCRIPTION)),
        price,
        weight: optional_text(row.text(COL_WEIGHT)),
        calories: safe_int(&row.text(COL_CALORIES)),
        is_available: str_to_bool(&row.text(COL_AVAILABLE)),
        sort_order: row_sort_order(row),
    };
    Ok((row_id(row), fields))
}

pub fn parse_category_row(row: &ImportRow) -> std::result::Result<(Option<i64>, CategoryFields), String> {
    let name = row.text(COL_NAME);
    if name.is_empty() {
        return Err(format!("Строка {}: Пустое название", row.number));
    }

    let fields = CategoryFields {
        slug: slugify(&name),
        name,
        description: optional_text(row.text(COL_DESCRIPTION)),
        is_active: str_to_bool(&row.text(COL_ACTIVE)),
        sort_order: row_sort_order(row),
    };
    Ok((row_id(row), fields))
}

/// Message for a failure that voids the whole batch.
pub fn batch_error(error: &AppError) -> String {
    format!("Ошибка чтения файла: {}", error)
}

/// Reconciles decoded rows against `repo` and commits the result.
pub struct ImportService<'a, R: MenuRepository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: MenuRepository + ?Sized> ImportService<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Processes `rows` in order, commits the valid ones in one batch and
    /// returns the counts with one error per rejected row.
    ///
    /// A failed id lookup only rejects its own row. A row stream error or a
    /// commit error discards every staged change: counters drop to zero and
    /// one batch-level error is appended after the row errors gathered so far.
    pub async fn import_rows<I>(&self, rows: I, kind: EntityKind) -> ImportSummary
    where
        I: IntoIterator<Item = Result<ImportRow>>,
    {
        let mut batch = MenuBatch::new();
        let summary = match self.reconcile(rows, kind, &mut batch).await {
            Ok(summary) => summary,
            Err((summary, e)) => return Self::discard(summary, &e),
        };

        if batch.is_empty() {
            return summary;
        }

        match self.repo.commit(batch).await {
            Ok(receipt) => {
                log_info!(
                    entity = kind.as_str(),
                    created = summary.created,
                    updated = summary.updated,
                    errors = summary.errors.len(),
                    applied = receipt.applied,
                    "Import committed"
                );
                summary
            }
            Err(e) => Self::discard(summary, &e),
        }
    }

    async fn reconcile<I>(
        &self,
        rows: I,
        kind: EntityKind,
        batch: &mut MenuBatch,
    ) -> std::result::Result<ImportSummary, (ImportSummary, AppError)>
    where
        I: IntoIterator<Item = Result<ImportRow>>,
    {
        let mut summary = ImportSummary::default();

        let categories = match kind {
            EntityKind::Dish => match self.repo.category_name_index().await {
                Ok(index) => index,
                Err(e) => return Err((summary, e)),
            },
            EntityKind::Category => HashMap::new(),
        };

        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => return Err((summary, e)),
            };

            let (outcome, change) = match kind {
                EntityKind::Dish => self.dish_outcome(&row, &categories).await,
                EntityKind::Category => self.category_outcome(&row).await,
            };

            log_debug!(row = row.number, outcome = ?outcome, "Row reconciled");
            summary = summary.record(&outcome);
            if let Some(change) = change {
                batch.push(change);
            }
        }

        Ok(summary)
    }

    async fn dish_outcome(
        &self,
        row: &ImportRow,
        categories: &HashMap<String, i64>,
    ) -> (RowOutcome, Option<MenuChange>) {
        let (id, fields) = match parse_dish_row(row, categories) {
            Ok(parsed) => parsed,
            Err(reason) => return Self::failed(row, reason),
        };

        match id {
            None => (
                RowOutcome::Created { row: row.number },
                Some(MenuChange::CreateDish(fields)),
            ),
            Some(id) => match self.repo.get_dish(id).await {
                Ok(Some(_)) => (
                    RowOutcome::Updated { row: row.number, id },
                    Some(MenuChange::UpdateDish { id, fields }),
                ),
                Ok(None) => Self::failed(row, format!("Строка {}: Блюдо с ID {} не найдено", row.number, id)),
                Err(e) => Self::failed(row, format!("Строка {}: {}", row.number, e)),
            },
        }
    }

    async fn category_outcome(&self, row: &ImportRow) -> (RowOutcome, Option<MenuChange>) {
        let (id, fields) = match parse_category_row(row) {
            Ok(parsed) => parsed,
            Err(reason) => return Self::failed(row, reason),
        };

        match id {
            None => (
                RowOutcome::Created { row: row.number },
                Some(MenuChange::CreateCategory(fields)),
            ),
            Some(id) => match self.repo.get_category(id).await {
                Ok(Some(_)) => (
                    RowOutcome::Updated { row: row.number, id },
                    Some(MenuChange::UpdateCategory { id, fields }),
                ),
                Ok(None) => Self::failed(row, format!("Строка {}: Категория с ID {} не найдена", row.number, id)),
                Err(e) => Self::failed(row, format!("Строка {}: {}", row.number, e)),
            },
        }
    }

    fn failed(row: &ImportRow, reason: String) -> (RowOutcome, Option<MenuChange>) {
        (
            RowOutcome::Failed {
                row: row.number,
                reason,
            },
            None,
        )
    }

    fn discard(summary: ImportSummary, error: &AppError) -> ImportSummary {
        log_warn!(
            discarded_created = summary.created,
            discarded_updated = summary.updated,
            error = %error,
            "Import batch discarded"
        );
        let mut errors = summary.errors;
        errors.push(batch_error(error));
        ImportSummary {
            created: 0,
            updated: 0,
            errors,
        }
    }
}
