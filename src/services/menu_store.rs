use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::models::{
    Category, CategoryFields, CommitReceipt, Dish, DishFields, MenuBatch, MenuChange,
};
use crate::utils::{AppError, Result};
use crate::{log_debug, log_info, log_warn};

const MENU_FILE_NAME: &str = "menu.json";

/// Persistence seam for categories and dishes.
#[async_trait]
pub trait MenuRepository: Send + Sync {
    /// Ordered by sort order.
    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Ordered by category id, then sort order.
    async fn list_dishes(&self) -> Result<Vec<Dish>>;

    async fn get_category(&self, id: i64) -> Result<Option<Category>>;

    async fn get_dish(&self, id: i64) -> Result<Option<Dish>>;

    /// Lowercased category name to id.
    async fn category_name_index(&self) -> Result<HashMap<String, i64>> {
        Ok(self
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect())
    }

    /// Applies every change of `batch` or none of them.
    async fn commit(&self, batch: MenuBatch) -> Result<CommitReceipt>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuData {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub dishes: Vec<Dish>,
}

impl MenuData {
    fn next_category_id(&self) -> i64 {
        self.categories.iter().map(|c| c.id).max().unwrap_or(0) + 1
    }

    fn next_dish_id(&self) -> i64 {
        self.dishes.iter().map(|d| d.id).max().unwrap_or(0) + 1
    }

    fn check_category_slug(&self, slug: &str, own_id: Option<i64>) -> Result<()> {
        if self
            .categories
            .iter()
            .any(|c| c.slug == slug && Some(c.id) != own_id)
        {
            return Err(AppError::Commit(format!(
                "Category slug '{}' is already taken",
                slug
            )));
        }
        Ok(())
    }

    fn check_dish(&self, fields: &DishFields, own_id: Option<i64>) -> Result<()> {
        if !self.categories.iter().any(|c| c.id == fields.category_id) {
            return Err(AppError::Commit(format!(
                "Category {} does not exist",
                fields.category_id
            )));
        }
        if self
            .dishes
            .iter()
            .any(|d| d.slug == fields.slug && Some(d.id) != own_id)
        {
            return Err(AppError::Commit(format!(
                "Dish slug '{}' is already taken",
                fields.slug
            )));
        }
        Ok(())
    }

    fn category_mut(&mut self, id: i64) -> Result<&mut Category> {
        self.categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::Commit(format!("Category {} not found", id)))
    }

    fn dish_mut(&mut self, id: i64) -> Result<&mut Dish> {
        self.dishes
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::Commit(format!("Dish {} not found", id)))
    }

    /// Applies one change in place, returning the id of a created entity.
    fn apply(&mut self, change: MenuChange) -> Result<Option<i64>> {
        let now = Utc::now();
        match change {
            MenuChange::CreateCategory(fields) => {
                self.check_category_slug(&fields.slug, None)?;
                let id = self.next_category_id();
                self.categories.push(new_category(id, fields));
                Ok(Some(id))
            }
            MenuChange::UpdateCategory { id, fields } => {
                self.check_category_slug(&fields.slug, Some(id))?;
                let category = self.category_mut(id)?;
                category.name = fields.name;
                category.slug = fields.slug;
                category.description = fields.description;
                category.sort_order = fields.sort_order;
                category.is_active = fields.is_active;
                category.updated_at = now;
                Ok(None)
            }
            MenuChange::DeleteCategory(id) => {
                if self.dishes.iter().any(|d| d.category_id == id) {
                    return Err(AppError::Commit(format!(
                        "Category {} still has dishes",
                        id
                    )));
                }
                self.category_mut(id)?;
                self.categories.retain(|c| c.id != id);
                Ok(None)
            }
            MenuChange::CreateDish(fields) => {
                self.check_dish(&fields, None)?;
                let id = self.next_dish_id();
                self.dishes.push(new_dish(id, fields));
                Ok(Some(id))
            }
            MenuChange::UpdateDish { id, fields } => {
                self.check_dish(&fields, Some(id))?;
                let dish = self.dish_mut(id)?;
                dish.category_id = fields.category_id;
                dish.name = fields.name;
                dish.slug = fields.slug;
                dish.description = fields.description;
                dish.price = fields.price;
                dish.weight = fields.weight;
                dish.calories = fields.calories;
                dish.is_available = fields.is_available;
                dish.sort_order = fields.sort_order;
                dish.updated_at = now;
                Ok(None)
            }
            MenuChange::SetDishImages { id, images } => {
                let dish = self.dish_mut(id)?;
                dish.images = images;
                dish.updated_at = now;
                Ok(None)
            }
            MenuChange::DeleteDish(id) => {
                self.dish_mut(id)?;
                self.dishes.retain(|d| d.id != id);
                Ok(None)
            }
        }
    }
}

fn new_category(id: i64, fields: CategoryFields) -> Category {
    let now = Utc::now();
    Category {
        id,
        name: fields.name,
        slug: fields.slug,
        description: fields.description,
        sort_order: fields.sort_order,
        is_active: fields.is_active,
        created_at: now,
        updated_at: now,
    }
}

fn new_dish(id: i64, fields: DishFields) -> Dish {
    let now = Utc::now();
    Dish {
        id,
        category_id: fields.category_id,
        name: fields.name,
        slug: fields.slug,
        description: fields.description,
        price: fields.price,
        weight: fields.weight,
        calories: fields.calories,
        is_available: fields.is_available,
        sort_order: fields.sort_order,
        images: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

/// `menu.json` backed repository. Commits apply to a copy and only replace
/// the file once every change succeeded.
pub struct JsonMenuStore {
    menu_file: PathBuf,
    lock: Mutex<()>,
}

impl JsonMenuStore {
    pub fn new_with_dir(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| AppError::FileSystem(format!("Failed to create data directory: {}", e)))?;

        Ok(Self {
            menu_file: data_dir.join(MENU_FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    pub fn menu_file(&self) -> &PathBuf {
        &self.menu_file
    }

    async fn load(&self) -> Result<MenuData> {
        if !self.menu_file.exists() {
            return Ok(MenuData::default());
        }

        let content = tokio::fs::read_to_string(&self.menu_file)
            .await
            .map_err(|e| AppError::FileSystem(format!("Failed to read menu file: {}", e)))?;
        let data: MenuData = serde_json::from_str(&content).map_err(AppError::Serialization)?;
        Ok(data)
    }

    async fn save(&self, data: &MenuData) -> Result<()> {
        let content = serde_json::to_string_pretty(data).map_err(AppError::Serialization)?;

        // Write next to the target and rename so readers never see half a file
        let tmp = self.menu_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| AppError::FileSystem(format!("Failed to write menu file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.menu_file)
            .await
            .map_err(|e| AppError::FileSystem(format!("Failed to replace menu file: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MenuRepository for JsonMenuStore {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories = self.load().await?.categories;
        categories.sort_by_key(|c| (c.sort_order, c.id));
        Ok(categories)
    }

    async fn list_dishes(&self) -> Result<Vec<Dish>> {
        let mut dishes = self.load().await?.dishes;
        dishes.sort_by_key(|d| (d.category_id, d.sort_order, d.id));
        Ok(dishes)
    }

    async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        Ok(self.load().await?.categories.into_iter().find(|c| c.id == id))
    }

    async fn get_dish(&self, id: i64) -> Result<Option<Dish>> {
        Ok(self.load().await?.dishes.into_iter().find(|d| d.id == id))
    }

    async fn commit(&self, batch: MenuBatch) -> Result<CommitReceipt> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        let mut receipt = CommitReceipt::default();

        for change in batch.into_changes() {
            match data.apply(change) {
                Ok(created) => {
                    receipt.created_ids.extend(created);
                    receipt.applied += 1;
                }
                Err(e) => {
                    log_warn!(applied = receipt.applied, error = %e, "Menu commit rejected");
                    return Err(e);
                }
            }
        }

        if receipt.applied == 0 {
            log_debug!("Empty menu batch, nothing written");
            return Ok(receipt);
        }

        self.save(&data).await?;
        log_info!(
            applied = receipt.applied,
            created = receipt.created_ids.len(),
            "Menu batch committed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DishImages;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonMenuStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonMenuStore::new_with_dir(temp_dir.path().join("data")).unwrap();
        (store, temp_dir)
    }

    fn category_fields(name: &str, slug: &str, sort_order: i64) -> CategoryFields {
        CategoryFields {
            name: name.to_string(),
            slug: slug.to_string(),
            description: None,
            sort_order,
            is_active: true,
        }
    }

    fn dish_fields(category_id: i64, name: &str, slug: &str, sort_order: i64) -> DishFields {
        DishFields {
            category_id,
            name: name.to_string(),
            slug: slug.to_string(),
            description: None,
            price: 100.0,
            weight: None,
            calories: None,
            is_available: true,
            sort_order,
        }
    }

    #[tokio::test]
    async fn test_commit_assigns_ids_in_order() {
        let (store, _temp_dir) = create_test_store();

        let receipt = store
            .commit(MenuBatch::from(vec![
                MenuChange::CreateCategory(category_fields("Супы", "supy", 2)),
                MenuChange::CreateCategory(category_fields("Салаты", "salaty", 1)),
            ]))
            .await
            .unwrap();
        assert_eq!(receipt.created_ids, vec![1, 2]);
        assert_eq!(receipt.applied, 2);

        let names: Vec<_> = store
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Салаты", "Супы"]);

        let index = store.category_name_index().await.unwrap();
        assert_eq!(index.get("супы"), Some(&1));
        assert!(index.get("Супы").is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_changes_nothing() {
        let (store, _temp_dir) = create_test_store();
        store
            .commit(MenuBatch::from(vec![MenuChange::CreateCategory(
                category_fields("Супы", "supy", 1),
            )]))
            .await
            .unwrap();

        let result = store
            .commit(MenuBatch::from(vec![
                MenuChange::CreateDish(dish_fields(1, "Борщ", "borshch", 1)),
                MenuChange::CreateDish(dish_fields(1, "Борщ", "borshch", 2)),
            ]))
            .await;
        assert!(matches!(result, Err(AppError::Commit(_))));
        assert!(store.list_dishes().await.unwrap().is_empty());

        let result = store
            .commit(MenuBatch::from(vec![MenuChange::CreateDish(dish_fields(
                9, "Щи", "shchi", 1,
            ))]))
            .await;
        assert!(matches!(result, Err(AppError::Commit(_))));
    }

    #[tokio::test]
    async fn test_update_and_images() {
        let (store, _temp_dir) = create_test_store();
        store
            .commit(MenuBatch::from(vec![
                MenuChange::CreateCategory(category_fields("Супы", "supy", 1)),
                MenuChange::CreateDish(dish_fields(1, "Борщ", "borshch", 1)),
            ]))
            .await
            .unwrap();
        let created = store.get_dish(1).await.unwrap().unwrap();

        let mut fields = created.fields();
        fields.price = 420.0;
        let images = DishImages {
            small: Some("/static/uploads/dishes/1/small_1.webp".to_string()),
            ..DishImages::default()
        };
        store
            .commit(MenuBatch::from(vec![
                MenuChange::UpdateDish { id: 1, fields },
                MenuChange::SetDishImages { id: 1, images },
            ]))
            .await
            .unwrap();

        let dish = store.get_dish(1).await.unwrap().unwrap();
        assert_eq!(dish.price, 420.0);
        assert!(dish.has_image());
        assert_eq!(dish.created_at, created.created_at);
        assert!(dish.updated_at >= created.updated_at);

        // Keeping its own slug is not a collision
        let result = store
            .commit(MenuBatch::from(vec![MenuChange::UpdateDish {
                id: 1,
                fields: dish.fields(),
            }]))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (store, _temp_dir) = create_test_store();
        store
            .commit(MenuBatch::from(vec![
                MenuChange::CreateCategory(category_fields("Супы", "supy", 1)),
                MenuChange::CreateDish(dish_fields(1, "Борщ", "borshch", 1)),
            ]))
            .await
            .unwrap();

        let result = store
            .commit(MenuBatch::from(vec![MenuChange::DeleteCategory(1)]))
            .await;
        assert!(matches!(result, Err(AppError::Commit(_))));

        store
            .commit(MenuBatch::from(vec![
                MenuChange::DeleteDish(1),
                MenuChange::DeleteCategory(1),
            ]))
            .await
            .unwrap();
        assert!(store.list_categories().await.unwrap().is_empty());

        let result = store.commit(MenuBatch::from(vec![MenuChange::DeleteDish(1)])).await;
        assert!(matches!(result, Err(AppError::Commit(_))));
    }

    #[tokio::test]
    async fn test_dishes_ordered_by_category_then_sort_order() {
        let (store, _temp_dir) = create_test_store();
        store
            .commit(MenuBatch::from(vec![
                MenuChange::CreateCategory(category_fields("Супы", "supy", 1)),
                MenuChange::CreateCategory(category_fields("Салаты", "salaty", 2)),
                MenuChange::CreateDish(dish_fields(2, "Оливье", "olive", 1)),
                MenuChange::CreateDish(dish_fields(1, "Щи", "shchi", 2)),
                MenuChange::CreateDish(dish_fields(1, "Борщ", "borshch", 1)),
            ]))
            .await
            .unwrap();

        let names: Vec<_> = store
            .list_dishes()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Борщ", "Щи", "Оливье"]);
        assert!(store.menu_file().exists());
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let (store, _temp_dir) = create_test_store();
        let receipt = store.commit(MenuBatch::new()).await.unwrap();
        assert_eq!(receipt, CommitReceipt::default());
        assert!(!store.menu_file().exists());
    }
}
