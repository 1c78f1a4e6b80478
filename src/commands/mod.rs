use crate::models::{
    DishFields, DishImages, EntityKind, ExportFile, ImportResponse, MenuBatch, MenuChange,
    TabularFormat, UploadedImage,
};
use crate::services::audit_service::{AuditAction, AuditEntityType, AuditEntry};
use crate::services::import_service::slugify;
use crate::services::{
    AuditService, DataExchangeService, ImageService, JsonMenuStore, MenuRepository, RateLimiter,
    Settings,
};
use crate::utils::error::AppError;
use crate::utils::Result;
use crate::{log_error, log_info, log_warn};
use serde_json::json;
use std::sync::Arc;


// ============================================================================
// Parameter Validation Functions
// ============================================================================

/// Rejects empty and oversized uploads before anything decodes them.
pub fn validate_upload(upload: &UploadedImage, max_size: u64) -> Result<()> {
    if upload.filename.is_empty() || upload.bytes.is_empty() {
        return Err(AppError::Validation("Файл не выбран".to_string()));
    }

    if upload.bytes.len() as u64 > max_size {
        return Err(AppError::Validation(format!(
            "Изображение слишком большое (макс {} МБ)",
            max_size / (1024 * 1024)
        )));
    }

    Ok(())
}

/// Maps an import file name onto its codec.
pub fn validate_import_filename(filename: &str) -> Result<TabularFormat> {
    if filename.is_empty() {
        return Err(AppError::Validation("Файл не выбран".to_string()));
    }

    TabularFormat::from_filename(filename).ok_or_else(|| {
        AppError::Validation("Поддерживаются только CSV и XLSX файлы".to_string())
    })
}

/// Bulk operations accepted for dishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkDishAction {
    Delete,
    Activate,
    Deactivate,
}

impl BulkDishAction {
    pub fn parse(action: &str) -> Result<Self> {
        match action {
            "delete" => Ok(BulkDishAction::Delete),
            "activate" => Ok(BulkDishAction::Activate),
            "deactivate" => Ok(BulkDishAction::Deactivate),
            _ => Err(AppError::Validation("Неизвестное действие".to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BulkDishAction::Delete => "delete",
            BulkDishAction::Activate => "activate",
            BulkDishAction::Deactivate => "deactivate",
        }
    }
}

/// Counters reported by [`AdminApi::regenerate_images`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerateReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ============================================================================
// Admin API
// ============================================================================

/// Admin operations over one menu: every call is request-scoped, the only
/// shared state is the repository and the login limiter.
pub struct AdminApi {
    settings: Settings,
    repo: Arc<dyn MenuRepository>,
    images: ImageService,
    audit: Arc<AuditService>,
    limiter: Arc<RateLimiter>,
    exchange: DataExchangeService<dyn MenuRepository>,
}

impl AdminApi {
    pub fn new(
        settings: Settings,
        repo: Arc<dyn MenuRepository>,
        images: ImageService,
        audit: Arc<AuditService>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let exchange = DataExchangeService::new(Arc::clone(&repo));
        Self {
            settings,
            repo,
            images,
            audit,
            limiter,
            exchange,
        }
    }

    /// Wires the JSON store, audit log and image service from settings.
    pub fn open(settings: Settings) -> Result<Self> {
        let repo: Arc<dyn MenuRepository> =
            Arc::new(JsonMenuStore::new_with_dir(settings.data_dir.clone())?);
        let audit = Arc::new(AuditService::new_with_dir(settings.data_dir.clone())?);
        let images = ImageService::from_settings(&settings);
        let limiter = Arc::new(RateLimiter::from_settings(&settings));
        Ok(Self::new(settings, repo, images, audit, limiter))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<dyn MenuRepository> {
        &self.repo
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    pub fn images(&self) -> &ImageService {
        &self.images
    }

    // ============================================================================
    // Login Commands
    // ============================================================================

    /// Gate for one login attempt from `client_key`.
    ///
    /// `verified_admin` carries the admin id when the credentials checked out.
    /// A limited client is refused before the credentials matter; a failed
    /// attempt is recorded; a successful one clears the client's history and
    /// lands in the audit log.
    pub async fn login_attempt(
        &self,
        client_key: &str,
        username: &str,
        verified_admin: Option<i64>,
    ) -> Result<i64> {
        let (limited, _) = self.limiter.is_rate_limited(client_key);
        if limited {
            let retry_after_secs = self.limiter.retry_after(client_key).as_secs();
            log_warn!(
                client = client_key,
                retry_after_secs = retry_after_secs,
                "Login refused, too many attempts"
            );
            return Err(AppError::RateLimited { retry_after_secs });
        }

        let Some(admin_user_id) = verified_admin else {
            self.limiter.record_attempt(client_key);
            let (_, remaining) = self.limiter.is_rate_limited(client_key);
            log_info!(client = client_key, remaining = remaining, "Login failed");

            let mut message = "Неверный логин или пароль".to_string();
            if remaining > 0 {
                message.push_str(&format!(" (осталось {} попыток)", remaining));
            }
            return Err(AppError::Validation(message));
        };

        self.limiter.reset(client_key);
        self.audit
            .log_login(admin_user_id, username, Some(format!("client: {}", client_key)))
            .await?;
        Ok(admin_user_id)
    }

    /// Operator-facing text for a refused login.
    pub fn login_error_message(error: &AppError) -> String {
        match error {
            AppError::RateLimited { retry_after_secs } => format!(
                "Слишком много попыток. Попробуйте через {} мин.",
                retry_after_secs / 60 + 1
            ),
            AppError::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }

    pub async fn logout(&self, admin_user_id: i64, username: &str) -> Result<()> {
        self.audit.log_logout(admin_user_id, username).await?;
        Ok(())
    }

    // ============================================================================
    // Dish Image Commands
    // ============================================================================

    /// Replaces the image set of a dish with derivatives of `upload`.
    pub async fn upload_dish_image(
        &self,
        admin_user_id: i64,
        dish_id: i64,
        upload: UploadedImage,
    ) -> Result<DishImages> {
        validate_upload(&upload, self.settings.max_image_size)?;

        let dish = self
            .repo
            .get_dish(dish_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dish {}", dish_id)))?;

        log_info!(
            dish_id = dish_id,
            filename = %upload.filename,
            bytes = upload.bytes.len(),
            "Replacing dish image"
        );

        self.images.delete(dish_id).await?;
        let images = match self.images.generate(&upload.bytes, dish_id).await {
            Ok(set) => DishImages::from_set(&set),
            Err(e) => {
                // The old files are gone, so the dish must stop pointing at them
                log_error!(dish_id = dish_id, error = %e, "Image generation failed");
                self.store_images(dish_id, DishImages::default()).await?;
                return Err(e);
            }
        };
        self.store_images(dish_id, images.clone()).await?;

        self.audit
            .log_update(
                admin_user_id,
                AuditEntityType::Dish,
                dish_id,
                &dish.name,
                serde_json::to_value(&dish.images)?,
                &serde_json::to_value(&images)?,
            )
            .await?;
        Ok(images)
    }

    async fn store_images(&self, dish_id: i64, images: DishImages) -> Result<()> {
        self.repo
            .commit(MenuBatch::from(vec![MenuChange::SetDishImages {
                id: dish_id,
                images,
            }]))
            .await?;
        Ok(())
    }

    // ============================================================================
    // Dish Commands
    // ============================================================================

    /// Creates an unavailable copy of a dish right after the original,
    /// images included. Returns the new dish id.
    pub async fn duplicate_dish(&self, admin_user_id: i64, dish_id: i64) -> Result<i64> {
        let original = self
            .repo
            .get_dish(dish_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dish {}", dish_id)))?;

        let fields = DishFields {
            name: format!("{} (копия)", original.name),
            slug: slugify(&format!("{} копия", original.name)),
            is_available: false,
            sort_order: original.sort_order + 1,
            ..original.fields()
        };

        let receipt = self
            .repo
            .commit(MenuBatch::from(vec![MenuChange::CreateDish(fields.clone())]))
            .await?;
        let new_id = receipt
            .created_ids
            .first()
            .copied()
            .ok_or_else(|| AppError::Commit("no id assigned to the copy".to_string()))?;

        if original.has_image() {
            let set = self.images.copy(dish_id, new_id).await?;
            self.store_images(new_id, DishImages::from_set(&set)).await?;
        }

        log_info!(source = dish_id, copy = new_id, "Dish duplicated");
        self.audit
            .log_create(
                admin_user_id,
                AuditEntityType::Dish,
                new_id,
                &fields.name,
                serde_json::to_value(&fields)?,
            )
            .await?;
        Ok(new_id)
    }

    pub async fn delete_dish(&self, admin_user_id: i64, dish_id: i64) -> Result<()> {
        let dish = self
            .repo
            .get_dish(dish_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dish {}", dish_id)))?;

        self.repo
            .commit(MenuBatch::from(vec![MenuChange::DeleteDish(dish_id)]))
            .await?;
        self.images.delete(dish_id).await?;

        self.audit
            .log_delete(
                admin_user_id,
                AuditEntityType::Dish,
                dish_id,
                &dish.name,
                serde_json::to_value(&dish)?,
            )
            .await?;
        Ok(())
    }

    /// Applies `action` to every listed dish in one commit. Returns how many
    /// dishes were affected.
    pub async fn bulk_dishes(
        &self,
        admin_user_id: i64,
        action: BulkDishAction,
        ids: &[i64],
    ) -> Result<usize> {
        let mut batch = MenuBatch::new();
        let mut names = Vec::with_capacity(ids.len());

        for &id in ids {
            let dish = self
                .repo
                .get_dish(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("dish {}", id)))?;
            names.push(dish.name.clone());

            batch.push(match action {
                BulkDishAction::Delete => MenuChange::DeleteDish(id),
                BulkDishAction::Activate | BulkDishAction::Deactivate => MenuChange::UpdateDish {
                    id,
                    fields: DishFields {
                        is_available: action == BulkDishAction::Activate,
                        ..dish.fields()
                    },
                },
            });
        }

        self.repo.commit(batch).await?;
        if action == BulkDishAction::Delete {
            for &id in ids {
                self.images.delete(id).await?;
            }
        }

        self.audit
            .log_bulk_action(
                admin_user_id,
                action.as_str(),
                AuditEntityType::Dish,
                ids,
                &names,
            )
            .await?;
        Ok(ids.len())
    }

    // ============================================================================
    // Data Exchange Commands
    // ============================================================================

    /// Imports an uploaded CSV/XLSX file. Row problems come back in the
    /// response, capped at the configured display limit.
    pub async fn import(
        &self,
        admin_user_id: i64,
        kind: EntityKind,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<ImportResponse> {
        let format = validate_import_filename(filename)?;

        let summary = self.exchange.import(kind, format, content).await;
        log_info!(
            entity = kind.as_str(),
            filename = filename,
            created = summary.created,
            updated = summary.updated,
            errors = summary.errors.len(),
            "Import finished"
        );

        self.audit
            .log(AuditEntry {
                admin_user_id: Some(admin_user_id),
                entity_name: Some(filename.to_string()),
                new_data: Some(json!({
                    "created": summary.created,
                    "updated": summary.updated,
                    "errors_count": summary.errors.len(),
                })),
                ..AuditEntry::new(AuditAction::Import, AuditEntityType::from(kind))
            })
            .await?;

        let mut errors = summary.errors;
        errors.truncate(self.settings.error_display_limit);
        Ok(ImportResponse {
            success: true,
            created: summary.created,
            updated: summary.updated,
            errors,
        })
    }

    pub async fn export(&self, kind: EntityKind, format: TabularFormat) -> Result<ExportFile> {
        let bytes = self.exchange.export(kind, format).await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Ok(ExportFile {
            filename: format!("{}_{}.{}", kind.plural(), timestamp, format.extension()),
            content_type: format.content_type(),
            bytes,
        })
    }

    pub fn template(&self, kind: EntityKind) -> Result<ExportFile> {
        Ok(ExportFile {
            filename: format!("{}_template.csv", kind.plural()),
            content_type: TabularFormat::Csv.content_type(),
            bytes: self.exchange.template_csv(kind)?,
        })
    }

    // ============================================================================
    // Maintenance Commands
    // ============================================================================

    /// Backfills placeholder, colour and AVIF columns for every dish that has
    /// images, keeping the primary WebP paths. Per-dish failures are counted
    /// and logged; the successful updates are committed together.
    pub async fn regenerate_images(&self) -> Result<RegenerateReport> {
        let mut report = RegenerateReport::default();
        let mut batch = MenuBatch::new();

        for dish in self.repo.list_dishes().await? {
            if !dish.has_image() {
                report.skipped += 1;
                continue;
            }

            match self.images.regenerate(dish.id).await {
                Ok(Some(set)) => {
                    batch.push(MenuChange::SetDishImages {
                        id: dish.id,
                        images: dish.images.with_optimization(&set),
                    });
                    report.updated += 1;
                }
                Ok(None) => {
                    log_warn!(dish_id = dish.id, "No source image on disk, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    log_error!(dish_id = dish.id, error = %e, "Regeneration failed");
                    report.failed += 1;
                }
            }
        }

        self.repo.commit(batch).await?;
        log_info!(
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Image regeneration finished"
        );
        Ok(report)
    }
}
