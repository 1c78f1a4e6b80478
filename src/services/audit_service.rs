use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::utils::{AppError, Result};
use crate::{log_debug, log_info};

const AUDIT_FILE_NAME: &str = "audit_log.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Activate,
    Deactivate,
    Reorder,
    Import,
    Export,
    /// `bulk_{action}`, e.g. `bulk_delete`.
    Bulk(String),
    Other(String),
}

impl AuditAction {
    pub fn code(&self) -> String {
        match self {
            AuditAction::Create => "create".to_string(),
            AuditAction::Update => "update".to_string(),
            AuditAction::Delete => "delete".to_string(),
            AuditAction::Login => "login".to_string(),
            AuditAction::Logout => "logout".to_string(),
            AuditAction::Activate => "activate".to_string(),
            AuditAction::Deactivate => "deactivate".to_string(),
            AuditAction::Reorder => "reorder".to_string(),
            AuditAction::Import => "import".to_string(),
            AuditAction::Export => "export".to_string(),
            AuditAction::Bulk(action) => format!("bulk_{}", action),
            AuditAction::Other(action) => action.clone(),
        }
    }

    /// Label shown in the admin UI.
    pub fn display_name(&self) -> String {
        let label = match self {
            AuditAction::Create => "Создание",
            AuditAction::Update => "Изменение",
            AuditAction::Delete => "Удаление",
            AuditAction::Login => "Вход",
            AuditAction::Logout => "Выход",
            AuditAction::Activate => "Активация",
            AuditAction::Deactivate => "Деактивация",
            AuditAction::Reorder => "Изменение порядка",
            AuditAction::Import => "Импорт",
            AuditAction::Export => "Экспорт",
            AuditAction::Bulk(action) => match action.as_str() {
                "delete" => "Массовое удаление",
                "activate" => "Массовая активация",
                "deactivate" => "Массовая деактивация",
                _ => return self.code(),
            },
            AuditAction::Other(action) => return action.clone(),
        };
        label.to_string()
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "create" => AuditAction::Create,
            "update" => AuditAction::Update,
            "delete" => AuditAction::Delete,
            "login" => AuditAction::Login,
            "logout" => AuditAction::Logout,
            "activate" => AuditAction::Activate,
            "deactivate" => AuditAction::Deactivate,
            "reorder" => AuditAction::Reorder,
            "import" => AuditAction::Import,
            "export" => AuditAction::Export,
            other => match other.strip_prefix("bulk_") {
                Some(action) => AuditAction::Bulk(action.to_string()),
                None => AuditAction::Other(value),
            },
        }
    }
}

impl From<AuditAction> for String {
    fn from(value: AuditAction) -> Self {
        value.code()
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Dish,
    Category,
    AdminUser,
    System,
}

impl AuditEntityType {
    pub fn display_name(self) -> &'static str {
        match self {
            AuditEntityType::Dish => "Блюдо",
            AuditEntityType::Category => "Категория",
            AuditEntityType::AdminUser => "Администратор",
            AuditEntityType::System => "Система",
        }
    }
}

impl From<EntityKind> for AuditEntityType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Dish => AuditEntityType::Dish,
            EntityKind::Category => AuditEntityType::Category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub admin_user_id: Option<i64>,
    pub action: AuditAction,
    pub entity_type: AuditEntityType,
    pub entity_id: Option<i64>,
    /// Kept so entries stay readable after the entity is gone.
    pub entity_name: Option<String>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_type: AuditEntityType) -> Self {
        Self {
            id: String::new(),
            admin_user_id: None,
            action,
            entity_type,
            entity_id: None,
            entity_name: None,
            old_data: None,
            new_data: None,
            details: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    /// 1-based.
    pub page: usize,
    pub per_page: usize,
    pub entity_type: Option<AuditEntityType>,
    pub admin_user_id: Option<i64>,
    pub action: Option<AuditAction>,
    pub entity_id: Option<i64>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            entity_type: None,
            admin_user_id: None,
            action: None,
            entity_id: None,
        }
    }
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.entity_type.map_or(true, |t| entry.entity_type == t)
            && self.admin_user_id.map_or(true, |id| entry.admin_user_id == Some(id))
            && self.action.as_ref().map_or(true, |a| &entry.action == a)
            && self.entity_id.map_or(true, |id| entry.entity_id == Some(id))
    }
}

/// `{field: {"old": .., "new": ..}}` for every key of `new_data` whose value
/// differs from `old_data`.
pub fn compute_changes(old_data: &Value, new_data: &Value) -> Map<String, Value> {
    let mut changes = Map::new();
    let Some(new_fields) = new_data.as_object() else {
        return changes;
    };

    for (key, new_value) in new_fields {
        let old_value = old_data.get(key).cloned().unwrap_or(Value::Null);
        if &old_value != new_value {
            changes.insert(key.clone(), json!({ "old": old_value, "new": new_value }));
        }
    }
    changes
}

/// Append-only log of admin actions in `audit_log.json`.
pub struct AuditService {
    audit_file: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditService {
    pub fn new_with_dir(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| AppError::FileSystem(format!("Failed to create data directory: {}", e)))?;

        Ok(Self {
            audit_file: data_dir.join(AUDIT_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn log(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = self.load_entries().await?;
        entries.push(entry.clone());
        self.save_entries(&entries).await?;

        log_debug!(
            action = %entry.action,
            entity_type = ?entry.entity_type,
            entity_id = ?entry.entity_id,
            "Audit entry recorded"
        );
        Ok(entry)
    }

    pub async fn log_create(
        &self,
        admin_user_id: i64,
        entity_type: AuditEntityType,
        entity_id: i64,
        entity_name: &str,
        new_data: Value,
    ) -> Result<AuditEntry> {
        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_id: Some(entity_id),
            entity_name: Some(entity_name.to_string()),
            new_data: Some(new_data),
            ..AuditEntry::new(AuditAction::Create, entity_type)
        })
        .await
    }

    /// Stores the full old state and only the changed fields as new data.
    /// Nothing is written when no field changed.
    pub async fn log_update(
        &self,
        admin_user_id: i64,
        entity_type: AuditEntityType,
        entity_id: i64,
        entity_name: &str,
        old_data: Value,
        new_data: &Value,
    ) -> Result<Option<AuditEntry>> {
        let changes = compute_changes(&old_data, new_data);
        if changes.is_empty() {
            return Ok(None);
        }

        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_id: Some(entity_id),
            entity_name: Some(entity_name.to_string()),
            old_data: Some(old_data),
            new_data: Some(Value::Object(changes)),
            ..AuditEntry::new(AuditAction::Update, entity_type)
        })
        .await
        .map(Some)
    }

    pub async fn log_delete(
        &self,
        admin_user_id: i64,
        entity_type: AuditEntityType,
        entity_id: i64,
        entity_name: &str,
        old_data: Value,
    ) -> Result<AuditEntry> {
        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_id: Some(entity_id),
            entity_name: Some(entity_name.to_string()),
            old_data: Some(old_data),
            ..AuditEntry::new(AuditAction::Delete, entity_type)
        })
        .await
    }

    pub async fn log_login(
        &self,
        admin_user_id: i64,
        username: &str,
        details: Option<String>,
    ) -> Result<AuditEntry> {
        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_id: Some(admin_user_id),
            entity_name: Some(username.to_string()),
            details,
            ..AuditEntry::new(AuditAction::Login, AuditEntityType::AdminUser)
        })
        .await
    }

    pub async fn log_logout(&self, admin_user_id: i64, username: &str) -> Result<AuditEntry> {
        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_id: Some(admin_user_id),
            entity_name: Some(username.to_string()),
            ..AuditEntry::new(AuditAction::Logout, AuditEntityType::AdminUser)
        })
        .await
    }

    pub async fn log_bulk_action(
        &self,
        admin_user_id: i64,
        action: &str,
        entity_type: AuditEntityType,
        entity_ids: &[i64],
        entity_names: &[String],
    ) -> Result<AuditEntry> {
        self.log(AuditEntry {
            admin_user_id: Some(admin_user_id),
            entity_name: Some(format!("{} элементов", entity_ids.len())),
            new_data: Some(json!({ "ids": entity_ids, "names": entity_names })),
            ..AuditEntry::new(AuditAction::Bulk(action.to_string()), entity_type)
        })
        .await
    }

    /// Filtered page of entries, newest first, plus the filtered total.
    pub async fn get_logs(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, usize)> {
        let matching: Vec<AuditEntry> = self
            .newest_first()
            .await?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        let total = matching.len();

        let offset = query.page.saturating_sub(1) * query.per_page;
        let page = matching
            .into_iter()
            .skip(offset)
            .take(query.per_page)
            .collect();
        Ok((page, total))
    }

    pub async fn get_entity_history(
        &self,
        entity_type: AuditEntityType,
        entity_id: i64,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self
            .newest_first()
            .await?
            .into_iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == Some(entity_id))
            .collect())
    }

    pub async fn get_admin_activity(&self, admin_user_id: i64, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .newest_first()
            .await?
            .into_iter()
            .filter(|e| e.admin_user_id == Some(admin_user_id))
            .take(limit)
            .collect())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_entries(&[]).await?;
        log_info!("Audit log cleared");
        Ok(())
    }

    // Reversed first so equal timestamps also come out newest first
    async fn newest_first(&self) -> Result<Vec<AuditEntry>> {
        let mut entries = self.load_entries().await?;
        entries.reverse();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.audit_file.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.audit_file)
            .await
            .map_err(|e| AppError::FileSystem(format!("Failed to read audit log: {}", e)))?;
        let entries: Vec<AuditEntry> =
            serde_json::from_str(&content).map_err(AppError::Serialization)?;
        Ok(entries)
    }

    async fn save_entries(&self, entries: &[AuditEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries).map_err(AppError::Serialization)?;
        tokio::fs::write(&self.audit_file, content)
            .await
            .map_err(|e| AppError::FileSystem(format!("Failed to write audit log: {}", e)))?;
        Ok(())
    }
}
