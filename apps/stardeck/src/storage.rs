use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;
use tracing::debug;

use crate::fields::SheetField;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sheet not found")]
    NotFound,
    #[error("invalid field name: {0}")]
    InvalidField(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// One persisted starship sheet. Fields are never absent, only empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub uuid: String,
    pub ship_name: String,
    pub ship_class: String,
    pub ship_desc: String,
    pub armor_class: String,
    pub hit_points: String,
    pub shields: String,
    pub reflex_save: String,
    pub fort_save: String,
    pub captain: String,
    pub engineer: String,
    pub gunner: String,
    pub magic_officer: String,
    pub pilot: String,
    pub science_officer: String,
    pub medical_officer: String,
    pub bonuses: String,
    pub description: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sheet {
    /// A fresh sheet with every field defaulted to the empty string.
    pub fn new(uuid: String) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            ship_name: String::new(),
            ship_class: String::new(),
            ship_desc: String::new(),
            armor_class: String::new(),
            hit_points: String::new(),
            shields: String::new(),
            reflex_save: String::new(),
            fort_save: String::new(),
            captain: String::new(),
            engineer: String::new(),
            gunner: String::new(),
            magic_officer: String::new(),
            pilot: String::new(),
            science_officer: String::new(),
            medical_officer: String::new(),
            bonuses: String::new(),
            description: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field(&self, field: SheetField) -> &str {
        match field {
            SheetField::ShipName => &self.ship_name,
            SheetField::ShipClass => &self.ship_class,
            SheetField::ShipDesc => &self.ship_desc,
            SheetField::ArmorClass => &self.armor_class,
            SheetField::HitPoints => &self.hit_points,
            SheetField::Shields => &self.shields,
            SheetField::ReflexSave => &self.reflex_save,
            SheetField::FortSave => &self.fort_save,
            SheetField::Captain => &self.captain,
            SheetField::Engineer => &self.engineer,
            SheetField::Gunner => &self.gunner,
            SheetField::MagicOfficer => &self.magic_officer,
            SheetField::Pilot => &self.pilot,
            SheetField::ScienceOfficer => &self.science_officer,
            SheetField::MedicalOfficer => &self.medical_officer,
            SheetField::Bonuses => &self.bonuses,
            SheetField::Description => &self.description,
            SheetField::Notes => &self.notes,
        }
    }

    pub fn field_mut(&mut self, field: SheetField) -> &mut String {
        match field {
            SheetField::ShipName => &mut self.ship_name,
            SheetField::ShipClass => &mut self.ship_class,
            SheetField::ShipDesc => &mut self.ship_desc,
            SheetField::ArmorClass => &mut self.armor_class,
            SheetField::HitPoints => &mut self.hit_points,
            SheetField::Shields => &mut self.shields,
            SheetField::ReflexSave => &mut self.reflex_save,
            SheetField::FortSave => &mut self.fort_save,
            SheetField::Captain => &mut self.captain,
            SheetField::Engineer => &mut self.engineer,
            SheetField::Gunner => &mut self.gunner,
            SheetField::MagicOfficer => &mut self.magic_officer,
            SheetField::Pilot => &mut self.pilot,
            SheetField::ScienceOfficer => &mut self.science_officer,
            SheetField::MedicalOfficer => &mut self.medical_officer,
            SheetField::Bonuses => &mut self.bonuses,
            SheetField::Description => &mut self.description,
            SheetField::Notes => &mut self.notes,
        }
    }

    /// Full wire-named field map, used for `init` payloads and API responses.
    pub fn to_wire(&self) -> serde_json::Map<String, serde_json::Value> {
        SheetField::ALL
            .into_iter()
            .map(|field| {
                (
                    field.wire_name().to_string(),
                    serde_json::Value::String(self.field(field).to_string()),
                )
            })
            .collect()
    }

    /// Rebuild the full field set from a wire-named map. Missing keys reset
    /// to the empty string; unknown keys are ignored.
    pub fn apply_wire(&mut self, data: &serde_json::Map<String, serde_json::Value>) {
        for field in SheetField::ALL {
            let value = data
                .get(field.wire_name())
                .and_then(|v| v.as_str())
                .unwrap_or("");
            *self.field_mut(field) = value.to_string();
        }
    }
}

/// Durable storage for sheets, keyed by UUID.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn get(&self, uuid: &str) -> Result<Option<Sheet>, StoreError>;
    async fn create(&self, uuid: &str) -> Result<Sheet, StoreError>;
    async fn replace(&self, sheet: Sheet) -> Result<Sheet, StoreError>;
    async fn update_field(
        &self,
        uuid: &str,
        field: SheetField,
        value: &str,
    ) -> Result<(), StoreError>;
}

fn sheet_key(uuid: &str) -> String {
    format!("sheet:{}", uuid)
}

fn parse_timestamp(raw: Option<&String>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Redis-backed sheet store. Each sheet is one hash under `sheet:{uuid}`,
/// one entry per column plus the two timestamps, so a single-field update
/// is a single HSET.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    async fn exists(&self, uuid: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(sheet_key(uuid)).await?;
        Ok(exists)
    }

    fn entries(sheet: &Sheet) -> Vec<(&'static str, String)> {
        let mut items: Vec<(&'static str, String)> = SheetField::ALL
            .into_iter()
            .map(|field| (field.column(), sheet.field(field).to_string()))
            .collect();
        items.push(("created_at", sheet.created_at.to_rfc3339()));
        items.push(("updated_at", sheet.updated_at.to_rfc3339()));
        items
    }
}

#[async_trait]
impl SheetStore for RedisStore {
    async fn get(&self, uuid: &str) -> Result<Option<Sheet>, StoreError> {
        let mut conn = self.redis.clone();
        let mut map: HashMap<String, String> = conn.hgetall(sheet_key(uuid)).await?;
        if map.is_empty() {
            return Ok(None);
        }

        let mut sheet = Sheet::new(uuid.to_string());
        for field in SheetField::ALL {
            *sheet.field_mut(field) = map.remove(field.column()).unwrap_or_default();
        }
        sheet.created_at = parse_timestamp(map.get("created_at"));
        sheet.updated_at = parse_timestamp(map.get("updated_at"));
        Ok(Some(sheet))
    }

    async fn create(&self, uuid: &str) -> Result<Sheet, StoreError> {
        let sheet = Sheet::new(uuid.to_string());
        let mut conn = self.redis.clone();
        conn.hset_multiple::<_, _, _, ()>(sheet_key(uuid), &Self::entries(&sheet))
            .await?;
        debug!("created sheet {}", uuid);
        Ok(sheet)
    }

    async fn replace(&self, mut sheet: Sheet) -> Result<Sheet, StoreError> {
        if !self.exists(&sheet.uuid).await? {
            return Err(StoreError::NotFound);
        }
        sheet.updated_at = Utc::now();
        let mut conn = self.redis.clone();
        conn.hset_multiple::<_, _, _, ()>(sheet_key(&sheet.uuid), &Self::entries(&sheet))
            .await?;
        Ok(sheet)
    }

    async fn update_field(
        &self,
        uuid: &str,
        field: SheetField,
        value: &str,
    ) -> Result<(), StoreError> {
        if !self.exists(uuid).await? {
            return Err(StoreError::NotFound);
        }
        let mut conn = self.redis.clone();
        let key = sheet_key(uuid);
        redis::pipe()
            .hset(&key, field.column(), value)
            .ignore()
            .hset(&key, "updated_at", Utc::now().to_rfc3339())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// In-memory sheet store, used when no Redis URL is configured and by tests.
#[derive(Default)]
pub struct MemoryStore {
    sheets: Mutex<HashMap<String, Sheet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SheetStore for MemoryStore {
    async fn get(&self, uuid: &str) -> Result<Option<Sheet>, StoreError> {
        Ok(self.sheets.lock().await.get(uuid).cloned())
    }

    async fn create(&self, uuid: &str) -> Result<Sheet, StoreError> {
        let sheet = Sheet::new(uuid.to_string());
        self.sheets
            .lock()
            .await
            .insert(uuid.to_string(), sheet.clone());
        Ok(sheet)
    }

    async fn replace(&self, mut sheet: Sheet) -> Result<Sheet, StoreError> {
        let mut sheets = self.sheets.lock().await;
        if !sheets.contains_key(&sheet.uuid) {
            return Err(StoreError::NotFound);
        }
        sheet.updated_at = Utc::now();
        sheets.insert(sheet.uuid.clone(), sheet.clone());
        Ok(sheet)
    }

    async fn update_field(
        &self,
        uuid: &str,
        field: SheetField,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut sheets = self.sheets.lock().await;
        let sheet = sheets.get_mut(uuid).ok_or(StoreError::NotFound)?;
        *sheet.field_mut(field) = value.to_string();
        sheet.updated_at = Utc::now();
        Ok(())
    }
}
