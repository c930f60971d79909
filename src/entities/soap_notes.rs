use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Metered request kind; also stored on every generated note.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[sea_orm(string_value = "audio")]
    Audio,
    #[sea_orm(string_value = "text")]
    Text,
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputType::Audio => write!(f, "audio"),
            InputType::Text => write!(f, "text"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "soap_notes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub note_type: String,
    pub input_type: InputType,
    #[sea_orm(column_type = "Text")]
    pub source_text: String,
    pub patient_name: Option<String>,
    pub therapist_name: Option<String>,
    pub session_date: NaiveDate,
    pub session_time: String,
    pub icd10: String,
    pub cpt: String,
    #[sea_orm(column_type = "Text")]
    pub subjective: String,
    #[sea_orm(column_type = "Text")]
    pub objective: String,
    #[sea_orm(column_type = "Text")]
    pub assessment: String,
    #[sea_orm(column_type = "Text")]
    pub plan: String,
    pub audio_file_name: Option<String>,
    pub audio_mime_type: Option<String>,
    pub audio_size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
