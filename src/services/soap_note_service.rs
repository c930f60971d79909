use chrono::Utc;
use futures_util::future::BoxFuture;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;

use crate::entities::{InputType, soap_note_entity as soap_notes};
use crate::error::{AppError, AppResult};
use crate::models::{
    CreateSoapNoteRequest, MIN_SOURCE_WORDS, NoteContext, PaginatedResponse, PaginationParams,
    SoapNoteQuery, SoapNoteResponse, SoapSections, UpdateSoapNoteRequest, word_count,
};

/// 转写与笔记生成的下游接口
pub trait NoteGenerator: Send + Sync {
    fn transcribe<'a>(
        &'a self,
        audio: &'a [u8],
        file_name: &'a str,
        mime_type: &'a str,
    ) -> BoxFuture<'a, AppResult<String>>;

    fn structure<'a>(
        &'a self,
        text: &'a str,
        context: &'a NoteContext,
    ) -> BoxFuture<'a, AppResult<SoapSections>>;
}

#[derive(Clone)]
pub struct SoapNoteService {
    pool: DatabaseConnection,
    generator: Arc<dyn NoteGenerator>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SoapNoteService {
    pub fn new(pool: DatabaseConnection, generator: Arc<dyn NoteGenerator>) -> Self {
        Self { pool, generator }
    }

    /// 校验输入 → 转写（音频）→ 生成 SOAP 四段 → 入库
    pub async fn create(
        &self,
        user_id: i32,
        request: CreateSoapNoteRequest,
    ) -> AppResult<SoapNoteResponse> {
        let session_date = request.validate()?;

        let mut audio_info = None;
        let source_text = match request.input_type {
            InputType::Text => request.text.clone().unwrap_or_default(),
            InputType::Audio => {
                let audio = request.audio.as_ref().ok_or_else(|| {
                    AppError::ValidationError("Audio file is required for audio input".to_string())
                })?;
                let bytes = audio.decode()?;
                let text = self
                    .generator
                    .transcribe(&bytes, &audio.file_name, &audio.mime_type)
                    .await?;
                audio_info = Some((
                    audio.file_name.clone(),
                    audio.mime_type.clone(),
                    bytes.len() as i64,
                ));
                text
            }
        };

        if word_count(&source_text) < MIN_SOURCE_WORDS {
            return Err(AppError::ValidationError(
                "Not enough data to generate SOAP notes. Data must contain information about the session"
                    .to_string(),
            ));
        }

        let context = NoteContext {
            note_type: request.note_type.clone(),
            patient_name: non_empty(request.patient_name.clone()),
            therapist_name: non_empty(request.therapist_name.clone()),
            date: session_date,
            time: request.time.trim().to_string(),
            icd10: request.icd10.trim().to_string(),
            cpt: request.cpt.trim().to_string(),
        };
        let sections = self.generator.structure(&source_text, &context).await?;

        let now = Utc::now();
        let (audio_file_name, audio_mime_type, audio_size_bytes) = match audio_info {
            Some((name, mime, size)) => (Some(name), Some(mime), Some(size)),
            None => (None, None, None),
        };
        let note = soap_notes::ActiveModel {
            user_id: Set(user_id),
            note_type: Set(context.note_type),
            input_type: Set(request.input_type),
            source_text: Set(source_text),
            patient_name: Set(context.patient_name),
            therapist_name: Set(context.therapist_name),
            session_date: Set(context.date),
            session_time: Set(context.time),
            icd10: Set(context.icd10),
            cpt: Set(context.cpt),
            subjective: Set(sections.subjective),
            objective: Set(sections.objective),
            assessment: Set(sections.assessment),
            plan: Set(sections.plan),
            audio_file_name: Set(audio_file_name),
            audio_mime_type: Set(audio_mime_type),
            audio_size_bytes: Set(audio_size_bytes),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;

        log::info!(
            "SOAP note {} created for user {user_id} ({} input)",
            note.id,
            note.input_type
        );
        Ok(note.into())
    }

    /// 当前用户的笔记，新的在前
    pub async fn list(
        &self,
        user_id: i32,
        query: &SoapNoteQuery,
    ) -> AppResult<PaginatedResponse<SoapNoteResponse>> {
        let params = PaginationParams::new(query.page, query.per_page);

        let mut condition = Condition::all().add(soap_notes::Column::UserId.eq(user_id));
        if let Some(name) = non_empty(query.patient_name.clone()) {
            condition = condition.add(soap_notes::Column::PatientName.contains(name.as_str()));
        }
        if let Some(name) = non_empty(query.therapist_name.clone()) {
            condition = condition.add(soap_notes::Column::TherapistName.contains(name.as_str()));
        }

        let base_query = soap_notes::Entity::find().filter(condition);
        let total = base_query.clone().count(&self.pool).await?;

        let items = base_query
            .order_by_desc(soap_notes::Column::CreatedAt)
            .order_by_desc(soap_notes::Column::Id)
            .limit(params.limit())
            .offset(params.offset())
            .all(&self.pool)
            .await?;

        Ok(PaginatedResponse::new(
            items.into_iter().map(Into::into).collect(),
            params,
            total,
        ))
    }

    pub async fn get(&self, user_id: i32, id: i32) -> AppResult<SoapNoteResponse> {
        Ok(self.find_owned(user_id, id).await?.into())
    }

    pub async fn update(
        &self,
        user_id: i32,
        id: i32,
        request: UpdateSoapNoteRequest,
    ) -> AppResult<SoapNoteResponse> {
        let note = self.find_owned(user_id, id).await?;
        let mut active = note.into_active_model();

        if let Some(v) = request.patient_name {
            active.patient_name = Set(non_empty(Some(v)));
        }
        if let Some(v) = request.therapist_name {
            active.therapist_name = Set(non_empty(Some(v)));
        }
        if let Some(v) = non_empty(request.icd10) {
            active.icd10 = Set(v);
        }
        if let Some(v) = non_empty(request.cpt) {
            active.cpt = Set(v);
        }
        if let Some(v) = request.subjective {
            active.subjective = Set(v);
        }
        if let Some(v) = request.objective {
            active.objective = Set(v);
        }
        if let Some(v) = request.assessment {
            active.assessment = Set(v);
        }
        if let Some(v) = request.plan {
            active.plan = Set(v);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&self.pool).await?.into())
    }

    pub async fn delete(&self, user_id: i32, id: i32) -> AppResult<()> {
        let result = soap_notes::Entity::delete_many()
            .filter(soap_notes::Column::Id.eq(id))
            .filter(soap_notes::Column::UserId.eq(user_id))
            .exec(&self.pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound("SOAP note not found".to_string()));
        }
        log::info!("SOAP note {id} deleted by user {user_id}");
        Ok(())
    }

    async fn find_owned(&self, user_id: i32, id: i32) -> AppResult<soap_notes::Model> {
        soap_notes::Entity::find_by_id(id)
            .filter(soap_notes::Column::UserId.eq(user_id))
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("SOAP note not found".to_string()))
    }
}
