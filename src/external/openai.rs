use futures_util::future::BoxFuture;
use regex::{Regex, RegexBuilder};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::error::{AppError, AppResult};
use crate::models::{NoteContext, SoapSections};
use crate::services::NoteGenerator;

const MAX_RETRIES: u32 = 3;
const TRANSCRIPTION_PROMPT: &str =
    "[BACKGROUND NOISE] [IGNORE NON-SPEECH SOUNDS] [TRANSCRIBE SPEECH ONLY]";
const SYSTEM_PROMPT: &str = "You are an experienced healthcare professional with expertise in \
     creating detailed SOAP notes. Maintain professional medical terminology and format throughout \
     the documentation.";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Whisper 转写 + Chat Completions 生成 SOAP 笔记
#[derive(Clone)]
pub struct OpenAiService {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiService {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn transcribe_once(
        &self,
        audio: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> AppResult<String> {
        let file = Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.config.transcription_model.clone())
            .text("language", "en")
            .text("prompt", TRANSCRIPTION_PROMPT)
            .text("temperature", "0.2");

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if response.status().is_success() {
            let body: TranscriptionResponse = response.json().await?;
            Ok(body.text.trim().to_string())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            Err(AppError::ExternalApiError(format!(
                "Transcription failed ({status}): {error_text}"
            )))
        }
    }

    async fn transcribe_with_retry(
        &self,
        audio: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> AppResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transcribe_once(audio, file_name, mime_type).await {
                Ok(text) if text.is_empty() => {
                    return Err(AppError::ExternalApiError(
                        "No transcription results available".to_string(),
                    ));
                }
                Ok(text) => return Ok(text),
                Err(e) if attempt < MAX_RETRIES => {
                    log::warn!("Transcription attempt {attempt} failed: {e}");
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => {
                    log::error!("Transcription failed after {attempt} attempts: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn structure_note(&self, text: &str, context: &NoteContext) -> AppResult<SoapSections> {
        let sanitized = redact(text, context.patient_name.as_deref())?;
        let prompt = build_prompt(&sanitized, context);

        let body = json!({
            "model": self.config.chat_model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.7,
            "max_tokens": 1500,
        });

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError(format!(
                "SOAP note generation failed ({status}): {error_text}"
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::ExternalApiError("Empty completion".to_string()))?;

        Ok(SoapSections::parse(content.trim()))
    }
}

impl NoteGenerator for OpenAiService {
    fn transcribe<'a>(
        &'a self,
        audio: &'a [u8],
        file_name: &'a str,
        mime_type: &'a str,
    ) -> BoxFuture<'a, AppResult<String>> {
        Box::pin(self.transcribe_with_retry(audio, file_name, mime_type))
    }

    fn structure<'a>(
        &'a self,
        text: &'a str,
        context: &'a NoteContext,
    ) -> BoxFuture<'a, AppResult<SoapSections>> {
        Box::pin(self.structure_note(text, context))
    }
}

fn pattern(re: &str) -> AppResult<Regex> {
    Regex::new(re).map_err(|e| AppError::InternalError(format!("Invalid redaction pattern: {e}")))
}

/// 发送给模型前去掉可识别个人身份的信息
pub fn redact(text: &str, patient_name: Option<&str>) -> AppResult<String> {
    let mut sanitized = text.to_string();

    if let Some(name) = patient_name.map(str::trim).filter(|n| !n.is_empty()) {
        let name_regex = RegexBuilder::new(&regex::escape(name))
            .case_insensitive(true)
            .build()
            .map_err(|e| AppError::InternalError(format!("Invalid name pattern: {e}")))?;
        sanitized = name_regex.replace_all(&sanitized, "patient").into_owned();
    }

    let rules = [
        (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "[PHONE]"),
        (r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "[EMAIL]"),
        (r"\b\d{2}[-/]\d{2}[-/]\d{4}\b", "[DOB]"),
        (r"\b\d{3}-?\d{2}-?\d{4}\b", "[SSN]"),
    ];
    for (re, replacement) in rules {
        sanitized = pattern(re)?.replace_all(&sanitized, replacement).into_owned();
    }

    Ok(sanitized)
}

fn focus_for(note_type: &str) -> &'static str {
    match note_type {
        "Psychotherapy Session" => {
            "emotional and psychological state, mood and behavior, therapeutic interventions used"
        }
        "Clinical Social Worker" => {
            "psychosocial factors, family and social environment, counseling and support services"
        }
        "Psychiatrist Session" => {
            "psychiatric history, current symptoms, diagnoses and medication management"
        }
        "Chiropractor" => "musculoskeletal and spinal assessment, adjustments, posture and pain relief",
        "Pharmacy" => "medication management, interactions, side effects and counseling provided",
        "Nurse Practitioner" => "overall health, physical exam, prescribed treatments and referrals",
        "Massage Therapy" => "areas treated, techniques used, muscle tension and mobility changes",
        "Occupational Therapy" => "functional abilities, daily living skills and assistive devices",
        "Veterinary" => "the animal's symptoms, physical findings, lab results and vaccinations",
        "Podiatry" => "foot and ankle conditions, procedures performed and referrals",
        "Physical Therapy" => "mobility, strength, range of motion, pain levels and exercises",
        "Speech Therapy (SLP)" => "articulation, language comprehension and communication exercises",
        "Registered Nurse" => "vital signs, nursing assessments, medications administered",
        "Acupuncture" => "points treated, symptoms addressed and post-treatment changes",
        "Dentistry" => "oral health, dental findings and procedures performed",
        _ => "details relevant to the patient's condition and the session type",
    }
}

pub fn build_prompt(sanitized_text: &str, context: &NoteContext) -> String {
    let mut details = String::new();
    if let Some(name) = context.patient_name.as_deref().filter(|n| !n.trim().is_empty()) {
        details.push_str(&format!("Patient Name: {name}\n"));
    }
    if let Some(name) = context.therapist_name.as_deref().filter(|n| !n.trim().is_empty()) {
        details.push_str(&format!("Therapist Name: {name}\n"));
    }

    format!(
        "You are an experienced healthcare professional specializing in {note_type}. \
         Create a detailed, well-structured SOAP note from the information below. \
         If the input is brief, expand on it logically based on typical {note_type} sessions.\n\
         {details}\
         - Session Date: {date}\n\
         - Session Time: {time}\n\
         - ICD-10 Code: {icd10}\n\
         - CPT Code: {cpt}\n\
         Focus on {focus}.\n\n\
         {text}\n\n\
         Format your response strictly as follows:\n\
         Subjective:\n[subjective section]\n\n\
         Objective:\n[objective section]\n\n\
         Assessment:\n[assessment section]\n\n\
         Plan:\n[plan section]",
        note_type = context.note_type,
        date = context.date.format("%Y-%m-%d"),
        time = context.time,
        icd10 = context.icd10,
        cpt = context.cpt,
        focus = focus_for(&context.note_type),
        text = sanitized_text,
    )
}
