use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{InputType, soap_note_entity};
use crate::error::{AppError, AppResult};

pub const SOAP_NOTE_TYPES: [&str; 15] = [
    "Psychotherapy Session",
    "Clinical Social Worker",
    "Psychiatrist Session",
    "Chiropractor",
    "Pharmacy",
    "Nurse Practitioner",
    "Massage Therapy",
    "Occupational Therapy",
    "Veterinary",
    "Podiatry",
    "Physical Therapy",
    "Speech Therapy (SLP)",
    "Registered Nurse",
    "Acupuncture",
    "Dentistry",
];

pub const MAX_AUDIO_BYTES: usize = 100 * 1024 * 1024;
pub const MIN_SOURCE_WORDS: usize = 15;

const EXTRA_AUDIO_MIME_TYPES: [&str; 3] = ["application/ogg", "video/ogg", "application/octet-stream"];

pub fn is_supported_audio_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    mime.starts_with("audio/") || EXTRA_AUDIO_MIME_TYPES.contains(&mime.as_str())
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AudioPayload {
    pub file_name: String,
    pub mime_type: String,
    /// base64 编码的音频内容
    pub content_base64: String,
    /// 客户端测得的时长（分钟），用于套餐时长校验
    pub duration_minutes: Option<f64>,
}

impl AudioPayload {
    /// 按 base64 长度推算解码后的字节数，不做解码
    pub fn decoded_len(&self) -> usize {
        let content = self.content_base64.trim();
        let padding = content.bytes().rev().take_while(|&b| b == b'=').count().min(2);
        (content.len() / 4 * 3).saturating_sub(padding)
    }

    /// 解码前的大小检查
    pub fn check_size(&self) -> AppResult<()> {
        let len = self.decoded_len();
        if len == 0 {
            return Err(AppError::ValidationError("Audio file is empty".to_string()));
        }
        if len > MAX_AUDIO_BYTES {
            return Err(AppError::ValidationError(
                "Audio file must not exceed 100MB".to_string(),
            ));
        }
        Ok(())
    }

    pub fn decode(&self) -> AppResult<Vec<u8>> {
        self.check_size()?;
        let bytes = STANDARD
            .decode(self.content_base64.trim())
            .map_err(|_| AppError::ValidationError("Audio content is not valid base64".to_string()))?;
        if bytes.is_empty() {
            return Err(AppError::ValidationError("Audio file is empty".to_string()));
        }
        if bytes.len() > MAX_AUDIO_BYTES {
            return Err(AppError::ValidationError(
                "Audio file must not exceed 100MB".to_string(),
            ));
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSoapNoteRequest {
    #[serde(rename = "type")]
    #[schema(example = "Physical Therapy")]
    pub note_type: String,
    pub input_type: InputType,
    pub text: Option<String>,
    pub audio: Option<AudioPayload>,
    #[serde(alias = "patientName")]
    pub patient_name: Option<String>,
    #[serde(alias = "therapistName")]
    pub therapist_name: Option<String>,
    #[schema(example = "2025-03-01")]
    pub date: String, // YYYY-MM-DD
    #[schema(example = "10:30")]
    pub time: String,
    #[schema(example = "M54.5")]
    pub icd10: String,
    #[schema(example = "97110")]
    pub cpt: String,
}

impl CreateSoapNoteRequest {
    /// 校验请求字段，返回解析后的就诊日期
    pub fn validate(&self) -> AppResult<NaiveDate> {
        if !SOAP_NOTE_TYPES.contains(&self.note_type.as_str()) {
            return Err(AppError::ValidationError("Invalid SOAP note type".to_string()));
        }
        if self.time.trim().is_empty() || self.icd10.trim().is_empty() || self.cpt.trim().is_empty()
        {
            return Err(AppError::ValidationError(
                "Date, time, ICD10, and CPT codes are required".to_string(),
            ));
        }
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| AppError::ValidationError("Date must be a valid date".to_string()))?;

        match self.input_type {
            InputType::Text => {
                if self.text.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    return Err(AppError::ValidationError(
                        "Text is required for text input".to_string(),
                    ));
                }
            }
            InputType::Audio => {
                let audio = self.audio.as_ref().ok_or_else(|| {
                    AppError::ValidationError("Audio file is required for audio input".to_string())
                })?;
                if !is_supported_audio_mime(&audio.mime_type) {
                    return Err(AppError::ValidationError(
                        "Only audio files are allowed".to_string(),
                    ));
                }
                audio.check_size()?;
                if audio.duration_minutes.is_some_and(|d| !d.is_finite() || d < 0.0) {
                    return Err(AppError::ValidationError(
                        "Audio duration must be a non-negative number".to_string(),
                    ));
                }
            }
        }

        Ok(date)
    }
}

/// 生成笔记时传给模型的上下文
#[derive(Debug, Clone)]
pub struct NoteContext {
    pub note_type: String,
    pub patient_name: Option<String>,
    pub therapist_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub icd10: String,
    pub cpt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SoapSections {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

impl SoapSections {
    /// 从 "Subjective: ... Objective: ... Assessment: ... Plan: ..." 格式的文本中切出四段，
    /// 缺失的段为空字符串
    pub fn parse(text: &str) -> Self {
        const HEADERS: [&str; 4] = ["subjective:", "objective:", "assessment:", "plan:"];

        // ASCII 小写化不改变字节偏移
        let lower = text.to_ascii_lowercase();
        let mut found: Vec<(usize, usize, usize)> = HEADERS
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| lower.find(h).map(|start| (start, start + h.len(), idx)))
            .collect();
        found.sort_by_key(|(start, _, _)| *start);

        let mut sections: [String; 4] = Default::default();
        for (i, (_, body_start, idx)) in found.iter().enumerate() {
            let body_end = found.get(i + 1).map(|(s, _, _)| *s).unwrap_or(text.len());
            sections[*idx] = text[*body_start..body_end].trim().to_string();
        }

        let [subjective, objective, assessment, plan] = sections;
        SoapSections {
            subjective,
            objective,
            assessment,
            plan,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateSoapNoteRequest {
    pub patient_name: Option<String>,
    pub therapist_name: Option<String>,
    pub icd10: Option<String>,
    pub cpt: Option<String>,
    pub subjective: Option<String>,
    pub objective: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SoapNoteQuery {
    /// 按患者姓名模糊匹配
    pub patient_name: Option<String>,
    /// 按治疗师姓名模糊匹配
    pub therapist_name: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AudioFileInfo {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SoapNoteResponse {
    pub id: i32,
    #[serde(rename = "type")]
    pub note_type: String,
    pub input_type: InputType,
    pub patient_name: Option<String>,
    pub therapist_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub icd10: String,
    pub cpt: String,
    #[serde(flatten)]
    pub sections: SoapSections,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<AudioFileInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<soap_note_entity::Model> for SoapNoteResponse {
    fn from(m: soap_note_entity::Model) -> Self {
        let audio_file = match (m.audio_file_name, m.audio_mime_type) {
            (Some(file_name), Some(mime_type)) => Some(AudioFileInfo {
                file_name,
                mime_type,
                size_bytes: m.audio_size_bytes.unwrap_or(0),
            }),
            _ => None,
        };
        SoapNoteResponse {
            id: m.id,
            note_type: m.note_type,
            input_type: m.input_type,
            patient_name: m.patient_name,
            therapist_name: m.therapist_name,
            date: m.session_date,
            time: m.session_time,
            icd10: m.icd10,
            cpt: m.cpt,
            sections: SoapSections {
                subjective: m.subjective,
                objective: m.objective,
                assessment: m.assessment,
                plan: m.plan,
            },
            audio_file,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_request(text: &str) -> CreateSoapNoteRequest {
        CreateSoapNoteRequest {
            note_type: "Physical Therapy".into(),
            input_type: InputType::Text,
            text: Some(text.into()),
            audio: None,
            patient_name: None,
            therapist_name: None,
            date: "2025-03-01".into(),
            time: "10:30".into(),
            icd10: "M54.5".into(),
            cpt: "97110".into(),
        }
    }

    #[test]
    fn test_validate_text_request() {
        let req = text_request("Patient reports lower back pain");
        assert_eq!(
            req.validate().unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );

        let mut bad_type = text_request("x");
        bad_type.note_type = "Astrology".into();
        assert!(bad_type.validate().is_err());

        let mut missing_text = text_request("");
        missing_text.text = None;
        assert!(missing_text.validate().is_err());

        let mut bad_date = text_request("x");
        bad_date.date = "03/01/2025".into();
        assert!(bad_date.validate().is_err());

        let mut no_cpt = text_request("x");
        no_cpt.cpt = "  ".into();
        assert!(no_cpt.validate().is_err());
    }

    #[test]
    fn test_validate_audio_request() {
        let mut req = text_request("");
        req.input_type = InputType::Audio;
        req.text = None;
        assert!(req.validate().is_err());

        req.audio = Some(AudioPayload {
            file_name: "session.pdf".into(),
            mime_type: "application/pdf".into(),
            content_base64: STANDARD.encode(b"fake"),
            duration_minutes: Some(5.0),
        });
        assert!(req.validate().is_err());

        if let Some(audio) = req.audio.as_mut() {
            audio.mime_type = "audio/mpeg".into();
        }
        assert!(req.validate().is_ok());

        if let Some(audio) = req.audio.as_mut() {
            audio.content_base64 = String::new();
        }
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_decoded_len_matches_encoding() {
        for raw in [&b"a"[..], b"ab", b"abc", b"abcd", b"ID3 audio frame"] {
            let audio = AudioPayload {
                file_name: "a.mp3".into(),
                mime_type: "audio/mpeg".into(),
                content_base64: STANDARD.encode(raw),
                duration_minutes: None,
            };
            assert_eq!(audio.decoded_len(), raw.len());
        }
    }

    #[test]
    fn test_audio_mime_and_decode() {
        assert!(is_supported_audio_mime("audio/wav"));
        assert!(is_supported_audio_mime("application/ogg"));
        assert!(is_supported_audio_mime("application/octet-stream"));
        assert!(!is_supported_audio_mime("text/plain"));

        let audio = AudioPayload {
            file_name: "a.mp3".into(),
            mime_type: "audio/mpeg".into(),
            content_base64: STANDARD.encode(b"ID3 audio"),
            duration_minutes: None,
        };
        assert_eq!(audio.decode().unwrap(), b"ID3 audio".to_vec());

        let broken = AudioPayload {
            content_base64: "***".into(),
            ..audio
        };
        assert!(broken.decode().is_err());
    }

    #[test]
    fn test_parse_sections() {
        let raw = "Subjective:\nPatient reports pain.\n\nObjective:\nROM limited.\n\n\
                   Assessment:\nImproving.\n\nPlan:\nContinue exercises.";
        let sections = SoapSections::parse(raw);
        assert_eq!(sections.subjective, "Patient reports pain.");
        assert_eq!(sections.objective, "ROM limited.");
        assert_eq!(sections.assessment, "Improving.");
        assert_eq!(sections.plan, "Continue exercises.");

        let partial = SoapSections::parse("PLAN: rest");
        assert_eq!(partial.plan, "rest");
        assert!(partial.subjective.is_empty());
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("  one two\nthree\tfour "), 4);
        assert_eq!(word_count(""), 0);
    }
}
