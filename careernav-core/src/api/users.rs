//! `/users/me` endpoints: profile, skills, career history, education, resume.

use std::path::Path;

use uuid::Uuid;

use super::client::{ApiClient, ApiRequest, FilePart};
use super::error::ApiError;
use crate::types::{
    CareerHistory, CareerHistoryCreate, CareerHistoryUpdate, Education, EducationCreate,
    EducationUpdate, FieldError, Skill, SkillCreate, SkillUpdate, User, UserProfile, UserUpdate,
};

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Largest resume the backend accepts.
pub const MAX_RESUME_BYTES: usize = 10 * 1024 * 1024;

/// A resume ready for upload.
#[derive(Debug, Clone)]
pub struct ResumeFile {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ResumeFile {
    /// Read a resume from disk, inferring the content type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pdf") => PDF_MIME,
            Some("docx") => DOCX_MIME,
            _ => {
                return Err(ApiError::invalid(vec![FieldError::new(
                    "file",
                    "Only PDF and DOCX files are allowed",
                )]))
            }
        };
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::invalid(vec![FieldError::new(
                "file",
                format!("Could not read {}: {}", path.display(), e),
            )])
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resume".to_string());

        Ok(Self {
            file_name,
            mime: mime.to_string(),
            bytes,
        })
    }

    /// Same checks the backend applies: type and size.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.mime != PDF_MIME && self.mime != DOCX_MIME {
            return Err(ApiError::invalid(vec![FieldError::new(
                "file",
                "Only PDF and DOCX files are allowed",
            )]));
        }
        if self.bytes.len() > MAX_RESUME_BYTES {
            return Err(ApiError::invalid(vec![FieldError::new(
                "file",
                "File size must be less than 10MB",
            )]));
        }
        Ok(())
    }
}

impl ApiClient {
    // =========================================================================
    // Profile
    // =========================================================================

    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        self.get_json("/users/me").await
    }

    pub async fn update_profile(&self, update: &UserUpdate) -> Result<User, ApiError> {
        self.put_json("/users/me", update).await
    }

    // =========================================================================
    // Skills
    // =========================================================================

    pub async fn list_skills(&self) -> Result<Vec<Skill>, ApiError> {
        self.get_json("/users/me/skills").await
    }

    pub async fn add_skill(&self, skill: &SkillCreate) -> Result<Skill, ApiError> {
        skill.validate().map_err(ApiError::invalid)?;
        self.post_json("/users/me/skills", skill).await
    }

    pub async fn add_skills_bulk(&self, skills: &[SkillCreate]) -> Result<Vec<Skill>, ApiError> {
        let errors: Vec<FieldError> = skills
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.validate().err().map(|errs| (i, errs)))
            .flat_map(|(i, errs)| {
                errs.into_iter()
                    .map(move |e| FieldError::new(format!("{}.{}", i, e.field), e.message))
            })
            .collect();
        if !errors.is_empty() {
            return Err(ApiError::invalid(errors));
        }
        self.post_json("/users/me/skills/bulk", skills).await
    }

    pub async fn update_skill(&self, id: Uuid, update: &SkillUpdate) -> Result<Skill, ApiError> {
        self.put_json(&format!("/users/me/skills/{}", id), update)
            .await
    }

    pub async fn delete_skill(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/users/me/skills/{}", id)).await
    }

    // =========================================================================
    // Career History
    // =========================================================================

    pub async fn list_career(&self) -> Result<Vec<CareerHistory>, ApiError> {
        self.get_json("/users/me/career").await
    }

    pub async fn add_career(&self, entry: &CareerHistoryCreate) -> Result<CareerHistory, ApiError> {
        self.post_json("/users/me/career", entry).await
    }

    pub async fn update_career(
        &self,
        id: Uuid,
        update: &CareerHistoryUpdate,
    ) -> Result<CareerHistory, ApiError> {
        self.put_json(&format!("/users/me/career/{}", id), update)
            .await
    }

    pub async fn delete_career(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/users/me/career/{}", id)).await
    }

    // =========================================================================
    // Education
    // =========================================================================

    pub async fn list_education(&self) -> Result<Vec<Education>, ApiError> {
        self.get_json("/users/me/education").await
    }

    pub async fn add_education(&self, entry: &EducationCreate) -> Result<Education, ApiError> {
        self.post_json("/users/me/education", entry).await
    }

    pub async fn update_education(
        &self,
        id: Uuid,
        update: &EducationUpdate,
    ) -> Result<Education, ApiError> {
        self.put_json(&format!("/users/me/education/{}", id), update)
            .await
    }

    pub async fn delete_education(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/users/me/education/{}", id)).await
    }

    // =========================================================================
    // Resume
    // =========================================================================

    /// Upload a resume as multipart field `file`.
    pub async fn upload_resume(&self, resume: ResumeFile) -> Result<User, ApiError> {
        resume.validate()?;
        let request = ApiRequest::post("/users/me/resume").multipart(FilePart {
            field: "file".to_string(),
            file_name: resume.file_name,
            mime: resume.mime,
            bytes: resume.bytes,
        });
        self.send_json(request).await
    }
}
