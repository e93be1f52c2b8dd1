use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::extractor::{AuthUser, MaybeAuthUser};
use crate::db;
use crate::db::documents::NewDocument;
use crate::error::AppError;
use crate::middleware::audit::{self, Change};
use crate::middleware::request_meta::RequestMeta;
use crate::models::{ChangeType, Document, DocumentType, Project, is_allowed_mime};
use crate::routes::projects::{ensure, load};
use crate::state::SharedState;
use crate::storage;

/// Parsed multipart upload.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    doc_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
    is_public: Option<bool>,
}

#[derive(Debug)]
struct UploadedFile {
    file_name: String,
    content_type: String,
    data: Bytes,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct UpdateDocument {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

fn parse_doc_type(value: &str) -> Result<DocumentType, AppError> {
    DocumentType::parse(value).ok_or_else(|| {
        let valid: Vec<&str> = DocumentType::ALL.iter().map(|t| t.as_str()).collect();
        AppError::BadRequest(format!(
            "Invalid document type. Expected one of: {}",
            valid.join(", ")
        ))
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "on" | "yes")
}

/// Read the multipart body, enforcing the per-file size limit.
async fn parse_upload(
    headers: &HeaderMap,
    body: Bytes,
    max_size: usize,
) -> Result<UploadForm, AppError> {
    let boundary = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| AppError::BadRequest("Expected multipart/form-data".to_string()))?;

    let stream = futures_util::stream::once(async { Ok::<_, std::io::Error>(body) });
    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().per_field(max_size as u64));
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let data = field.bytes().await.map_err(multipart_error)?;
                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            "document_type" | "title" | "description" | "is_public" => {
                let value = field.text().await.map_err(multipart_error)?;
                match name.as_str() {
                    "document_type" => form.doc_type = Some(value),
                    "title" => form.title = Some(value),
                    "description" => form.description = Some(value),
                    _ => form.is_public = Some(parse_bool(&value)),
                }
            }
            _ => {
                tracing::debug!("Ignoring unexpected multipart field {name}");
            }
        }
    }

    Ok(form)
}

fn multipart_error(e: multer::Error) -> AppError {
    match e {
        multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
            AppError::PayloadTooLarge("File exceeds the maximum upload size".to_string())
        }
        e => AppError::BadRequest(format!("Invalid multipart body: {e}")),
    }
}

fn ensure_readable(project: &Project, viewer: Option<Uuid>) -> Result<bool, AppError> {
    ensure(
        project.can_view(viewer),
        "You do not have access to this project",
    )?;
    let can_edit = viewer.is_some_and(|id| project.can_edit(id));
    ensure(
        can_edit || project.enabled_modules.documents,
        "Documents are not enabled for this project",
    )?;
    Ok(can_edit)
}

pub async fn upload(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Document>, AppError> {
    let project = load(&state, project_id).await?;
    ensure(
        project.can_edit(auth.user_id),
        "You do not have permission to upload documents",
    )?;
    if !project.enabled_modules.documents {
        return Err(AppError::BadRequest(
            "Documents are not enabled for this project".to_string(),
        ));
    }

    let max_size = state.config.max_upload_size;
    let form = parse_upload(&headers, body, max_size).await?;

    let doc_type = parse_doc_type(
        form.doc_type
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("document_type is required".to_string()))?,
    )?;
    let file = form
        .file
        .ok_or_else(|| AppError::BadRequest("A file is required".to_string()))?;

    if file.data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }
    if file.data.len() > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File exceeds the maximum upload size of {} MB",
            max_size / (1024 * 1024)
        )));
    }
    if !is_allowed_mime(&file.content_type) {
        return Err(AppError::BadRequest(format!(
            "File type {} is not allowed",
            file.content_type
        )));
    }

    let title = form
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| file.file_name.clone());
    if title.chars().count() > 200 {
        return Err(AppError::BadRequest(
            "Title must be at most 200 characters".to_string(),
        ));
    }
    let description = form
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let key = storage::document_key(project_id, &storage::generate_file_name(&file.file_name));
    state
        .storage
        .put(&key, file.data.clone(), &file.content_type)
        .await?;

    let new = NewDocument {
        project_id,
        uploaded_by: auth.user_id,
        doc_type,
        title: &title,
        description: description.as_deref(),
        file_name: &file.file_name,
        mime_type: &file.content_type,
        size_bytes: file.data.len() as i64,
        storage_key: &key,
        is_public: form.is_public.unwrap_or(true),
    };

    let document = match db::documents::insert_version(&state.pool, &new).await {
        Ok(document) => document,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete(&key).await {
                tracing::error!("Failed to remove orphaned upload {key}: {cleanup}");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        project_id = %project_id,
        document_id = %document.id,
        doc_type = doc_type.as_str(),
        version = document.version,
        backend = state.storage.name(),
        "Document uploaded"
    );

    audit::record_one(
        &state.pool,
        project_id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::DocumentUpload,
            "documents",
            serde_json::Value::Null,
            serde_json::json!({
                "document_id": document.id,
                "type": doc_type,
                "version": document.version,
                "file_name": document.file_name,
            }),
        )
        .describe(format!("Uploaded {} v{}", doc_type.as_str(), document.version)),
    )
    .await;

    Ok(Json(document))
}

pub async fn list(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path(project_id): Path<Uuid>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Document>>, AppError> {
    let project = load(&state, project_id).await?;
    let can_edit = ensure_readable(&project, auth.user_id())?;

    let doc_type = q
        .doc_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(parse_doc_type)
        .transpose()?;

    let documents = db::documents::list(
        &state.pool,
        &db::documents::ListParams {
            project_id,
            doc_type,
            include_inactive: q.include_inactive,
            public_only: !can_edit,
        },
    )
    .await?;

    Ok(Json(documents))
}

pub async fn versions(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path((project_id, doc_type)): Path<(Uuid, String)>,
) -> Result<Json<Vec<Document>>, AppError> {
    let doc_type = parse_doc_type(&doc_type)?;
    let project = load(&state, project_id).await?;
    let can_edit = ensure_readable(&project, auth.user_id())?;

    let documents = db::documents::versions(&state.pool, project_id, doc_type, !can_edit).await?;
    Ok(Json(documents))
}

async fn load_document(
    state: &SharedState,
    project: &Project,
    document_id: Uuid,
    can_edit: bool,
) -> Result<Document, AppError> {
    db::documents::find_by_id(&state.pool, project.id, document_id)
        .await?
        .filter(|d| can_edit || d.is_public)
        .ok_or_else(|| AppError::NotFound("Document not found".to_string()))
}

pub async fn get(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Document>, AppError> {
    let project = load(&state, project_id).await?;
    let can_edit = ensure_readable(&project, auth.user_id())?;
    let document = load_document(&state, &project, document_id, can_edit).await?;
    Ok(Json(document))
}

pub async fn download(
    auth: MaybeAuthUser,
    State(state): State<SharedState>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let project = load(&state, project_id).await?;
    let can_edit = ensure_readable(&project, auth.user_id())?;
    let document = load_document(&state, &project, document_id, can_edit).await?;

    let object = state.storage.get(&document.storage_key).await?;
    let content_type = object
        .content_type
        .unwrap_or_else(|| document.mime_type.clone());

    let mut response = Body::from(object.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&document.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// `attachment` disposition with a filename safe to place inside quotes.
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

pub async fn update(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateDocument>,
) -> Result<Json<Document>, AppError> {
    let project = load(&state, project_id).await?;
    ensure(
        project.can_edit(auth.user_id),
        "You do not have permission to edit documents",
    )?;
    let document = load_document(&state, &project, document_id, true).await?;

    let title = match req.title.map(|t| t.trim().to_string()) {
        Some(t) if t.is_empty() || t.chars().count() > 200 => {
            return Err(AppError::BadRequest(
                "Title must be between 1 and 200 characters".to_string(),
            ));
        }
        Some(t) => t,
        None => document.title.clone(),
    };
    let description = match req.description {
        Some(d) => Some(d.trim().to_string()).filter(|d| !d.is_empty()),
        None => document.description.clone(),
    };
    let is_public = req.is_public.unwrap_or(document.is_public);

    let mut changes: Vec<(&str, serde_json::Value, serde_json::Value)> = Vec::new();
    if title != document.title {
        changes.push(("title", document.title.clone().into(), title.clone().into()));
    }
    if description != document.description {
        changes.push((
            "description",
            serde_json::json!(document.description),
            serde_json::json!(description),
        ));
    }
    if is_public != document.is_public {
        changes.push(("is_public", document.is_public.into(), is_public.into()));
    }
    if changes.is_empty() {
        return Ok(Json(document));
    }

    let updated = db::documents::update_metadata(
        &state.pool,
        document.id,
        &title,
        description.as_deref(),
        is_public,
    )
    .await?;

    let changes = changes
        .into_iter()
        .map(|(field, old, new)| {
            Change::field(
                ChangeType::DocumentUpdate,
                format!("document.{field}"),
                serde_json::json!({ "document_id": updated.id, field: old }),
                serde_json::json!({ "document_id": updated.id, field: new }),
            )
            .describe(format!("Updated {} v{}", updated.doc_type.as_str(), updated.version))
        })
        .collect();
    audit::record(&state.pool, project_id, auth.user_id, &meta, changes).await;

    Ok(Json(updated))
}

pub async fn delete(
    auth: AuthUser,
    meta: RequestMeta,
    State(state): State<SharedState>,
    Path((project_id, document_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = load(&state, project_id).await?;
    ensure(
        project.can_edit(auth.user_id),
        "You do not have permission to delete documents",
    )?;
    let document = load_document(&state, &project, document_id, true).await?;

    let deleted = db::documents::soft_delete(&state.pool, document.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Document not found".to_string()))?;

    if let Err(e) = state.storage.delete(&deleted.storage_key).await {
        tracing::error!(
            document_id = %deleted.id,
            "Failed to delete stored object {}: {e}",
            deleted.storage_key
        );
    }

    audit::record_one(
        &state.pool,
        project_id,
        auth.user_id,
        &meta,
        Change::field(
            ChangeType::DocumentDelete,
            "documents",
            serde_json::json!({
                "document_id": deleted.id,
                "type": deleted.doc_type,
                "version": deleted.version,
            }),
            serde_json::Value::Null,
        )
        .describe(format!("Deleted {} v{}", deleted.doc_type.as_str(), deleted.version)),
    )
    .await;

    Ok(Json(serde_json::json!({ "message": "Deleted" })))
}
