use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::StatusCode,
};
use zeroize::Zeroizing;

use crate::error::SigningServiceError;
use crate::validate::{UploadParts, ValidationError, validate_upload};

pub const DOCUMENT_FIELD: &str = "file";
pub const CERTIFICATE_FIELD: &str = "cert";
pub const PASSWORD_FIELD: &str = "password";

/// The `/sign-pdf` multipart form, read in full but not yet validated.
#[derive(Default)]
pub struct SigningForm {
    pub document: Option<Bytes>,
    pub document_content_type: Option<String>,
    pub certificate: Option<Bytes>,
    pub password: Zeroizing<String>,
}

/// A validated upload, ready for the signer context builder.
pub struct SigningRequest {
    pub document: Bytes,
    pub certificate: Bytes,
    /// Empty when the caller sent no password.
    pub passphrase: Zeroizing<String>,
}

impl SigningForm {
    pub fn into_request(self) -> Result<SigningRequest, ValidationError> {
        validate_upload(&UploadParts {
            document: self.document.as_deref(),
            document_content_type: self.document_content_type.as_deref(),
            certificate: self.certificate.as_deref(),
        })?;

        match (self.document, self.certificate) {
            (Some(document), Some(certificate)) => Ok(SigningRequest {
                document,
                certificate,
                passphrase: self.password,
            }),
            _ => Err(ValidationError::MissingPart),
        }
    }
}

impl<S> FromRequest<S> for SigningForm
where
    S: Send + Sync,
{
    type Rejection = SigningServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => {
                    SigningServiceError::PayloadTooLarge(rejection.body_text())
                }
                _ => SigningServiceError::MalformedForm(rejection.body_text()),
            })?;

        let mut form = SigningForm::default();
        while let Some(field) = multipart.next_field().await.map_err(form_error)? {
            match field.name() {
                Some(DOCUMENT_FIELD) => {
                    form.document_content_type = field.content_type().map(str::to_owned);
                    form.document = Some(field.bytes().await.map_err(form_error)?);
                }
                Some(CERTIFICATE_FIELD) => {
                    form.certificate = Some(field.bytes().await.map_err(form_error)?);
                }
                Some(PASSWORD_FIELD) => {
                    form.password = Zeroizing::new(field.text().await.map_err(form_error)?);
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

fn form_error(error: MultipartError) -> SigningServiceError {
    match error.status() {
        StatusCode::PAYLOAD_TOO_LARGE => SigningServiceError::PayloadTooLarge(error.body_text()),
        _ => SigningServiceError::MalformedForm(error.body_text()),
    }
}
