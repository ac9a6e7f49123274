use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;

/// Magic bytes every PDF file starts with.
pub const PDF_MAGIC: &[u8; 5] = b"%PDF-";

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Why an upload was refused before any signing work.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("both 'file' (PDF) and 'cert' (.pfx) must be supplied")]
    MissingPart,
    #[error("the uploaded file is not a PDF")]
    NotPdf,
    #[error("invalid PDF header")]
    InvalidHeader,
}

/// Upload fields as they came off the wire, before validation.
#[derive(Debug, Default)]
pub struct UploadParts<'a> {
    pub document: Option<&'a [u8]>,
    pub document_content_type: Option<&'a str>,
    pub certificate: Option<&'a [u8]>,
}

/// Runs every upload check in order: presence, declared type, magic header.
pub fn validate_upload(parts: &UploadParts<'_>) -> Result<(), ValidationError> {
    let (Some(document), Some(_)) = (parts.document, parts.certificate) else {
        return Err(ValidationError::MissingPart);
    };

    if !is_pdf_media_type(parts.document_content_type) {
        return Err(ValidationError::NotPdf);
    }

    let mut cursor = io::Cursor::new(document);
    match has_pdf_header(&mut cursor) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(ValidationError::InvalidHeader),
    }
}

/// Compares the media-type essence, ignoring parameters and case.
pub fn is_pdf_media_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE))
        .unwrap_or(false)
}

/// Reads at most five bytes and rewinds the reader to where it started.
pub fn has_pdf_header<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let start = reader.stream_position()?;

    let mut head = [0u8; PDF_MAGIC.len()];
    let mut filled = 0;
    let result = loop {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break Ok(false),
            Ok(n) => {
                filled += n;
                if filled == head.len() {
                    break Ok(&head == PDF_MAGIC);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };

    reader.seek(SeekFrom::Start(start))?;
    result
}
