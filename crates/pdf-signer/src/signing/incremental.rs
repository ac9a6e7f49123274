//! Incremental-update writer for a single invisible signature field.
//!
//! The original bytes are kept untouched; the update appends a signature
//! dictionary, a widget annotation, rewritten copies of the catalog and the
//! first page, and a new cross-reference section chained to the previous one
//! with `/Prev`. The `/Contents` hole is excluded from the signed ByteRange and
//! filled with the hex-encoded CMS blob afterwards.

use std::io::Write;

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::context::{SIGNATURE_FIELD_NAME, SignatureMetadata};
use super::pdf_object::{
    text_string, write_dictionary, write_indirect, write_literal_string, write_object,
};

/// Bytes reserved for the DER-encoded CMS signature, timestamp token included.
pub const SIGNATURE_CAPACITY: usize = 16 * 1024;

// Annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;
// SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

const BYTE_RANGE_PLACEHOLDER: &[u8] = b"[0 0000000000 0000000000 0000000000]";

/// Appends a signature to `source` and returns the complete signed document.
///
/// `sign` receives the exact bytes covered by the ByteRange and must return a
/// detached CMS signature over them.
pub fn sign_incrementally<F>(
    source: &[u8],
    metadata: &SignatureMetadata,
    signing_time: DateTime<Utc>,
    sign: F,
) -> Result<Vec<u8>>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>>,
{
    let plan = UpdatePlan::new(source)?;
    let mut prepared = plan.write(source, metadata, signing_time)?;

    let signed_bytes = prepared.seal_byte_range();
    let signature = sign(&signed_bytes).context("producing CMS signature")?;
    prepared.embed(&signature)?;

    Ok(prepared.bytes)
}

/// Objects to rewrite or add, resolved against the parsed original.
struct UpdatePlan {
    root_id: ObjectId,
    signature_id: ObjectId,
    /// Objects written after the signature value, in order.
    updated: Vec<(ObjectId, Object)>,
    next_id: u32,
    prev_xref: usize,
    xref_is_stream: bool,
    info: Option<Object>,
    document_id: Option<Object>,
}

impl UpdatePlan {
    fn new(source: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(source).context("parsing PDF document")?;
        if doc.trailer.has(b"Encrypt") || doc.is_encrypted() {
            bail!("encrypted PDF documents are not supported");
        }

        let root_id = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .context("trailer has no /Root reference")?;
        let page_id = *doc
            .get_pages()
            .values()
            .next()
            .context("document has no pages")?;

        let size = doc
            .trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .unwrap_or(doc.max_id + 1)
            .max(doc.max_id + 1);
        let signature_id = (size, 0);
        let field_id = (size + 1, 0);

        let prev_xref = last_startxref(source)?;
        let xref_is_stream = !source[prev_xref..].starts_with(b"xref");

        let mut updated = Vec::new();

        let mut catalog = doc
            .get_object(root_id)
            .and_then(Object::as_dict)
            .context("reading document catalog")?
            .clone();
        register_field(&doc, &mut catalog, field_id, &mut updated)?;

        let mut page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .context("reading first page")?
            .clone();
        append_reference(&doc, &mut page, b"Annots", field_id, &mut updated)?;

        updated.push((root_id, Object::Dictionary(catalog)));
        updated.push((page_id, Object::Dictionary(page)));
        updated.push((field_id, Object::Dictionary(widget(signature_id, page_id))));

        Ok(Self {
            root_id,
            signature_id,
            updated,
            next_id: size + 2,
            prev_xref,
            xref_is_stream,
            info: doc.trailer.get(b"Info").ok().cloned(),
            document_id: doc.trailer.get(b"ID").ok().cloned(),
        })
    }

    fn write(
        &self,
        source: &[u8],
        metadata: &SignatureMetadata,
        signing_time: DateTime<Utc>,
    ) -> Result<PreparedUpdate> {
        let mut out = Vec::with_capacity(source.len() + 2 * SIGNATURE_CAPACITY + 4096);
        out.extend_from_slice(source);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }

        let mut offsets = vec![(self.signature_id, out.len())];
        let (byte_range_at, contents_at) =
            write_signature_value(&mut out, self.signature_id, metadata, signing_time)?;

        for (id, object) in &self.updated {
            offsets.push((*id, out.len()));
            write_indirect(&mut out, *id, object)?;
        }

        if self.xref_is_stream {
            self.write_xref_stream(&mut out, offsets)?;
        } else {
            self.write_xref_table(&mut out, offsets)?;
        }

        Ok(PreparedUpdate {
            bytes: out,
            byte_range_at,
            contents_at,
        })
    }

    fn trailer_entries(&self, size: u32) -> Dictionary {
        let mut trailer = Dictionary::new();
        trailer.set("Size", Object::Integer(i64::from(size)));
        trailer.set("Root", Object::Reference(self.root_id));
        if let Some(info) = &self.info {
            trailer.set("Info", info.clone());
        }
        if let Some(id) = &self.document_id {
            trailer.set("ID", id.clone());
        }
        trailer.set("Prev", Object::Integer(self.prev_xref as i64));
        trailer
    }

    fn write_xref_table(&self, out: &mut Vec<u8>, mut offsets: Vec<(ObjectId, usize)>) -> Result<()> {
        offsets.sort_by_key(|(id, _)| id.0);
        let xref_at = out.len();

        out.extend_from_slice(b"xref\n");
        for ((number, generation), offset) in &offsets {
            writeln!(out, "{number} 1")?;
            write!(out, "{offset:010} {generation:05} n\r\n")?;
        }

        out.extend_from_slice(b"trailer\n");
        write_dictionary(out, &self.trailer_entries(self.next_id))?;
        write!(out, "\nstartxref\n{xref_at}\n%%EOF\n")?;
        Ok(())
    }

    fn write_xref_stream(&self, out: &mut Vec<u8>, mut offsets: Vec<(ObjectId, usize)>) -> Result<()> {
        let xref_id = (self.next_id, 0);
        let xref_at = out.len();
        offsets.push((xref_id, xref_at));
        offsets.sort_by_key(|(id, _)| id.0);

        // Field widths: type (1 byte), offset (4 bytes), generation (2 bytes).
        let mut index = Vec::with_capacity(offsets.len() * 2);
        let mut data = Vec::with_capacity(offsets.len() * 7);
        for ((number, generation), offset) in &offsets {
            let offset = u32::try_from(*offset).context("document too large for xref stream")?;
            index.push(Object::Integer(i64::from(*number)));
            index.push(Object::Integer(1));
            data.push(1);
            data.extend_from_slice(&offset.to_be_bytes());
            data.extend_from_slice(&generation.to_be_bytes());
        }

        let mut dict = self.trailer_entries(self.next_id + 1);
        dict.set("Type", Object::Name(b"XRef".to_vec()));
        dict.set(
            "W",
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(4),
                Object::Integer(2),
            ]),
        );
        dict.set("Index", Object::Array(index));
        dict.set("Length", Object::Integer(data.len() as i64));

        writeln!(out, "{} {} obj", xref_id.0, xref_id.1)?;
        write_dictionary(out, &dict)?;
        out.extend_from_slice(b"\nstream\n");
        out.extend_from_slice(&data);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        write!(out, "startxref\n{xref_at}\n%%EOF\n")?;
        Ok(())
    }
}

/// Assembled document whose `/Contents` still holds zeros.
struct PreparedUpdate {
    bytes: Vec<u8>,
    byte_range_at: usize,
    contents_at: usize,
}

impl PreparedUpdate {
    fn contents_end(&self) -> usize {
        self.contents_at + 2 * SIGNATURE_CAPACITY + 2
    }

    fn byte_range(&self) -> [usize; 4] {
        let end = self.contents_end();
        [0, self.contents_at, end, self.bytes.len() - end]
    }

    /// Patches `/ByteRange` and returns the bytes it covers.
    fn seal_byte_range(&mut self) -> Vec<u8> {
        let [_, first_len, second_at, second_len] = self.byte_range();
        let mut rendered = format!("[0 {first_len} {second_at} {second_len}]").into_bytes();
        rendered.resize(BYTE_RANGE_PLACEHOLDER.len(), b' ');
        self.bytes[self.byte_range_at..self.byte_range_at + rendered.len()]
            .copy_from_slice(&rendered);

        let mut covered = Vec::with_capacity(first_len + second_len);
        covered.extend_from_slice(&self.bytes[..first_len]);
        covered.extend_from_slice(&self.bytes[second_at..]);
        covered
    }

    fn embed(&mut self, signature: &[u8]) -> Result<()> {
        ensure!(
            signature.len() <= SIGNATURE_CAPACITY,
            "signature of {} bytes does not fit the {SIGNATURE_CAPACITY} bytes reserved",
            signature.len()
        );
        let encoded = hex::encode_upper(signature);
        let start = self.contents_at + 1;
        self.bytes[start..start + encoded.len()].copy_from_slice(encoded.as_bytes());
        Ok(())
    }
}

/// Writes the signature value dictionary with placeholders.
///
/// Returns the offsets of the ByteRange array and of the `<` opening
/// `/Contents`.
fn write_signature_value(
    out: &mut Vec<u8>,
    id: ObjectId,
    metadata: &SignatureMetadata,
    signing_time: DateTime<Utc>,
) -> Result<(usize, usize)> {
    writeln!(out, "{} {} obj", id.0, id.1)?;
    out.extend_from_slice(b"<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached");

    out.extend_from_slice(b" /ByteRange ");
    let byte_range_at = out.len();
    out.extend_from_slice(BYTE_RANGE_PLACEHOLDER);

    out.extend_from_slice(b" /Contents ");
    let contents_at = out.len();
    out.push(b'<');
    out.resize(out.len() + 2 * SIGNATURE_CAPACITY, b'0');
    out.push(b'>');

    out.extend_from_slice(b" /Reason ");
    write_object(out, &text_string(&metadata.reason))?;
    if let Some(name) = &metadata.signer_name {
        out.extend_from_slice(b" /Name ");
        write_object(out, &text_string(name))?;
    }
    out.extend_from_slice(b" /M ");
    write_literal_string(out, pdf_date(signing_time).as_bytes());
    out.extend_from_slice(b" >>\nendobj\n");

    Ok((byte_range_at, contents_at))
}

fn widget(signature_id: ObjectId, page_id: ObjectId) -> Dictionary {
    let mut field = Dictionary::new();
    field.set("Type", Object::Name(b"Annot".to_vec()));
    field.set("Subtype", Object::Name(b"Widget".to_vec()));
    field.set("FT", Object::Name(b"Sig".to_vec()));
    field.set("T", text_string(SIGNATURE_FIELD_NAME));
    field.set("V", Object::Reference(signature_id));
    field.set("F", Object::Integer(WIDGET_FLAGS));
    field.set("Rect", Object::Array(vec![Object::Integer(0); 4]));
    field.set("P", Object::Reference(page_id));
    field
}

/// Adds the field to the catalog's AcroForm, creating the form if needed.
fn register_field(
    doc: &Document,
    catalog: &mut Dictionary,
    field_id: ObjectId,
    updated: &mut Vec<(ObjectId, Object)>,
) -> Result<()> {
    match catalog.get(b"AcroForm") {
        Ok(Object::Reference(form_id)) => {
            let form_id = *form_id;
            let mut form = doc
                .get_object(form_id)
                .and_then(Object::as_dict)
                .context("reading AcroForm")?
                .clone();
            append_reference(doc, &mut form, b"Fields", field_id, updated)?;
            form.set("SigFlags", Object::Integer(SIG_FLAGS));
            updated.push((form_id, Object::Dictionary(form)));
        }
        Ok(Object::Dictionary(existing)) => {
            let mut form = existing.clone();
            append_reference(doc, &mut form, b"Fields", field_id, updated)?;
            form.set("SigFlags", Object::Integer(SIG_FLAGS));
            catalog.set("AcroForm", Object::Dictionary(form));
        }
        _ => {
            let mut form = Dictionary::new();
            form.set("Fields", Object::Array(vec![Object::Reference(field_id)]));
            form.set("SigFlags", Object::Integer(SIG_FLAGS));
            catalog.set("AcroForm", Object::Dictionary(form));
        }
    }
    Ok(())
}

/// Appends `value` to the array stored under `key`, direct or indirect.
fn append_reference(
    doc: &Document,
    container: &mut Dictionary,
    key: &[u8],
    value: ObjectId,
    updated: &mut Vec<(ObjectId, Object)>,
) -> Result<()> {
    match container.get(key) {
        Ok(Object::Reference(array_id)) => {
            let array_id = *array_id;
            let mut items = doc
                .get_object(array_id)
                .and_then(Object::as_array)
                .with_context(|| format!("reading /{}", String::from_utf8_lossy(key)))?
                .clone();
            items.push(Object::Reference(value));
            updated.push((array_id, Object::Array(items)));
        }
        Ok(Object::Array(items)) => {
            let mut items = items.clone();
            items.push(Object::Reference(value));
            container.set(key.to_vec(), Object::Array(items));
        }
        _ => container.set(key.to_vec(), Object::Array(vec![Object::Reference(value)])),
    }
    Ok(())
}

/// Offset recorded after the last `startxref` keyword.
fn last_startxref(source: &[u8]) -> Result<usize> {
    const KEYWORD: &[u8] = b"startxref";
    let position = source
        .windows(KEYWORD.len())
        .rposition(|window| window == KEYWORD)
        .context("no startxref keyword found")?;

    let digits: String = source[position + KEYWORD.len()..]
        .iter()
        .skip_while(|byte| byte.is_ascii_whitespace())
        .take_while(|byte| byte.is_ascii_digit())
        .map(|&byte| char::from(byte))
        .collect();
    let offset: usize = digits.parse().context("malformed startxref offset")?;
    ensure!(offset < source.len(), "startxref offset {offset} is past end of file");
    Ok(offset)
}

fn pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}
