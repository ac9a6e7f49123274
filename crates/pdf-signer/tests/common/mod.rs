#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::Bytes,
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use cryptographic_message_syntax::{SignedData, SignedDataBuilder, SignerBuilder};
use lopdf::{Dictionary, Document, Object};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509, X509NameBuilder};
use simple_pdf_signer::signing::{
    DocumentSigner, SignerFactory, SigningContext, detached_signature, sign_incrementally,
};
use url::Url;
use x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair};

/// One-page document with a classic cross-reference table.
pub fn minimal_pdf() -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>",
    ];
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", index + 1).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f\r\n");
    for offset in offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n\r\n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    out
}

/// Self-signed RSA key and certificate.
pub fn self_signed(common_name: &str) -> (PKey<Private>, X509) {
    let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();

    (pkey, builder.build())
}

/// Self-signed RSA certificate packed into a PKCS#12 bundle.
pub fn pkcs12_bundle(common_name: &str, passphrase: &str) -> Vec<u8> {
    let (pkey, cert) = self_signed(common_name);
    Pkcs12::builder()
        .name(common_name)
        .pkey(&pkey)
        .cert(&cert)
        .build2(passphrase)
        .unwrap()
        .to_der()
        .unwrap()
}

/// Hand-built `multipart/form-data` body.
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "pdf-signer-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self
    }

    /// Returns the `Content-Type` header value and the encoded body.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

// ── signed document inspection ──────────────────────────────────────

pub fn signature_dictionary(document: &Document) -> Dictionary {
    document
        .objects
        .values()
        .filter_map(|object| object.as_dict().ok())
        .find(|dict| {
            dict.get(b"Type")
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Sig")
        })
        .cloned()
        .expect("signed document has a signature dictionary")
}

pub fn byte_range(signature: &Dictionary) -> Vec<usize> {
    signature
        .get(b"ByteRange")
        .and_then(Object::as_array)
        .unwrap()
        .iter()
        .map(|value| value.as_i64().unwrap() as usize)
        .collect()
}

/// The bytes the ByteRange says were signed.
pub fn covered_bytes(signed: &[u8], range: &[usize]) -> Vec<u8> {
    let mut covered = signed[range[0]..range[0] + range[1]].to_vec();
    covered.extend_from_slice(&signed[range[2]..range[2] + range[3]]);
    covered
}

/// The CMS blob from `/Contents`, without the zero padding after it.
pub fn cms_signature(signature: &Dictionary) -> Vec<u8> {
    let contents = signature
        .get(b"Contents")
        .and_then(Object::as_str)
        .unwrap();
    let len = match contents[1] {
        short if short < 0x80 => 2 + short as usize,
        long => {
            let count = (long & 0x7f) as usize;
            let body = contents[2..2 + count]
                .iter()
                .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
            2 + count + body
        }
    };
    contents[..len].to_vec()
}

pub fn verify_cms(cms: &[u8], covered: &[u8]) -> Result<(), openssl::error::ErrorStack> {
    let pkcs7 = Pkcs7::from_der(cms)?;
    let store = X509StoreBuilder::new()?.build();
    let certs: Stack<X509> = Stack::new()?;
    pkcs7.verify(
        &certs,
        &store,
        Some(covered),
        None,
        Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
    )
}

/// Parses `signed`, checks its signature over the ByteRange and returns the
/// CMS blob.
pub fn verify_signed_pdf(signed: &[u8]) -> Vec<u8> {
    let document = Document::load_mem(signed).unwrap();
    let signature = signature_dictionary(&document);
    let range = byte_range(&signature);
    assert_eq!(range[0], 0);
    assert_eq!(range[2] + range[3], signed.len());

    let cms = cms_signature(&signature);
    verify_cms(&cms, &covered_bytes(signed, &range)).unwrap();
    cms
}

/// Whether the first signer of `cms` carries an RFC 3161 token.
pub fn has_time_stamp_token(cms: &[u8]) -> bool {
    let signed_data = SignedData::parse_ber(cms).unwrap();
    let signer = signed_data.signers().next().unwrap();
    signer.time_stamp_token_signed_data().unwrap().is_some()
}

// ── signers without a timestamp authority ───────────────────────────

/// Production pipeline minus the timestamp round trip.
pub struct OfflineSigner(pub SigningContext);

impl DocumentSigner for OfflineSigner {
    fn sign(&self, source: &Path) -> anyhow::Result<Vec<u8>> {
        let original = std::fs::read(source)?;
        sign_incrementally(&original, &self.0.metadata, Utc::now(), |covered| {
            detached_signature(&self.0.identity, covered, None)
        })
    }
}

pub struct OfflineSigners;

impl SignerFactory for OfflineSigners {
    fn signer(&self, context: SigningContext) -> Arc<dyn DocumentSigner> {
        Arc::new(OfflineSigner(context))
    }
}

// ── local timestamp authority ───────────────────────────────────────

/// Answers RFC 3161 requests over HTTP with a fixed, signed token.
pub struct TimestampAuthority {
    pub url: Url,
    requests: Arc<AtomicUsize>,
}

impl TimestampAuthority {
    /// Listens on a free local port; the first `failures` requests get a 503.
    pub async fn spawn(failures: usize) -> Self {
        let reply = time_stamp_reply(&stub_token());
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        let app = Router::new().route(
            "/tsr",
            post(move |_query: Bytes| {
                let reply = reply.clone();
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        return StatusCode::SERVICE_UNAVAILABLE.into_response();
                    }
                    ([(CONTENT_TYPE, "application/timestamp-reply")], reply).into_response()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: Url::parse(&format!("http://{address}/tsr")).unwrap(),
            requests,
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// A CMS `SignedData` over plain data. It carries no TSTInfo, so clients
/// have no nonce to check against their request.
fn stub_token() -> Vec<u8> {
    let (pkey, cert) = self_signed("Local TSA");
    let key = InMemorySigningKeyPair::from_pkcs8_der(pkey.private_key_to_pkcs8().unwrap()).unwrap();
    let cert = CapturedX509Certificate::from_der(cert.to_der().unwrap()).unwrap();

    SignedDataBuilder::default()
        .content_inline(b"local timestamp".to_vec())
        .signer(SignerBuilder::new(&key, cert.clone()))
        .certificate(cert)
        .build_der()
        .unwrap()
}

/// `TimeStampResp ::= SEQUENCE { status PKIStatusInfo (granted), token }`
fn time_stamp_reply(token: &[u8]) -> Vec<u8> {
    let mut content = vec![0x30, 0x03, 0x02, 0x01, 0x00];
    content.extend_from_slice(token);

    let mut reply = vec![0x30];
    reply.extend(der_length(content.len()));
    reply.extend(content);
    reply
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|byte| **byte == 0).count();
    let mut encoded = vec![0x80 | (bytes.len() - skip) as u8];
    encoded.extend_from_slice(&bytes[skip..]);
    encoded
}
