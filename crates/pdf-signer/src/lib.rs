pub mod config;
pub mod error;
pub mod events;
pub mod server;
pub mod signing;
pub mod validate;
pub mod workspace;

pub use config::{RetryPolicy, ServiceConfig};
pub use error::SigningServiceError;
pub use events::{RequestId, SigningEvents, TracingEvents};
pub use server::{AppState, router, run};
pub use signing::{
    DocumentSigner, PdfSigner, PdfSignerFactory, RetryingSigner, SignerFactory, SigningContext,
};
