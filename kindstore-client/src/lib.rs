/// Async client for a Datastore-style entity service
///
/// Connects with a service account, keeps the bearer token fresh in the
/// background and maps schema-bound entities onto lookup, query and commit
/// calls, with batches and transactions on top.

pub mod error;
pub mod config;
pub mod transport;
pub mod auth; // service-account token exchange
pub mod query;
pub mod mutation;
pub mod client;
pub mod batch;
pub mod transaction;
pub mod retry;

// Re-export key types
pub use auth::{Claims, Rs256Signer, TokenSigner};
pub use batch::Batch;
pub use client::{Client, Endpoint};
pub use config::{ClientConfig, ServiceAccount};
pub use error::{ClientError, Result};
pub use mutation::{MutationKind, Mutations, Operand};
pub use query::{Query, ReadConsistency, ReadOptions};
pub use retry::RetryPolicy;
pub use transaction::{Transaction, TransactionOptions, TransactionState};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport};

pub use kindstore_core;
