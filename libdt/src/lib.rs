//! Client library for a locally-run data transfer worker process.
//!
//! The library downloads and supervises the worker executable, keeps an
//! authorized HTTP session to its local API, and polls asynchronous transfer
//! operations until they complete. [`AsyncClient`] is the tokio-native entry
//! point; [`Client`] wraps it for blocking callers.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod retry;
pub mod utils;
pub mod worker;

pub use api::{AsOperationId, AsyncDataTransferApi, DataTransferApi, WaitOptions};
pub use client::{AsyncClient, Client, ClientOptions};
pub use config::{ConfigEvent, ConfigSnapshot, WorkerConfig};
pub use error::DtError;
pub use models::{OpIdResponse, Operation, OperationState, SrcDst, Status, StoragePath};
pub use retry::RetryPolicy;
pub use worker::Worker;
