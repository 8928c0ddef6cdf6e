//! Remote store access, retrying HTTP, and local artifact output for oppsync.

mod http;
mod output;
mod remote;

pub use http::{
    decode_json, is_retryable_error, is_retryable_status, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher,
};
pub use output::{run_timestamp, OutputDir};
pub use remote::{
    normalize_path, FirebaseConfig, FirebaseRtdbStore, MemoryStore, RemoteStore, StoreError,
};

pub const CRATE_NAME: &str = "oppsync-storage";
