pub mod delay_manager;
pub mod extractor;
pub mod fetcher;
pub mod logger;
pub mod orchestrator;
pub mod storage;

// Exporting types for convenience
pub use extractor::{extract_record, FlatRecord};
pub use fetcher::{
    FetchError, Fetcher, HttpSearchApi, RawPage, RawResponse, SearchApi, TransportError,
};
pub use orchestrator::{Orchestrator, Renewal, RunConfig, RunOutcome, RunReport, SearchSession};
pub use storage::{LogEntry, LogStatus, OutputStore, PageLabel, RunLog, StoreError};
