pub mod engine;
pub mod extractor;
pub mod manager;
pub mod range;
pub mod registry;
pub mod signal;
pub mod source;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{TransferEngine, WorkerHandle};
pub use extractor::{Extractor, ExtractorSource, MediaInfo};
pub use manager::{CancelOutcome, PauseOutcome, ResumeOutcome, StartOutcome, TransferManager};
pub use range::{interpret_reply, range_header_value, RangeReply};
pub use registry::{StateCounts, TaskRegistry};
pub use signal::{Signal, SignalChannel};
pub use source::{build_http_client, HttpSource, SourceBody, SourceResponse, TransferSource};
pub use task::{format_speed, TransferDescriptor, TransferKind, TransferState, TransferTask};
