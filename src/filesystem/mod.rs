// Storage root file helpers
//
// Name resolution against the storage root plus the delete/rename/summary
// operations behind the file endpoints.

mod guard;
mod service;

pub use guard::{sanitize_file_name, PathGuard};
pub use service::{FilesystemService, FolderSummary};
