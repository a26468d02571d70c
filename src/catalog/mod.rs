mod episode;
mod list;
mod store;

pub use episode::{
    END_BARRIER_MS, Episode, KEEP_MARKER, PINNED_CLASS, RESUME_OVERLAP_MS, SKIP_BACKWARD_MS,
    SKIP_FORWARD_MS,
};
pub use list::{Catalog, UpdateOutcome};
pub use store::{CatalogStore, RefreshSummary};
