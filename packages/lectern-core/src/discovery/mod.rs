//! Discovery workers.
//!
//! Two periodic pullers normalize heterogeneous external catalogs into
//! the shared content queue: [`feeds::FeedPuller`] for RSS/Atom
//! newsletter sources and [`listening::ListeningHistoryPuller`] for
//! podcast listening history. Both are idempotent and tolerate
//! per-source failures. The queue is read by clients choosing what to
//! process, never directly by the orchestrator.

pub mod feeds;
pub mod listening;
pub mod rss;

pub use feeds::{queue_items_from_feed, FeedPuller, SweepReport};
pub use listening::{queue_items_from_history, HistoryEpisode, ListeningHistoryPuller};
pub use rss::{DiscoveredFeed, FeedDiscovery, PreviewPost};
