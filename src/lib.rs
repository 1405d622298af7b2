// Frame-to-state extraction pipeline for card-table screen captures:
// change gating, cached ensemble recognition, temporal consensus,
// cross-field validation and a reliability supervisor around it all.

pub mod cache;
pub mod change;
pub mod config;
pub mod consensus;
pub mod ensemble;
pub mod health;
pub mod persist;
pub mod pipeline;
pub mod recovery;
pub mod resource;
pub mod roi;
pub mod types;
pub mod validate;
pub mod watchdog;

pub use cache::RecognitionCache;
pub use change::ChangeDetector;
pub use config::PipelineConfig;
pub use consensus::ConsensusTracker;
pub use ensemble::{EnsembleRecognizer, RecognitionStrategy, StrategyVote};
pub use pipeline::{HealthReport, Pipeline};
pub use persist::SnapshotStore;
pub use recovery::{FallbackChain, RecoveryAction, RecoveryManager};
pub use roi::{RoiName, RoiRegistry};
pub use types::{
    Card, ConfidenceTier, ExtractionKind, FieldId, FieldValue, Frame, PartialState, Rank,
    RecognitionResult, Suit,
};
