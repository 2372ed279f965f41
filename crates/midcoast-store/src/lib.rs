//! File-backed implementations of the pipeline collaborators.

pub mod alerter;
pub mod enricher;
pub mod exporter;
pub mod filter;
pub mod manager;
pub mod reports;
pub mod scorer;

pub use alerter::LogAlerter;
pub use enricher::HeuristicEnricher;
pub use exporter::FileExporter;
pub use filter::KeywordLeadFilter;
pub use manager::FileLeadManager;
pub use reports::FileReportGenerator;
pub use scorer::{HeuristicScorer, ScoringWeights};
