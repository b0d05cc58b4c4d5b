pub mod diversity;
pub mod pipeline;
pub mod position_bias;
pub mod ranking;
pub mod rerank;
pub mod retrieval;
pub mod signals;
pub mod statistics;

pub use diversity::DiversityLayer;
pub use pipeline::SearchPipeline;
pub use position_bias::PositionBiasModel;
pub use ranking::CompositeScorer;
pub use rerank::NeuralReranker;
pub use retrieval::{EmbeddingProvider, VectorRetriever};
pub use signals::{ExplorationEstimator, FreshnessEstimator, PopularityEstimator};
pub use statistics::{MemoryStatisticsStore, RedisStatisticsStore, StatisticsStore};
