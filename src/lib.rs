pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{ExplorationMode, RankingConfig, SignalWeights};
pub use error::{Result, SearchError};
pub use services::{
    CompositeScorer, DiversityLayer, EmbeddingProvider, MemoryStatisticsStore, NeuralReranker,
    PositionBiasModel, RedisStatisticsStore, SearchPipeline, StatisticsStore, VectorRetriever,
};
