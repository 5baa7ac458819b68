//! Strategy runtime and the reference signal engines.

mod contract;
mod gateway;
mod mean_reversion;
mod plugin;
mod position;
mod registry;
mod repository;
mod runtime;
mod stat_arb;

pub use contract::{MarketDataEvent, Strategy, StrategyError};
pub use gateway::{OrderGateway, OrderSubmitter, StrategyOrder};
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use plugin::{
    CORE_VERSION, CleanupFn, PluginConfig, PluginError, PluginInfo, StrategyFactory,
    StrategyPlugin, validate_compatibility,
};
pub use position::{PairDirection, PairPosition, Position};
pub use registry::{RegistryError, StrategyRegistry};
pub use repository::{
    InMemoryPairPositionRepository, InMemoryPairRepository, InMemoryPairStatisticsRepository,
    PairPositionRepository, PairRecord, PairRepository, PairStatisticsRecord,
    PairStatisticsRepository, RepositoryError,
};
pub use runtime::{
    MARKET_DATA_POOL, ORDER_UPDATE_POOL, RuntimeConfig, RuntimeError, RuntimeMetrics,
    StrategyDispatchMetrics, StrategyRuntime,
};
pub use stat_arb::{StatArbConfig, StatArbStrategy};
