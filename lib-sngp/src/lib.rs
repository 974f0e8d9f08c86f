//! SNGP Reward Pool Engine
//!
//! Points-based reward pools: participants accrue points against a pool's
//! bounded capacity, an operator distributes the pool's budget
//! proportionally under a per-user multiplier cap, and participants claim
//! their share into a wallet balance exactly once.
//!
//! LIFECYCLE
//!
//! - Allocate: external point events become participation rows, clipped to
//!   the pool's remaining capacity ([`PointAllocator`])
//! - Exhaust: the last point moves the pool's run to WAIT_FOR_CONFIRMATION
//! - Distribute: one atomic run writes every reward record ([`DistributionEngine`])
//! - Claim: unclaimed receivable rewards are credited and flipped to CLAIMED
//!   in one unit of work ([`ClaimProcessor`])
//!
//! External subsystems (wallets, settings, node activity, teams) are reached
//! only through the traits in [`gateways`].

pub mod allocator;
pub mod claim;
pub mod config;
pub mod distribution;
pub mod error;
pub mod gateways;
pub mod logging;
pub mod participation;
pub mod pools;
pub mod queries;
pub mod rewards;
pub mod runs;
pub mod service;
pub mod storage;
pub mod testing;
pub mod types;
pub mod wallet_ledger;

// Re-export main types
pub use allocator::{Allocation, AllocationOutcome, AllocationRequest, PointAllocator};
pub use claim::{ClaimOutcome, ClaimProcessor, ClaimableSummary};
pub use config::{load_configuration, ConfigError, EngineConfig};
pub use distribution::{compute_reward, DistributionEngine, DistributionReport, Eligibility, RewardTerms};
pub use error::{ErrorKind, SngpError, SngpResult};
pub use participation::{ParticipationLedger, ParticipationRecord, UserPoints};
pub use pools::{NewPool, Pool, PoolRegistry};
pub use queries::{ParticipationFilter, PoolFilter, QueryService, RewardFilter, RunFilter};
pub use rewards::{ClaimFilter, RewardRecord, RewardSnapshot};
pub use runs::DistributionRun;
pub use service::{Gateways, RewardPoolService};
pub use storage::{SledStore, StorageError, UnitOfWork};
pub use types::*;
pub use wallet_ledger::SledWalletLedger;
