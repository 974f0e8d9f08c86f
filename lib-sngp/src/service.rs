//! Reward pool service
//!
//! Wires one store, the configuration and the external gateways into the
//! engine components. This is the surface an HTTP layer or job runner holds.

use std::sync::Arc;

use crate::allocator::{AllocationOutcome, AllocationRequest, PointAllocator};
use crate::claim::{ClaimOutcome, ClaimProcessor, ClaimableSummary};
use crate::config::EngineConfig;
use crate::distribution::{DistributionEngine, DistributionReport};
use crate::error::{SngpError, SngpResult};
use crate::gateways::{EligibilitySettingsGateway, NodeActivityGateway, TeamGateway, WalletLedgerGateway};
use crate::participation::{ParticipationLedger, ParticipationRecord};
use crate::pools::{NewPool, Pool, PoolRegistry};
use crate::queries::{ParticipationFilter, PoolFilter, QueryService, RewardFilter, RunFilter};
use crate::rewards::RewardRecord;
use crate::runs::DistributionRun;
use crate::storage::SledStore;
use crate::types::{DateRange, Page, PageRequest, ParticipationStatus, PoolCategory, PoolId, RecordId, RunId, UserId};
use crate::wallet_ledger::SledWalletLedger;

/// External collaborators the service depends on
#[derive(Clone)]
pub struct Gateways {
    pub settings: Arc<dyn EligibilitySettingsGateway>,
    pub node_activity: Arc<dyn NodeActivityGateway>,
    pub team: Arc<dyn TeamGateway>,
}

pub struct RewardPoolService {
    store: SledStore,
    config: EngineConfig,
    wallets: SledWalletLedger,
    registry: PoolRegistry,
    participation: ParticipationLedger,
    allocator: PointAllocator,
    engine: DistributionEngine,
    claims: ClaimProcessor,
    queries: QueryService,
}

impl RewardPoolService {
    /// Validate `config`, open its store and build every component
    pub fn open(config: EngineConfig, gateways: Gateways) -> SngpResult<Self> {
        config
            .validate()
            .map_err(|e| SngpError::InvalidInput(e.to_string()))?;

        let store = if config.storage.temporary {
            SledStore::open_temporary()?
        } else {
            SledStore::open(&config.storage.path)?
        };

        tracing::info!(
            path = %config.storage.path.display(),
            temporary = config.storage.temporary,
            "SNGP store opened"
        );

        Ok(Self::with_store(store, config, gateways))
    }

    /// Build on an already opened store; claims credit the store's own wallet ledger
    pub fn with_store(store: SledStore, config: EngineConfig, gateways: Gateways) -> Self {
        let wallets = SledWalletLedger::new(store.clone());
        let wallet_gateway: Arc<dyn WalletLedgerGateway> = Arc::new(wallets.clone());

        Self {
            registry: PoolRegistry::new(store.clone()),
            participation: ParticipationLedger::new(store.clone()),
            allocator: PointAllocator::new(store.clone()),
            engine: DistributionEngine::new(
                store.clone(),
                Arc::clone(&gateways.settings),
                Arc::clone(&gateways.node_activity),
                config.rewards.migration_remark.clone(),
                config.rewards.amount_scale,
            ),
            claims: ClaimProcessor::new(
                store.clone(),
                wallet_gateway,
                Arc::clone(&gateways.settings),
                config.rewards.claim_reason_code.clone(),
            ),
            queries: QueryService::new(store.clone(), config.queries.clone(), gateways.team),
            wallets,
            store,
            config,
        }
    }

    pub fn store(&self) -> &SledStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn wallets(&self) -> &SledWalletLedger {
        &self.wallets
    }

    // ------------------------------------------------------------------------
    // Engine
    // ------------------------------------------------------------------------

    pub async fn allocate(&self, request: AllocationRequest) -> SngpResult<AllocationOutcome> {
        self.allocator.allocate(request).await
    }

    pub async fn distribute(
        &self,
        operator: UserId,
        run_id: RunId,
        note: Option<String>,
    ) -> SngpResult<DistributionReport> {
        self.engine.distribute(operator, run_id, note).await
    }

    pub async fn claim(&self, user: UserId, category: PoolCategory) -> SngpResult<ClaimOutcome> {
        self.claims.claim(user, category).await
    }

    pub async fn claimable_summary(&self, user: UserId, category: PoolCategory) -> SngpResult<ClaimableSummary> {
        self.claims.claimable_summary(user, category).await
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    pub async fn create_pool(&self, new_pool: NewPool) -> SngpResult<Pool> {
        self.registry.create_pool(new_pool).await
    }

    pub async fn soft_delete_pool(&self, id: PoolId) -> SngpResult<Pool> {
        self.registry.soft_delete_pool(id).await
    }

    pub async fn set_primary_activity_pool(&self, id: PoolId, primary: bool) -> SngpResult<Pool> {
        self.registry.set_primary_activity_pool(id, primary).await
    }

    pub async fn set_participation_status(
        &self,
        pool: PoolId,
        record: RecordId,
        status: ParticipationStatus,
    ) -> SngpResult<ParticipationRecord> {
        self.participation.set_participation_status(pool, record, status).await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get_pool(&self, id: PoolId) -> SngpResult<Pool> {
        self.registry.get_pool(id)
    }

    pub fn list_pools(&self, filter: &PoolFilter, page: PageRequest) -> SngpResult<Page<Pool>> {
        self.queries.list_pools(filter, page)
    }

    pub fn get_run(&self, id: RunId) -> SngpResult<DistributionRun> {
        self.queries.get_run(id)
    }

    pub fn list_runs(&self, filter: &RunFilter, page: PageRequest) -> SngpResult<Page<DistributionRun>> {
        self.queries.list_runs(filter, page)
    }

    pub fn participation_history(
        &self,
        filter: &ParticipationFilter,
        page: PageRequest,
    ) -> SngpResult<Page<ParticipationRecord>> {
        self.queries.participation_history(filter, page)
    }

    pub fn reward_history(&self, filter: &RewardFilter, page: PageRequest) -> SngpResult<Page<RewardRecord>> {
        self.queries.reward_history(filter, page)
    }

    pub fn claim_history(&self, user: UserId, range: DateRange, page: PageRequest) -> SngpResult<Page<RewardRecord>> {
        self.queries.claim_history(user, range, page)
    }

    pub async fn team_reward_history(
        &self,
        leader: UserId,
        filter: &RewardFilter,
        page: PageRequest,
    ) -> SngpResult<Page<RewardRecord>> {
        self.queries.team_reward_history(leader, filter, page).await
    }
}
