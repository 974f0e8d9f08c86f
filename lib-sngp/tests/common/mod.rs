//! Shared fixtures for lib-sngp integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use lib_sngp::gateways::{EligibilitySettingsGateway, NodeActivityGateway};
use lib_sngp::testing::{StaticSettings, StaticTeam};
use lib_sngp::*;

pub const ALICE: UserId = UserId(101);
pub const BOB: UserId = UserId(102);
pub const CAROL: UserId = UserId(103);
pub const DAVE: UserId = UserId(104);
pub const OPERATOR: UserId = UserId(900);

pub fn service_with(
    settings: impl EligibilitySettingsGateway + 'static,
    node_activity: impl NodeActivityGateway + 'static,
    team: StaticTeam,
) -> RewardPoolService {
    let mut config = EngineConfig::default();
    config.storage.temporary = true;

    RewardPoolService::open(
        config,
        Gateways {
            settings: Arc::new(settings),
            node_activity: Arc::new(node_activity),
            team: Arc::new(team),
        },
    )
    .unwrap()
}

pub fn service(node_activity: impl NodeActivityGateway + 'static) -> RewardPoolService {
    service_with(StaticSettings::sngp(dec!(1)), node_activity, StaticTeam::new())
}

pub fn pool_terms(category: PoolCategory, total_points: u64, reward_amount: Decimal, multiplier: Decimal) -> NewPool {
    NewPool {
        name: format!("{} pool", category),
        category,
        total_points,
        reward_amount,
        multiplier,
        start_date: Utc::now() - Duration::minutes(5),
        is_primary_activity: false,
    }
}

/// totalPoints=1000, rewardAmount=100, multiplier=2
pub async fn standard_pool(service: &RewardPoolService) -> Pool {
    service
        .create_pool(pool_terms(PoolCategory::Country, 1000, dec!(100), dec!(2)))
        .await
        .unwrap()
}

pub async fn allocate(service: &RewardPoolService, user: UserId, category: PoolCategory, points: u64) -> Allocation {
    match service
        .allocate(AllocationRequest::new(user, category, points))
        .await
        .unwrap()
    {
        AllocationOutcome::Allocated(allocation) => allocation,
        AllocationOutcome::NothingToAllocate => panic!("expected an open pool for {}", user),
    }
}

pub fn rewards_of(service: &RewardPoolService, user: UserId) -> Vec<RewardRecord> {
    service
        .reward_history(
            &RewardFilter {
                user_id: Some(user),
                ..Default::default()
            },
            PageRequest::first(100),
        )
        .unwrap()
        .items
}
