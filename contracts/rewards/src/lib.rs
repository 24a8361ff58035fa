#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
};
use tenure_shared::{month_index, StakingPoolClient};

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardConfig {
    pub admin: Address,
    pub token: Address,
    pub staking_contract: Address,
    pub genesis_timestamp: u64,
    pub monthly_release_amount: i128,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Released(u64),
}

// Error Types
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidConfiguration = 4,
    BootstrapMonth = 5,
    AlreadyReleased = 6,
    InsufficientTreasury = 7,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseEvent {
    pub month: u64,
    pub amount: i128,
}

#[contract]
pub struct RewardManagerContract;

/// Holds the undistributed reward treasury and releases one pool per month
/// into the staking ledger. The release amount policy itself lives outside
/// the core; here it is a config amount with an admin knob.
#[contractimpl]
impl RewardManagerContract {
    pub fn initialize(
        env: Env,
        admin: Address,
        token: Address,
        staking_contract: Address,
        genesis_timestamp: u64,
        monthly_release_amount: i128,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(Error::AlreadyInitialized);
        }

        admin.require_auth();

        if monthly_release_amount <= 0 {
            return Err(Error::InvalidConfiguration);
        }

        let config = RewardConfig {
            admin: admin.clone(),
            token,
            staking_contract,
            genesis_timestamp,
            monthly_release_amount,
        };

        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Reward manager initialized by admin: {}", admin);

        Ok(())
    }

    /// Current month index: elapsed fixed-length months since genesis.
    /// Month 0 is the non-accruing bootstrap month.
    pub fn current_month(env: Env) -> Result<u64, Error> {
        let config = Self::config(&env)?;
        Ok(month_index(env.ledger().timestamp(), config.genesis_timestamp))
    }

    /// Release this month's reward pool: transfer the configured amount to
    /// the staking contract and record it there. Callable by anyone (the
    /// external scheduler in practice) but at most once per month index;
    /// months that are never triggered simply stay at a zero pool.
    pub fn release_monthly_reward(env: Env) -> Result<i128, Error> {
        let config = Self::config(&env)?;
        let month = month_index(env.ledger().timestamp(), config.genesis_timestamp);

        if month == 0 {
            return Err(Error::BootstrapMonth);
        }
        if env.storage().persistent().has(&DataKey::Released(month)) {
            return Err(Error::AlreadyReleased);
        }

        let amount = config.monthly_release_amount;
        let token_client = token::Client::new(&env, &config.token);
        let contract = env.current_contract_address();
        if token_client.balance(&contract) < amount {
            return Err(Error::InsufficientTreasury);
        }

        token_client.transfer(&contract, &config.staking_contract, &amount);
        StakingPoolClient::new(&env, &config.staking_contract).record_monthly_pool(&month, &amount);

        env.storage().persistent().set(&DataKey::Released(month), &true);

        let event = ReleaseEvent { month, amount };
        env.events().publish((symbol_short!("release"),), event);

        log!(&env, "Released {} for month {}", amount, month);

        Ok(amount)
    }

    /// Admin knob for the monthly release amount (the release policy hook)
    pub fn set_release_amount(env: Env, admin: Address, amount: i128) -> Result<(), Error> {
        admin.require_auth();

        let mut config = Self::config(&env)?;
        if config.admin != admin {
            return Err(Error::Unauthorized);
        }
        if amount <= 0 {
            return Err(Error::InvalidConfiguration);
        }

        config.monthly_release_amount = amount;
        env.storage().instance().set(&DataKey::Config, &config);

        log!(&env, "Monthly release amount set to {}", amount);

        Ok(())
    }

    pub fn get_config(env: Env) -> Result<RewardConfig, Error> {
        Self::config(&env)
    }

    pub fn is_released(env: Env, month: u64) -> bool {
        env.storage().persistent().has(&DataKey::Released(month))
    }

    /// Undistributed reward balance still held by this contract
    pub fn treasury_balance(env: Env) -> Result<i128, Error> {
        let config = Self::config(&env)?;
        let token_client = token::Client::new(&env, &config.token);
        Ok(token_client.balance(&env.current_contract_address()))
    }

    fn config(env: &Env) -> Result<RewardConfig, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(Error::NotInitialized)
    }
}
