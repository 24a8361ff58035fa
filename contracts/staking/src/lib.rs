#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    Vec,
};
use tenure_shared::{
    fraction_of, is_active_month, maturity_timestamp, month_index, pro_rata_share, split_payout,
    BENEFIT_RATE_DENOMINATOR, LOAN_COLLATERAL_DENOMINATOR, MAX_BASIS_POINTS,
    NOMINEE_COOLDOWN_SECONDS,
};

// Data Types
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakingConfig {
    pub admin: Address,
    pub token: Address,
    pub reward_manager: Address,
    pub genesis_timestamp: u64,
}

/// A staking duration + benefit-rate template. Immutable once created;
/// plans form an append-only, insertion-ordered list.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakingPlan {
    pub duration_months: u64,
    pub benefit_fraction_of_15: u32,
    pub loan_eligible: bool,
}

/// A single time-locked deposit. Positions are never deleted; a position
/// with no remaining claimable value stays on the ledger for audit history.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakingPosition {
    pub amount: i128,
    pub plan_id: u32,
    pub start_month: u64,
    pub loan_locked: bool,
    pub nominee_total_bps: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoanPlan {
    pub duration_months: u64,
    pub interest_rate_bps: u32,
}

/// A loan against staked collateral. `principal` is the gross issued amount
/// and the full repay target; interest is retained up front.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Loan {
    pub borrower: Address,
    pub loan_plan_id: u32,
    pub principal: i128,
    pub collateral: Vec<u32>,
    pub start_month: u64,
    pub repaid: bool,
}

// Storage Keys
#[contracttype]
pub enum DataKey {
    Config,
    Plan(u32),
    PlanCount,
    LoanPlan(u32),
    LoanPlanCount,
    Position(Address, u32),
    PositionCount(Address),
    MonthlyPool(u64),
    TotalActive(u64),
    UserActive(Address, u64),
    Claimed(Address, u32, u64),
    Accrual(Address),
    Loan(u64),
    LoanCount,
    NomineeShare(Address, u32, Address),
    NomineeClaimed(Address, u32, Address),
    ResidualValue(Address, u32),
}

// Error Types, grouped by taxonomy: validation, state, authorization, resource
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    // validation
    InvalidPlan = 4,
    InvalidLoanPlan = 5,
    InvalidConfiguration = 6,
    ZeroAmount = 7,
    FractionOverflow = 8,
    NumericOverflow = 9,
    PositionNotFound = 10,
    LoanNotFound = 11,
    // state
    AlreadyReleased = 12,
    NotCurrentMonth = 13,
    NotYetActive = 14,
    NothingToWithdraw = 15,
    AlreadyRepaid = 16,
    AlreadyClaimed = 17,
    TooEarly = 18,
    CollateralLocked = 19,
    // resource
    InsufficientBalance = 20,
    InsufficientAllowance = 21,
    ExceedsMaxLoan = 22,
}

// Events
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeEvent {
    pub owner: Address,
    pub position_id: u32,
    pub amount: i128,
    pub plan_id: u32,
    pub start_month: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolRecordedEvent {
    pub month: u64,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BenefitEvent {
    pub owner: Address,
    pub position_id: u32,
    pub total: i128,
    pub liquid: i128,
    pub accrued: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoanEvent {
    pub borrower: Address,
    pub loan_id: u64,
    pub principal: i128,
    pub disbursed: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepayEvent {
    pub borrower: Address,
    pub loan_id: u64,
    pub principal: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NomineeClaimEvent {
    pub nominee: Address,
    pub owner: Address,
    pub position_id: u32,
    pub payout: i128,
}

#[contract]
pub struct StakingContract;

#[contractimpl]
impl StakingContract {
    /// Initialize the staking ledger. `reward_manager` is the only address
    /// allowed to record monthly reward pools; `genesis_timestamp` anchors
    /// the month index and must match the reward manager's.
    pub fn initialize(
        env: Env,
        admin: Address,
        token: Address,
        reward_manager: Address,
        genesis_timestamp: u64,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Config) {
            return Err(Error::AlreadyInitialized);
        }

        admin.require_auth();

        let config = StakingConfig {
            admin: admin.clone(),
            token,
            reward_manager,
            genesis_timestamp,
        };

        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::PlanCount, &0u32);
        env.storage().instance().set(&DataKey::LoanPlanCount, &0u32);
        env.storage().instance().set(&DataKey::LoanCount, &0u64);

        log!(&env, "Staking ledger initialized by admin: {}", admin);

        Ok(())
    }

    /// Append a new immutable staking plan. Admin only.
    pub fn create_staking_plan(
        env: Env,
        admin: Address,
        duration_months: u64,
        benefit_fraction_of_15: u32,
        loan_eligible: bool,
    ) -> Result<u32, Error> {
        admin.require_auth();
        let config = Self::config(&env)?;
        if config.admin != admin {
            return Err(Error::Unauthorized);
        }

        if duration_months == 0
            || benefit_fraction_of_15 == 0
            || benefit_fraction_of_15 > BENEFIT_RATE_DENOMINATOR
        {
            return Err(Error::InvalidConfiguration);
        }

        let plan = StakingPlan {
            duration_months,
            benefit_fraction_of_15,
            loan_eligible,
        };

        let plan_id: u32 = env.storage().instance().get(&DataKey::PlanCount).unwrap_or(0);
        env.storage().instance().set(&DataKey::Plan(plan_id), &plan);
        env.storage().instance().set(&DataKey::PlanCount, &(plan_id + 1));

        log!(
            &env,
            "Plan {} created: {} months at {}/15",
            plan_id,
            duration_months,
            benefit_fraction_of_15
        );

        Ok(plan_id)
    }

    /// Lock `amount` tokens under `plan_id`. The deposit is debited from the
    /// owner; benefit begins accruing from the month after the current one.
    pub fn create_position(
        env: Env,
        owner: Address,
        amount: i128,
        plan_id: u32,
    ) -> Result<u32, Error> {
        owner.require_auth();
        let config = Self::config(&env)?;

        if amount <= 0 {
            return Err(Error::ZeroAmount);
        }
        let plan = Self::plan(&env, plan_id)?;

        let token_client = token::Client::new(&env, &config.token);
        let contract = env.current_contract_address();
        if token_client.balance(&owner) < amount {
            return Err(Error::InsufficientBalance);
        }
        if token_client.allowance(&owner, &contract) < amount {
            return Err(Error::InsufficientAllowance);
        }
        token_client.transfer_from(&contract, &owner, &contract, &amount);

        let start_month = Self::now_month(&env, &config);
        let position_id = Self::store_new_position(&env, &owner, amount, plan_id, &plan, start_month);

        let event = StakeEvent {
            owner: owner.clone(),
            position_id,
            amount,
            plan_id,
            start_month,
        };
        env.events().publish((symbol_short!("stake"),), event);

        log!(
            &env,
            "User {} staked {} under plan {} in month {}",
            owner,
            amount,
            plan_id,
            start_month
        );

        Ok(position_id)
    }

    /// Record a month's reward pool. Only the configured reward manager may
    /// call this, and only for the current month; the matching tokens must
    /// already sit in this contract's balance.
    pub fn record_monthly_pool(env: Env, month: u64, amount: i128) -> Result<(), Error> {
        let config = Self::config(&env)?;
        config.reward_manager.require_auth();

        if amount <= 0 {
            return Err(Error::ZeroAmount);
        }
        if month != Self::now_month(&env, &config) {
            return Err(Error::NotCurrentMonth);
        }
        if env.storage().persistent().has(&DataKey::MonthlyPool(month)) {
            return Err(Error::AlreadyReleased);
        }

        env.storage()
            .persistent()
            .set(&DataKey::MonthlyPool(month), &amount);

        let event = PoolRecordedEvent { month, amount };
        env.events().publish((symbol_short!("pool"),), event);

        log!(&env, "Reward pool for month {} recorded: {}", month, amount);

        Ok(())
    }

    /// Unclaimed benefit of one position across a set of months. Fails with
    /// NotYetActive when any month is outside the position's accrual window
    /// or still in the future; already-claimed months contribute 0.
    pub fn see_benefit_by_months(
        env: Env,
        owner: Address,
        position_id: u32,
        months: Vec<u64>,
    ) -> Result<i128, Error> {
        let config = Self::config(&env)?;
        let position = Self::position(&env, &owner, position_id)?;
        let plan = Self::plan(&env, position.plan_id)?;
        let current = Self::now_month(&env, &config);

        let mut total = 0i128;
        for m in months.iter() {
            total += Self::month_share(&env, &owner, position_id, &position, &plan, m, current, false)?;
        }
        Ok(total)
    }

    /// Withdraw the unclaimed benefit for a set of months: 50% is paid out
    /// liquid, 50% is credited to the owner's accrual balance, an odd unit
    /// going to the liquid side. Each included month is marked claimed.
    pub fn withdraw_benefit_by_months(
        env: Env,
        owner: Address,
        position_id: u32,
        months: Vec<u64>,
    ) -> Result<i128, Error> {
        owner.require_auth();
        let config = Self::config(&env)?;
        let position = Self::position(&env, &owner, position_id)?;
        if position.loan_locked {
            return Err(Error::CollateralLocked);
        }
        let plan = Self::plan(&env, position.plan_id)?;
        let current = Self::now_month(&env, &config);

        let mut total = 0i128;
        for m in months.iter() {
            total += Self::month_share(&env, &owner, position_id, &position, &plan, m, current, true)?;
        }
        if total == 0 {
            return Err(Error::NothingToWithdraw);
        }

        let (liquid, accrued) = split_payout(total);
        let token_client = token::Client::new(&env, &config.token);
        token_client.transfer(&env.current_contract_address(), &owner, &liquid);
        Self::credit_accrual(&env, &owner, accrued);

        let event = BenefitEvent {
            owner: owner.clone(),
            position_id,
            total,
            liquid,
            accrued,
        };
        env.events().publish((symbol_short!("benefit"),), event);

        log!(
            &env,
            "User {} withdrew benefit {} ({} liquid, {} accrued)",
            owner,
            total,
            liquid,
            accrued
        );

        Ok(total)
    }

    /// Convert accrual balance into a fresh staking position. This is the
    /// explicit opt-in restake path; accrual is never compounded otherwise.
    pub fn restake_accrual(
        env: Env,
        owner: Address,
        amount: i128,
        plan_id: u32,
    ) -> Result<u32, Error> {
        owner.require_auth();
        let config = Self::config(&env)?;

        if amount <= 0 {
            return Err(Error::ZeroAmount);
        }
        let plan = Self::plan(&env, plan_id)?;

        let accrual: i128 = env
            .storage()
            .persistent()
            .get(&DataKey::Accrual(owner.clone()))
            .unwrap_or(0);
        if accrual < amount {
            return Err(Error::InsufficientBalance);
        }
        env.storage()
            .persistent()
            .set(&DataKey::Accrual(owner.clone()), &(accrual - amount));

        // The tokens are already held by this contract; only the ledger moves.
        let start_month = Self::now_month(&env, &config);
        let position_id = Self::store_new_position(&env, &owner, amount, plan_id, &plan, start_month);

        let event = StakeEvent {
            owner: owner.clone(),
            position_id,
            amount,
            plan_id,
            start_month,
        };
        env.events().publish((symbol_short!("restake"),), event);

        log!(&env, "User {} restaked {} of accrual", owner, amount);

        Ok(position_id)
    }

    /// Append a new immutable loan plan. Admin only.
    pub fn create_loan_plan(
        env: Env,
        admin: Address,
        duration_months: u64,
        interest_rate_bps: u32,
    ) -> Result<u32, Error> {
        admin.require_auth();
        let config = Self::config(&env)?;
        if config.admin != admin {
            return Err(Error::Unauthorized);
        }

        if duration_months == 0 || interest_rate_bps >= MAX_BASIS_POINTS {
            return Err(Error::InvalidConfiguration);
        }

        let plan = LoanPlan {
            duration_months,
            interest_rate_bps,
        };

        let plan_id: u32 = env
            .storage()
            .instance()
            .get(&DataKey::LoanPlanCount)
            .unwrap_or(0);
        env.storage().instance().set(&DataKey::LoanPlan(plan_id), &plan);
        env.storage()
            .instance()
            .set(&DataKey::LoanPlanCount, &(plan_id + 1));

        log!(
            &env,
            "Loan plan {} created: {} months at {} bps",
            plan_id,
            duration_months,
            interest_rate_bps
        );

        Ok(plan_id)
    }

    /// Maximum amount loanable against a set of the owner's positions. Each
    /// loan-eligible, unlocked position contributes a fraction of its amount
    /// scaled by its plan's benefit rate; the rest contribute 0.
    pub fn max_loanable_amount(
        env: Env,
        owner: Address,
        position_ids: Vec<u32>,
    ) -> Result<i128, Error> {
        let mut max = 0i128;
        for position_id in position_ids.iter() {
            let position = Self::position(&env, &owner, position_id)?;
            max += Self::collateral_value(&env, &position)?;
        }
        Ok(max)
    }

    /// Borrow against the given collateral positions. Interest is deducted
    /// up front and retained by the engine; the full `amount` is the repay
    /// target. Every referenced position becomes loan-locked.
    pub fn take_loan(
        env: Env,
        borrower: Address,
        loan_plan_id: u32,
        amount: i128,
        collateral_position_ids: Vec<u32>,
    ) -> Result<u64, Error> {
        borrower.require_auth();
        let config = Self::config(&env)?;

        if amount <= 0 {
            return Err(Error::ZeroAmount);
        }
        let loan_plan = Self::loan_plan(&env, loan_plan_id)?;

        // Lock and value the collateral in one pass. A position already
        // locked (including a duplicate id within this call) is rejected so
        // no position ever backs two loans.
        let mut max = 0i128;
        for position_id in collateral_position_ids.iter() {
            let mut position = Self::position(&env, &borrower, position_id)?;
            if position.loan_locked {
                return Err(Error::CollateralLocked);
            }
            max += Self::collateral_value(&env, &position)?;
            position.loan_locked = true;
            env.storage()
                .persistent()
                .set(&DataKey::Position(borrower.clone(), position_id), &position);
        }

        if amount > max {
            return Err(Error::ExceedsMaxLoan);
        }

        let interest = fraction_of(amount, loan_plan.interest_rate_bps, MAX_BASIS_POINTS)
            .ok_or(Error::NumericOverflow)?;
        let disbursed = amount - interest;

        let token_client = token::Client::new(&env, &config.token);
        let contract = env.current_contract_address();
        if token_client.balance(&contract) < disbursed {
            return Err(Error::InsufficientBalance);
        }
        token_client.transfer(&contract, &borrower, &disbursed);

        let loan = Loan {
            borrower: borrower.clone(),
            loan_plan_id,
            principal: amount,
            collateral: collateral_position_ids,
            start_month: Self::now_month(&env, &config),
            repaid: false,
        };

        let loan_id: u64 = env.storage().instance().get(&DataKey::LoanCount).unwrap_or(0);
        env.storage().persistent().set(&DataKey::Loan(loan_id), &loan);
        env.storage().instance().set(&DataKey::LoanCount, &(loan_id + 1));

        let event = LoanEvent {
            borrower: borrower.clone(),
            loan_id,
            principal: amount,
            disbursed,
        };
        env.events().publish((symbol_short!("loan"),), event);

        log!(
            &env,
            "User {} took loan {} of {} ({} disbursed)",
            borrower,
            loan_id,
            amount,
            disbursed
        );

        Ok(loan_id)
    }

    /// Repay a loan in full. All-or-nothing: the gross principal is debited
    /// and every collateral position is unlocked.
    pub fn repay_loan(env: Env, borrower: Address, loan_id: u64) -> Result<(), Error> {
        borrower.require_auth();
        let config = Self::config(&env)?;

        let mut loan: Loan = env
            .storage()
            .persistent()
            .get(&DataKey::Loan(loan_id))
            .ok_or(Error::LoanNotFound)?;
        if loan.borrower != borrower {
            return Err(Error::Unauthorized);
        }
        if loan.repaid {
            return Err(Error::AlreadyRepaid);
        }

        let token_client = token::Client::new(&env, &config.token);
        let contract = env.current_contract_address();
        if token_client.balance(&borrower) < loan.principal {
            return Err(Error::InsufficientBalance);
        }
        if token_client.allowance(&borrower, &contract) < loan.principal {
            return Err(Error::InsufficientAllowance);
        }
        token_client.transfer_from(&contract, &borrower, &contract, &loan.principal);

        loan.repaid = true;
        env.storage().persistent().set(&DataKey::Loan(loan_id), &loan);

        for position_id in loan.collateral.iter() {
            let mut position = Self::position(&env, &borrower, position_id)?;
            position.loan_locked = false;
            env.storage()
                .persistent()
                .set(&DataKey::Position(borrower.clone(), position_id), &position);
        }

        let event = RepayEvent {
            borrower: borrower.clone(),
            loan_id,
            principal: loan.principal,
        };
        env.events().publish((symbol_short!("repay"),), event);

        log!(&env, "User {} repaid loan {}", borrower, loan_id);

        Ok(())
    }

    /// Assign (or reassign) a nominee's fraction of a position's residual
    /// value. The per-position total may never exceed 10000 bps.
    pub fn add_nominee(
        env: Env,
        owner: Address,
        position_id: u32,
        nominee: Address,
        fraction_bps: u32,
    ) -> Result<(), Error> {
        owner.require_auth();
        Self::config(&env)?;
        let mut position = Self::position(&env, &owner, position_id)?;

        if fraction_bps == 0 {
            return Err(Error::ZeroAmount);
        }
        if env.storage().persistent().has(&DataKey::NomineeClaimed(
            owner.clone(),
            position_id,
            nominee.clone(),
        )) {
            return Err(Error::AlreadyClaimed);
        }

        let share_key = DataKey::NomineeShare(owner.clone(), position_id, nominee.clone());
        let previous: u32 = env.storage().persistent().get(&share_key).unwrap_or(0);
        let new_total = position.nominee_total_bps - previous + fraction_bps;
        if new_total > MAX_BASIS_POINTS {
            return Err(Error::FractionOverflow);
        }

        position.nominee_total_bps = new_total;
        env.storage()
            .persistent()
            .set(&DataKey::Position(owner.clone(), position_id), &position);
        env.storage().persistent().set(&share_key, &fraction_bps);

        log!(
            &env,
            "Nominee {} set to {} bps on position {} of {}",
            nominee,
            fraction_bps,
            position_id,
            owner
        );

        Ok(())
    }

    /// Claim a nominee's fraction of a matured position's residual value.
    /// Only possible after maturity plus the cooldown. The first claim
    /// freezes the residual (principal plus still-unclaimed benefit) so the
    /// owner cannot double-draw and later nominees divide the same value.
    pub fn nominee_withdraw(
        env: Env,
        nominee: Address,
        owner: Address,
        position_id: u32,
    ) -> Result<i128, Error> {
        nominee.require_auth();
        let config = Self::config(&env)?;
        let position = Self::position(&env, &owner, position_id)?;
        if position.loan_locked {
            return Err(Error::CollateralLocked);
        }
        let plan = Self::plan(&env, position.plan_id)?;

        let share: u32 = env
            .storage()
            .persistent()
            .get(&DataKey::NomineeShare(
                owner.clone(),
                position_id,
                nominee.clone(),
            ))
            .ok_or(Error::Unauthorized)?;
        let claimed_key = DataKey::NomineeClaimed(owner.clone(), position_id, nominee.clone());
        if env.storage().persistent().has(&claimed_key) {
            return Err(Error::AlreadyClaimed);
        }

        let matured = maturity_timestamp(
            position.start_month,
            plan.duration_months,
            config.genesis_timestamp,
        );
        if env.ledger().timestamp() < matured + NOMINEE_COOLDOWN_SECONDS {
            return Err(Error::TooEarly);
        }

        let residual = Self::freeze_residual(&env, &owner, position_id, &position, &plan)?;
        let payout = fraction_of(residual, share, MAX_BASIS_POINTS).ok_or(Error::NumericOverflow)?;

        let (liquid, accrued) = split_payout(payout);
        let token_client = token::Client::new(&env, &config.token);
        token_client.transfer(&env.current_contract_address(), &nominee, &liquid);
        Self::credit_accrual(&env, &nominee, accrued);

        env.storage().persistent().set(&claimed_key, &true);

        let event = NomineeClaimEvent {
            nominee: nominee.clone(),
            owner: owner.clone(),
            position_id,
            payout,
        };
        env.events().publish((symbol_short!("nomclaim"),), event);

        log!(
            &env,
            "Nominee {} claimed {} from position {} of {}",
            nominee,
            payout,
            position_id,
            owner
        );

        Ok(payout)
    }

    // ------------------------------------------------------------------
    // Read-only surface
    // ------------------------------------------------------------------

    pub fn get_config(env: Env) -> Result<StakingConfig, Error> {
        Self::config(&env)
    }

    /// Current month index: elapsed fixed-length months since genesis
    pub fn current_month(env: Env) -> Result<u64, Error> {
        let config = Self::config(&env)?;
        Ok(Self::now_month(&env, &config))
    }

    pub fn get_plan(env: Env, plan_id: u32) -> Option<StakingPlan> {
        env.storage().instance().get(&DataKey::Plan(plan_id))
    }

    pub fn plan_count(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::PlanCount).unwrap_or(0)
    }

    pub fn get_loan_plan(env: Env, loan_plan_id: u32) -> Option<LoanPlan> {
        env.storage().instance().get(&DataKey::LoanPlan(loan_plan_id))
    }

    pub fn loan_plan_count(env: Env) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::LoanPlanCount)
            .unwrap_or(0)
    }

    pub fn get_position(env: Env, owner: Address, position_id: u32) -> Option<StakingPosition> {
        env.storage()
            .persistent()
            .get(&DataKey::Position(owner, position_id))
    }

    pub fn position_count(env: Env, owner: Address) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::PositionCount(owner))
            .unwrap_or(0)
    }

    /// Reward pool recorded for a month; 0 for months with no release,
    /// including future months.
    pub fn pool_amount(env: Env, month: u64) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::MonthlyPool(month))
            .unwrap_or(0)
    }

    pub fn total_active_stake(env: Env, month: u64) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::TotalActive(month))
            .unwrap_or(0)
    }

    pub fn user_active_stake(env: Env, owner: Address, month: u64) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::UserActive(owner, month))
            .unwrap_or(0)
    }

    pub fn accrual_balance(env: Env, owner: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Accrual(owner))
            .unwrap_or(0)
    }

    pub fn is_claimed(env: Env, owner: Address, position_id: u32, month: u64) -> bool {
        env.storage()
            .persistent()
            .has(&DataKey::Claimed(owner, position_id, month))
    }

    pub fn get_loan(env: Env, loan_id: u64) -> Option<Loan> {
        env.storage().persistent().get(&DataKey::Loan(loan_id))
    }

    pub fn loan_count(env: Env) -> u64 {
        env.storage().instance().get(&DataKey::LoanCount).unwrap_or(0)
    }

    pub fn nominee_share(env: Env, owner: Address, position_id: u32, nominee: Address) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::NomineeShare(owner, position_id, nominee))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn config(env: &Env) -> Result<StakingConfig, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(Error::NotInitialized)
    }

    fn now_month(env: &Env, config: &StakingConfig) -> u64 {
        month_index(env.ledger().timestamp(), config.genesis_timestamp)
    }

    fn plan(env: &Env, plan_id: u32) -> Result<StakingPlan, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Plan(plan_id))
            .ok_or(Error::InvalidPlan)
    }

    fn loan_plan(env: &Env, loan_plan_id: u32) -> Result<LoanPlan, Error> {
        env.storage()
            .instance()
            .get(&DataKey::LoanPlan(loan_plan_id))
            .ok_or(Error::InvalidLoanPlan)
    }

    fn position(env: &Env, owner: &Address, position_id: u32) -> Result<StakingPosition, Error> {
        env.storage()
            .persistent()
            .get(&DataKey::Position(owner.clone(), position_id))
            .ok_or(Error::PositionNotFound)
    }

    /// Append a position and roll its amount into the running active-stake
    /// aggregates for every month of its lock window. Aggregates are only
    /// ever updated here, at write time; queries never rescan history.
    fn store_new_position(
        env: &Env,
        owner: &Address,
        amount: i128,
        plan_id: u32,
        plan: &StakingPlan,
        start_month: u64,
    ) -> u32 {
        let position = StakingPosition {
            amount,
            plan_id,
            start_month,
            loan_locked: false,
            nominee_total_bps: 0,
        };

        let position_id: u32 = env
            .storage()
            .persistent()
            .get(&DataKey::PositionCount(owner.clone()))
            .unwrap_or(0);
        env.storage()
            .persistent()
            .set(&DataKey::Position(owner.clone(), position_id), &position);
        env.storage()
            .persistent()
            .set(&DataKey::PositionCount(owner.clone()), &(position_id + 1));

        for m in (start_month + 1)..=(start_month + plan.duration_months) {
            let total: i128 = env
                .storage()
                .persistent()
                .get(&DataKey::TotalActive(m))
                .unwrap_or(0);
            env.storage()
                .persistent()
                .set(&DataKey::TotalActive(m), &(total + amount));

            let user_key = DataKey::UserActive(owner.clone(), m);
            let user_total: i128 = env.storage().persistent().get(&user_key).unwrap_or(0);
            env.storage().persistent().set(&user_key, &(user_total + amount));
        }

        position_id
    }

    /// One month's unclaimed pro-rata share for a position. Claimed months
    /// contribute 0; months outside the accrual window or in the future are
    /// an error. With `mark` set the month is marked claimed, but only for a
    /// positive share: a zero share stays unclaimed so a pool recorded later
    /// in the current month is still drawable.
    fn month_share(
        env: &Env,
        owner: &Address,
        position_id: u32,
        position: &StakingPosition,
        plan: &StakingPlan,
        m: u64,
        current_month: u64,
        mark: bool,
    ) -> Result<i128, Error> {
        let claimed_key = DataKey::Claimed(owner.clone(), position_id, m);
        if env.storage().persistent().has(&claimed_key) {
            return Ok(0);
        }
        if m > current_month || !is_active_month(position.start_month, plan.duration_months, m) {
            return Err(Error::NotYetActive);
        }

        let pool: i128 = env
            .storage()
            .persistent()
            .get(&DataKey::MonthlyPool(m))
            .unwrap_or(0);
        let total_active: i128 = env
            .storage()
            .persistent()
            .get(&DataKey::TotalActive(m))
            .unwrap_or(0);
        let share =
            pro_rata_share(pool, position.amount, total_active).ok_or(Error::NumericOverflow)?;

        if mark && share > 0 {
            env.storage().persistent().set(&claimed_key, &true);
        }

        Ok(share)
    }

    /// Residual value of a matured position: principal plus every monthly
    /// share the owner never claimed. Computed once; the first nominee claim
    /// marks all remaining months claimed and snapshots the value so later
    /// claims (and the owner) settle against the same frozen amount.
    fn freeze_residual(
        env: &Env,
        owner: &Address,
        position_id: u32,
        position: &StakingPosition,
        plan: &StakingPlan,
    ) -> Result<i128, Error> {
        let residual_key = DataKey::ResidualValue(owner.clone(), position_id);
        if let Some(residual) = env.storage().persistent().get(&residual_key) {
            return Ok(residual);
        }

        let mut residual = position.amount;
        for m in (position.start_month + 1)..=(position.start_month + plan.duration_months) {
            let claimed_key = DataKey::Claimed(owner.clone(), position_id, m);
            if env.storage().persistent().has(&claimed_key) {
                continue;
            }
            let pool: i128 = env
                .storage()
                .persistent()
                .get(&DataKey::MonthlyPool(m))
                .unwrap_or(0);
            let total_active: i128 = env
                .storage()
                .persistent()
                .get(&DataKey::TotalActive(m))
                .unwrap_or(0);
            residual += pro_rata_share(pool, position.amount, total_active)
                .ok_or(Error::NumericOverflow)?;
            env.storage().persistent().set(&claimed_key, &true);
        }

        env.storage().persistent().set(&residual_key, &residual);
        Ok(residual)
    }

    /// Loanable value of a single position: loan-eligible, unlocked
    /// positions contribute `amount * benefit_fraction_of_15 / 30`, so the
    /// more favorable the plan, the larger the collateral fraction. Others
    /// contribute 0.
    fn collateral_value(env: &Env, position: &StakingPosition) -> Result<i128, Error> {
        if position.loan_locked {
            return Ok(0);
        }
        let plan = Self::plan(env, position.plan_id)?;
        if !plan.loan_eligible {
            return Ok(0);
        }
        fraction_of(
            position.amount,
            plan.benefit_fraction_of_15,
            LOAN_COLLATERAL_DENOMINATOR,
        )
        .ok_or(Error::NumericOverflow)
    }

    fn credit_accrual(env: &Env, owner: &Address, amount: i128) {
        let key = DataKey::Accrual(owner.clone());
        let balance: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        env.storage().persistent().set(&key, &(balance + amount));
    }
}
