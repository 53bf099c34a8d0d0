//! Ledger state and the atomic operation boundary.
//!
//! The [`Ledger`] owns everything the kernel mutates: the asset and account
//! registries, one [`MarketState`] per smart asset, and the liquid balance
//! sheet. Every inbound operation runs inside [`Ledger::apply`], which
//! snapshots the state, runs the operation, applies the balance effects the
//! kernel emitted, re-checks supply conservation, and rolls the whole thing
//! back on any error. The kernel never commits partially.

use std::collections::{HashMap, HashSet};

use bitmatch_matchcore::MarketState;
use bitmatch_types::{
    AccountId, AssetAmount, AssetId, BalanceEffect, BidId, BitassetState, BitmatchError,
    EventSink, ExecContext, HardforkSchedule, MarketFeeParams, Notice, OrderId, Result,
    RuleSet, SettlementId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::balances::BalanceSheet;

// =====================================================================
// Registries
// =====================================================================

/// Static and accumulated per-asset data outside the matching indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub symbol: String,
    pub issuer: AccountId,
    pub fee_params: MarketFeeParams,
    /// Fee-sharing whitelist. `None` shares referral rewards with every
    /// referrer; otherwise only the listed accounts receive them and
    /// gated rewards fall back to the issuer's fee pool.
    pub fee_sharing: Option<HashSet<AccountId>>,
    /// Accumulated market fees, denominated in this asset.
    pub accumulated_fees: i64,
    /// Accumulated margin-call and force-settlement fees, denominated in
    /// the backing asset.
    pub accumulated_collateral_fees: i64,
}

impl AssetRecord {
    #[must_use]
    pub fn new(symbol: &str, issuer: AccountId, fee_params: MarketFeeParams) -> Self {
        Self {
            symbol: symbol.to_string(),
            issuer,
            fee_params,
            fee_sharing: None,
            accumulated_fees: 0,
            accumulated_collateral_fees: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    /// Recipient of this account's referral-program fee shares.
    pub referrer: Option<AccountId>,
}

// =====================================================================
// Ledger
// =====================================================================

/// The replicated state this kernel is the transition function for.
#[derive(Debug, Clone)]
pub struct Ledger {
    now: DateTime<Utc>,
    schedule: HardforkSchedule,
    rules: RuleSet,
    core_asset: AssetId,
    /// Network's cut of split fees, `PERCENT_100` units.
    pub network_fee_percent: u16,
    /// Flat cancellation fee in core units.
    pub cancel_fee: i64,
    /// Deferred operation fee charged on order placement, core units.
    pub order_fee: i64,
    pub assets: HashMap<AssetId, AssetRecord>,
    pub accounts: HashMap<AccountId, AccountRecord>,
    pub markets: HashMap<AssetId, MarketState>,
    pub balances: BalanceSheet,
    /// Network's accumulated fee income per asset.
    pub network_fee_pool: HashMap<AssetId, i64>,
    next_order_id: u64,
    next_settlement_id: u64,
    next_bid_id: u64,
    next_call_id: u64,
}

impl Ledger {
    #[must_use]
    pub fn new(core_asset: AssetId, schedule: HardforkSchedule, genesis: DateTime<Utc>) -> Self {
        let rules = RuleSet::resolve(&schedule, genesis);
        Self {
            now: genesis,
            schedule,
            rules,
            core_asset,
            network_fee_percent: 2000,
            cancel_fee: 0,
            order_fee: 0,
            assets: HashMap::new(),
            accounts: HashMap::new(),
            markets: HashMap::new(),
            balances: BalanceSheet::new(),
            network_fee_pool: HashMap::new(),
            next_order_id: 1,
            next_settlement_id: 1,
            next_bid_id: 1,
            next_call_id: 1,
        }
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    pub fn register_account(&mut self, id: AccountId, name: &str, referrer: Option<AccountId>) {
        self.accounts.insert(
            id,
            AccountRecord {
                name: name.to_string(),
                referrer,
            },
        );
    }

    pub fn register_asset(&mut self, id: AssetId, record: AssetRecord) {
        self.assets.insert(id, record);
    }

    /// Register a smart asset and open its market against the backing
    /// asset. Both assets must already be registered.
    ///
    /// # Errors
    /// Returns [`BitmatchError::AssetNotFound`] if either leg is missing.
    pub fn register_smart_asset(&mut self, bitasset: BitassetState) -> Result<()> {
        let debt_record = self
            .assets
            .get(&bitasset.asset_id)
            .ok_or(BitmatchError::AssetNotFound(bitasset.asset_id))?;
        let backing_record = self
            .assets
            .get(&bitasset.backing_asset)
            .ok_or(BitmatchError::AssetNotFound(bitasset.backing_asset))?;
        let asset_id = bitasset.asset_id;
        let mut market = MarketState::new(bitasset, debt_record.issuer);
        market.debt_fees = debt_record.fee_params.clone();
        market.collateral_fees = backing_record.fee_params.clone();
        self.markets.insert(asset_id, market);
        Ok(())
    }

    /// Fund an account out of band. Only valid for assets without a debt
    /// market; smart-asset units enter circulation exclusively by borrowing.
    ///
    /// # Errors
    /// Rejects smart assets and overflowing credits.
    pub fn deposit(&mut self, account: AccountId, amount: AssetAmount) -> Result<()> {
        if self.markets.contains_key(&amount.asset_id) {
            return Err(BitmatchError::InvalidOrder {
                reason: format!("{} is debt-backed, fund it by borrowing", amount.asset_id),
            });
        }
        self.balances.credit(account, amount)
    }

    // -----------------------------------------------------------------
    // Block clock
    // -----------------------------------------------------------------

    /// Advance the block clock and re-resolve the active rule set.
    pub fn begin_block(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.rules = RuleSet::resolve(&self.schedule, now);
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn core_asset(&self) -> AssetId {
        self.core_asset
    }

    /// Execution context snapshot handed to the matching kernel.
    #[must_use]
    pub fn exec_context(&self) -> ExecContext {
        ExecContext {
            now: self.now,
            rules: self.rules,
            core_asset: self.core_asset,
            network_fee_percent: self.network_fee_percent,
            cancel_fee: self.cancel_fee,
        }
    }

    // -----------------------------------------------------------------
    // Id allocation
    // -----------------------------------------------------------------

    pub fn alloc_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    pub fn alloc_settlement_id(&mut self) -> SettlementId {
        let id = SettlementId(self.next_settlement_id);
        self.next_settlement_id += 1;
        id
    }

    pub fn alloc_bid_id(&mut self) -> BidId {
        let id = BidId(self.next_bid_id);
        self.next_bid_id += 1;
        id
    }

    pub fn alloc_call_id(&mut self) -> u64 {
        let id = self.next_call_id;
        self.next_call_id += 1;
        id
    }

    // -----------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------

    /// The market trading the pair `(a, b)` in either orientation.
    ///
    /// # Errors
    /// Returns [`BitmatchError::InvalidOrder`] if no market trades the pair.
    pub fn market_for_pair(&self, a: AssetId, b: AssetId) -> Result<AssetId> {
        for (key, candidate) in [(a, b), (b, a)] {
            if let Some(market) = self.markets.get(&key) {
                if market.collateral_asset() == candidate {
                    return Ok(key);
                }
            }
        }
        Err(BitmatchError::InvalidOrder {
            reason: format!("no market trades {a} against {b}"),
        })
    }

    /// The market holding a resting limit order.
    ///
    /// # Errors
    /// Returns [`BitmatchError::OrderNotFound`] if no book contains it.
    pub fn find_order_market(&self, id: OrderId) -> Result<AssetId> {
        self.markets
            .iter()
            .find(|(_, m)| {
                m.book.selling_debt.get(id).is_some() || m.book.selling_collateral.get(id).is_some()
            })
            .map(|(asset, _)| *asset)
            .ok_or(BitmatchError::OrderNotFound(id))
    }

    // -----------------------------------------------------------------
    // Atomic operation boundary
    // -----------------------------------------------------------------

    /// Run one operation atomically: snapshot, execute, apply the emitted
    /// balance effects, re-check supply conservation. Any error restores
    /// the pre-operation state in full and nothing is observed.
    ///
    /// # Errors
    /// Propagates the operation's error after rolling back.
    pub fn apply<T>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut EventSink) -> Result<T>,
    ) -> Result<(T, Vec<Notice>)> {
        let snapshot = self.clone();
        let mut sink = EventSink::new();
        let outcome = f(self, &mut sink).and_then(|value| {
            self.apply_effects(&sink.effects)?;
            self.verify_supply()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => Ok((value, sink.notices)),
            Err(e) => {
                debug!(error = %e, "operation rolled back");
                *self = snapshot;
                Err(e)
            }
        }
    }

    /// Apply the balance effects one kernel invocation emitted, in order.
    ///
    /// # Errors
    /// Any failed mutation aborts; the caller rolls back.
    pub fn apply_effects(&mut self, effects: &[BalanceEffect]) -> Result<()> {
        for effect in effects {
            match *effect {
                BalanceEffect::Credit { account, amount }
                | BalanceEffect::Issue { account, amount } => {
                    self.balances.credit(account, amount)?;
                }
                // Burned units were escrowed in the emitting index; supply
                // was already shrunk by the kernel.
                BalanceEffect::Burn { amount } => {
                    debug!(asset = %amount.asset_id, amount = amount.amount, "supply burned");
                }
                BalanceEffect::AccrueMarketFee { asset, amount } => {
                    let record = self
                        .assets
                        .get_mut(&asset)
                        .ok_or(BitmatchError::AssetNotFound(asset))?;
                    record.accumulated_fees += amount;
                }
                BalanceEffect::AccrueCollateralFee { asset, amount } => {
                    let record = self
                        .assets
                        .get_mut(&asset)
                        .ok_or(BitmatchError::AssetNotFound(asset))?;
                    record.accumulated_collateral_fees += amount.amount;
                }
                BalanceEffect::Network { amount } => {
                    *self.network_fee_pool.entry(amount.asset_id).or_insert(0) += amount.amount;
                }
                BalanceEffect::ReferralReward { seller, amount } => {
                    self.pay_referral_reward(seller, amount)?;
                }
            }
        }
        Ok(())
    }

    /// Route a referral reward to the seller's referrer, or to the fee
    /// pool of the reward's asset when sharing is gated or absent.
    fn pay_referral_reward(&mut self, seller: AccountId, amount: AssetAmount) -> Result<()> {
        let referrer = self.accounts.get(&seller).and_then(|a| a.referrer);
        let shared = match (referrer, self.assets.get(&amount.asset_id)) {
            (Some(r), Some(record)) => match &record.fee_sharing {
                None => Some(r),
                Some(whitelist) if whitelist.contains(&r) => Some(r),
                Some(_) => None,
            },
            _ => None,
        };
        match shared {
            Some(r) => self.balances.credit(r, amount),
            None => {
                let record = self
                    .assets
                    .get_mut(&amount.asset_id)
                    .ok_or(BitmatchError::AssetNotFound(amount.asset_id))?;
                record.accumulated_fees += amount.amount;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Supply conservation
    // -----------------------------------------------------------------

    /// Every unit of a smart asset must be somewhere: a balance, an order's
    /// escrow, a queued settlement, or a fee pool. And every circulating
    /// unit must be backed by margin debt or a settlement accumulator.
    ///
    /// # Errors
    /// Returns [`BitmatchError::InternalInvariant`] on any mismatch; this
    /// is a halt-the-chain condition, not a user error.
    pub fn verify_supply(&self) -> Result<()> {
        for (asset, market) in &self.markets {
            let debt = market.debt_asset();
            let mut circulating = self.balances.total(debt);
            circulating += market
                .book
                .selling_debt
                .iter()
                .map(|o| o.for_sale)
                .sum::<i64>();
            for side in [&market.book.selling_debt, &market.book.selling_collateral] {
                circulating += side
                    .iter()
                    .filter_map(|o| o.deferred_paid_fee)
                    .filter(|f| f.asset_id == debt)
                    .map(|f| f.amount)
                    .sum::<i64>();
            }
            circulating += market.settlements.total_balance();
            if let Some(record) = self.assets.get(&debt) {
                circulating += record.accumulated_fees;
            }
            circulating += self.network_fee_pool.get(&debt).copied().unwrap_or(0);

            if circulating != market.current_supply {
                return Err(BitmatchError::InternalInvariant(format!(
                    "{asset}: {circulating} units located but supply is {}",
                    market.current_supply
                )));
            }

            if market.bitasset.is_globally_settled() {
                if !market.calls.is_empty() {
                    return Err(BitmatchError::InternalInvariant(format!(
                        "{asset}: margin positions survived a global settlement"
                    )));
                }
            } else {
                let backed =
                    market.calls.total_debt() + market.bitasset.individual_settlement_debt;
                if backed != market.current_supply {
                    return Err(BitmatchError::InternalInvariant(format!(
                        "{asset}: {backed} units backed but supply is {}",
                        market.current_supply
                    )));
                }
            }
        }
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
