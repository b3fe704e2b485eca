//! Position sizing and capital compounding arithmetic.
//!
//! Each contract controls a fixed lot of 100 underlying shares, so the cash
//! cost of one contract is `option_price * 100 + commission`. Zero
//! affordable contracts is an expected outcome meaning "skip this trade,
//! capital carries over unchanged" — it is not an error.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Underlying shares per option contract.
pub const CONTRACT_MULTIPLIER: Decimal = dec!(100);

#[derive(Error, Debug)]
pub enum CapitalError {
    #[error("invalid entry price {0}")]
    InvalidPrice(Decimal),
}

/// Result of sizing an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    /// Contracts bought. Zero means the trade is skipped.
    pub contracts: u32,

    /// Cash cost of one contract including its commission.
    pub cost_per_contract: Decimal,

    /// Total cash outlay including commissions.
    pub total_cost: Decimal,

    /// Entry-side commission across all contracts.
    pub entry_commission: Decimal,

    /// Cash left after the purchase.
    pub leftover_cash: Decimal,

    /// Share of available capital deployed, in percent.
    pub utilization_pct: f64,
}

impl PositionSize {
    pub fn is_executable(&self) -> bool {
        self.contracts > 0
    }
}

/// Result of sizing an exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitProceeds {
    pub gross_proceeds: Decimal,
    pub exit_commission: Decimal,
    pub net_proceeds: Decimal,
}

/// Size an entry under capital, commission, and lot constraints.
///
/// Contracts = floor(capital / (price * 100 + commission)), capped at
/// `max_contracts`.
pub fn size_position(
    available_capital: Decimal,
    option_price: Decimal,
    commission_per_contract: Decimal,
    max_contracts: u32,
) -> Result<PositionSize, CapitalError> {
    if option_price <= Decimal::ZERO {
        return Err(CapitalError::InvalidPrice(option_price));
    }

    let cost_per_contract = option_price * CONTRACT_MULTIPLIER + commission_per_contract;
    let affordable = (available_capital / cost_per_contract)
        .floor()
        .to_u32()
        .unwrap_or(0);
    let contracts = affordable.min(max_contracts);

    let entry_commission = commission_per_contract * Decimal::from(contracts);
    let total_cost = cost_per_contract * Decimal::from(contracts);
    let leftover_cash = available_capital - total_cost;
    let utilization_pct = if available_capital > Decimal::ZERO {
        (total_cost / available_capital).to_f64().unwrap_or(0.0) * 100.0
    } else {
        0.0
    };

    Ok(PositionSize {
        contracts,
        cost_per_contract,
        total_cost,
        entry_commission,
        leftover_cash,
        utilization_pct,
    })
}

/// Proceeds from selling `contracts` at `exit_price` per share.
pub fn size_exit(
    contracts: u32,
    exit_price: Decimal,
    commission_per_contract: Decimal,
) -> ExitProceeds {
    let gross_proceeds = Decimal::from(contracts) * exit_price * CONTRACT_MULTIPLIER;
    let exit_commission = Decimal::from(contracts) * commission_per_contract;
    ExitProceeds {
        gross_proceeds,
        exit_commission,
        net_proceeds: gross_proceeds - exit_commission,
    }
}

/// Ending capital of a period: sale proceeds plus the cash that was never
/// deployed. This becomes the next period's starting capital.
pub fn ending_capital(exit: &ExitProceeds, entry: &PositionSize) -> Decimal {
    exit.net_proceeds + entry.leftover_cash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_position_reference_case() {
        // $100,000 capital, $50.00 option, $0.35 commission:
        // cost/contract = 5000.35, 19 contracts, $4993.35 left over.
        let size = size_position(dec!(100_000), dec!(50.0), dec!(0.35), u32::MAX).unwrap();

        assert_eq!(size.contracts, 19);
        assert_eq!(size.cost_per_contract, dec!(5000.35));
        assert_eq!(size.total_cost, dec!(95006.65));
        assert_eq!(size.leftover_cash, dec!(4993.35));
        assert_eq!(size.entry_commission, dec!(6.65));
        assert!((size.utilization_pct - 95.00665).abs() < 1e-6);
    }

    #[test]
    fn test_size_exit_reference_case() {
        // 19 contracts at $60.00: gross 114000, net 113993.35.
        let exit = size_exit(19, dec!(60.0), dec!(0.35));

        assert_eq!(exit.gross_proceeds, dec!(114_000));
        assert_eq!(exit.exit_commission, dec!(6.65));
        assert_eq!(exit.net_proceeds, dec!(113993.35));
    }

    #[test]
    fn test_compounded_ending_capital() {
        let entry = size_position(dec!(100_000), dec!(50.0), dec!(0.35), u32::MAX).unwrap();
        let exit = size_exit(entry.contracts, dec!(60.0), dec!(0.35));

        assert_eq!(ending_capital(&exit, &entry), dec!(118986.70));
    }

    #[test]
    fn test_zero_affordable_contracts_is_not_an_error() {
        let size = size_position(dec!(1_000), dec!(50.0), dec!(0.35), u32::MAX).unwrap();

        assert_eq!(size.contracts, 0);
        assert!(!size.is_executable());
        assert_eq!(size.total_cost, dec!(0));
        assert_eq!(size.leftover_cash, dec!(1_000));
        assert_eq!(size.utilization_pct, 0.0);
    }

    #[test]
    fn test_max_contracts_cap() {
        let size = size_position(dec!(100_000), dec!(1.0), dec!(0.35), 5).unwrap();
        assert_eq!(size.contracts, 5);
        assert_eq!(size.total_cost, dec!(501.75));
    }

    #[test]
    fn test_invalid_price_is_error() {
        assert!(size_position(dec!(100_000), dec!(0), dec!(0.35), 10).is_err());
        assert!(size_position(dec!(100_000), dec!(-1), dec!(0.35), 10).is_err());
    }

    #[test]
    fn test_worthless_exit() {
        let exit = size_exit(19, dec!(0), dec!(0.35));
        assert_eq!(exit.gross_proceeds, dec!(0));
        // Commission is still owed on the closing transaction.
        assert_eq!(exit.net_proceeds, dec!(-6.65));
    }
}
