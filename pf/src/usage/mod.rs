//! Token and cost accounting

mod ledger;
mod pricing;

pub use ledger::{ModelUsage, UsageAccountant, UsageLedger};
pub use pricing::{ModelPricing, PricingTable};
