pub mod call_budget;

pub use call_budget::{BudgetState, CallBudget};
