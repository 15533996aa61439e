//! The budget checker (spec §5): a caller-supplied gate invoked once per
//! turn, before the loop contacts the provider. A rejection aborts the
//! whole `Execute` call with that error — there is no partial-turn budget.

use async_trait::async_trait;

/// What the checker is being asked to approve.
pub struct BudgetContext<'a> {
    pub session_id: &'a str,
    pub turn: usize,
    pub tool_calls_count: usize,
}

/// Implemented by the host application; e.g. to enforce a per-user spend
/// cap or a rate limit ahead of the (possibly metered) provider call.
#[async_trait]
pub trait BudgetChecker: Send + Sync {
    /// `Ok(())` to proceed with the turn; `Err(reason)` aborts the loop,
    /// surfaced as `AgentError::BudgetRejected(reason)`.
    async fn check(&self, ctx: &BudgetContext<'_>) -> Result<(), String>;
}

/// The default checker: every turn is approved. Used when the host doesn't
/// need budget enforcement.
pub struct UnlimitedBudget;

#[async_trait]
impl BudgetChecker for UnlimitedBudget {
    async fn check(&self, _ctx: &BudgetContext<'_>) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAfter(usize);

    #[async_trait]
    impl BudgetChecker for RejectAfter {
        async fn check(&self, ctx: &BudgetContext<'_>) -> Result<(), String> {
            if ctx.turn > self.0 {
                Err(format!("turn {} exceeds budget of {} turns", ctx.turn, self.0))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn unlimited_budget_always_approves() {
        let checker = UnlimitedBudget;
        let ctx = BudgetContext { session_id: "s1", turn: 9999, tool_calls_count: 0 };
        assert!(checker.check(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn custom_checker_rejects_past_its_limit() {
        let checker = RejectAfter(3);
        let ok_ctx = BudgetContext { session_id: "s1", turn: 3, tool_calls_count: 0 };
        assert!(checker.check(&ok_ctx).await.is_ok());

        let rejected_ctx = BudgetContext { session_id: "s1", turn: 4, tool_calls_count: 0 };
        assert!(checker.check(&rejected_ctx).await.is_err());
    }
}
