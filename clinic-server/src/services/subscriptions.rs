use clinic_core::{
    ClinicError, Money, Plan, Result, Subscription, SubscriptionStatus, Usage,
};
use clinic_store::TransactionOps;
use serde::{Deserialize, Serialize};

use super::ClinicService;

/// Subscription state as seen by the tenant
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub subscription: Option<Subscription>,
    pub plan: Plan,
    /// Status after period expiry is applied
    pub status: Option<SubscriptionStatus>,
    pub allows_writes: bool,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct StartSubscription {
    pub plan_code: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionPaymentRequest {
    /// Major units of the billing currency
    pub amount: String,
    pub reference: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelSubscription {
    #[serde(default)]
    pub at_period_end: bool,
}

// Subscription workflows skip the write gate so a lapsed tenant can pay.
impl ClinicService<'_> {
    fn build_view(&self, ops: &TransactionOps<'_>) -> Result<SubscriptionView> {
        let subscription = ops.get::<Subscription>(self.tenant_id, self.tenant_id)?;
        let plan = self.current_plan(ops)?.clone();
        let usage = self.usage(ops)?;
        Ok(SubscriptionView {
            status: subscription.as_ref().map(|s| s.effective_status(self.now)),
            allows_writes: subscription
                .as_ref()
                .is_none_or(|s| s.allows_writes(self.now, self.billing.grace_days)),
            subscription,
            plan,
            usage,
        })
    }

    pub fn subscription_view(&self) -> Result<SubscriptionView> {
        self.read_tx(|ops| self.build_view(ops))
    }

    fn current_subscription(&self, ops: &TransactionOps<'_>) -> Result<Subscription> {
        let mut subscription = ops
            .get::<Subscription>(self.tenant_id, self.tenant_id)?
            .ok_or_else(|| ClinicError::not_found("subscriptions", self.tenant_id))?;
        subscription.refresh(self.now);
        Ok(subscription)
    }

    /// Subscribe, switch plans, or restart a cancelled subscription
    pub fn start_or_change_subscription(&self, request: StartSubscription) -> Result<SubscriptionView> {
        self.store.in_transaction(|ops| {
            let plan = self.plan(&request.plan_code)?;
            let usage = self.usage(ops)?;
            match ops.get::<Subscription>(self.tenant_id, self.tenant_id)? {
                Some(mut subscription) => {
                    subscription.refresh(self.now);
                    subscription.change_plan(plan, &usage, self.now)?;
                    ops.update(&mut subscription, self.now)?;
                }
                None => {
                    plan.fits(&usage)?;
                    ops.insert(&Subscription::start(self.tenant_id, plan, self.now))?;
                }
            }
            tracing::info!(tenant_id = %self.tenant_id, plan = %plan.code, "Subscription plan set");
            self.build_view(ops)
        })
    }

    pub fn record_subscription_payment(
        &self,
        request: SubscriptionPaymentRequest,
    ) -> Result<SubscriptionView> {
        self.store.in_transaction(|ops| {
            let mut subscription = self.current_subscription(ops)?;
            let plan = self.plan(&subscription.plan_code)?;
            let amount = Money::from_major_str(&request.amount, self.billing.currency.clone())?;
            subscription.record_payment(plan, amount.minor, request.reference, self.now)?;
            ops.update(&mut subscription, self.now)?;
            tracing::info!(
                tenant_id = %self.tenant_id,
                period_end = %subscription.current_period_end,
                "Subscription payment recorded"
            );
            self.build_view(ops)
        })
    }

    pub fn cancel_subscription(&self, request: CancelSubscription) -> Result<SubscriptionView> {
        self.store.in_transaction(|ops| {
            let mut subscription = self.current_subscription(ops)?;
            subscription.cancel(request.at_period_end, self.now)?;
            ops.update(&mut subscription, self.now)?;
            tracing::info!(
                tenant_id = %self.tenant_id,
                at_period_end = request.at_period_end,
                "Subscription cancelled"
            );
            self.build_view(ops)
        })
    }
}
