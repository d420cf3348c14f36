//! Tenant subscription billing
//!
//! Payment collection happens outside this service; it only records
//! settled amounts and advances the billing period.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::record::RecordMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn advance(self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            BillingInterval::Monthly => Months::new(1),
            BillingInterval::Yearly => Months::new(12),
        };
        from.checked_add_months(months).unwrap_or(from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub name: String,
    /// Minor units per interval
    pub price: i64,
    pub interval: BillingInterval,
    pub max_doctors: Option<u32>,
    pub max_patients: Option<u32>,
    pub trial_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitedResource {
    Doctors,
    Patients,
}

impl Plan {
    fn limit(&self, resource: LimitedResource) -> Option<u32> {
        match resource {
            LimitedResource::Doctors => self.max_doctors,
            LimitedResource::Patients => self.max_patients,
        }
    }

    /// Fails when adding one more `resource` would exceed the plan
    pub fn check_limit(&self, resource: LimitedResource, current_count: usize) -> Result<()> {
        match self.limit(resource) {
            Some(max) if current_count >= max as usize => Err(ClinicError::LimitExceeded {
                resource: format!("{:?}", resource).to_lowercase(),
                limit: max,
            }),
            _ => Ok(()),
        }
    }

    /// Whether existing usage fits under this plan
    pub fn fits(&self, usage: &Usage) -> Result<()> {
        for (resource, count) in [
            (LimitedResource::Doctors, usage.doctors),
            (LimitedResource::Patients, usage.patients),
        ] {
            if let Some(max) = self.limit(resource)
                && count > max as usize
            {
                return Err(ClinicError::LimitExceeded {
                    resource: format!("{:?}", resource).to_lowercase(),
                    limit: max,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub doctors: usize,
    pub patients: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayment {
    /// Minor units
    pub amount: i64,
    pub reference: String,
    pub paid_at: DateTime<Utc>,
}

/// One per tenant; the record id is the tenant id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub payments: Vec<SubscriptionPayment>,
    pub meta: RecordMeta,
}

impl_record!(Subscription, "subscriptions");

impl Subscription {
    pub fn start(tenant_id: &str, plan: &Plan, now: DateTime<Utc>) -> Self {
        let (status, period_end) = if plan.trial_days > 0 {
            (
                SubscriptionStatus::Trialing,
                now + Duration::days(plan.trial_days as i64),
            )
        } else {
            (SubscriptionStatus::Active, plan.interval.advance(now))
        };
        Self {
            id: tenant_id.to_string(),
            tenant_id: tenant_id.to_string(),
            plan_code: plan.code.clone(),
            status,
            current_period_start: now,
            current_period_end: period_end,
            cancel_at_period_end: false,
            payments: Vec::new(),
            meta: RecordMeta::new(now),
        }
    }

    /// Status after applying period expiry at `now`
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status {
            SubscriptionStatus::Trialing | SubscriptionStatus::Active
                if now > self.current_period_end =>
            {
                if self.cancel_at_period_end {
                    SubscriptionStatus::Cancelled
                } else {
                    SubscriptionStatus::PastDue
                }
            }
            status => status,
        }
    }

    /// Persistable status refresh; returns true when the status changed
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        let next = self.effective_status(now);
        if next != self.status {
            tracing::info!(
                tenant_id = %self.tenant_id,
                from = ?self.status,
                to = ?next,
                "Subscription status changed"
            );
            self.status = next;
            return true;
        }
        false
    }

    pub fn allows_writes(&self, now: DateTime<Utc>, grace_days: u32) -> bool {
        match self.effective_status(now) {
            SubscriptionStatus::Trialing | SubscriptionStatus::Active => true,
            SubscriptionStatus::PastDue => {
                now <= self.current_period_end + Duration::days(grace_days as i64)
            }
            SubscriptionStatus::Cancelled => false,
        }
    }

    pub fn ensure_writable(&self, now: DateTime<Utc>, grace_days: u32) -> Result<()> {
        if !self.allows_writes(now, grace_days) {
            return Err(ClinicError::SubscriptionInactive(format!(
                "subscription is {:?}",
                self.effective_status(now)
            )));
        }
        Ok(())
    }

    /// Settle one billing interval; the period extends from the later of now and period end
    pub fn record_payment(
        &mut self,
        plan: &Plan,
        amount: i64,
        reference: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status == SubscriptionStatus::Cancelled {
            return Err(ClinicError::Conflict(
                "subscription is cancelled; start a new one".to_string(),
            ));
        }
        if plan.code != self.plan_code {
            return Err(ClinicError::validation(format!(
                "payment is for plan {}, subscription is on {}",
                plan.code, self.plan_code
            )));
        }
        if amount != plan.price {
            return Err(ClinicError::invalid_field(
                "amount",
                format!("expected {} minor units, got {}", plan.price, amount),
            ));
        }
        if reference.trim().is_empty() {
            return Err(ClinicError::invalid_field("reference", "payment reference is required"));
        }
        let base = now.max(self.current_period_end);
        self.current_period_start = base;
        self.current_period_end = plan.interval.advance(base);
        self.status = SubscriptionStatus::Active;
        self.payments.push(SubscriptionPayment {
            amount,
            reference,
            paid_at: now,
        });
        Ok(())
    }

    pub fn change_plan(&mut self, plan: &Plan, usage: &Usage, now: DateTime<Utc>) -> Result<()> {
        plan.fits(usage)?;
        if self.status == SubscriptionStatus::Cancelled {
            let meta = self.meta.clone();
            let payments = std::mem::take(&mut self.payments);
            *self = Subscription::start(&self.tenant_id, plan, now);
            self.meta = meta;
            self.payments = payments;
            return Ok(());
        }
        self.plan_code = plan.code.clone();
        self.cancel_at_period_end = false;
        Ok(())
    }

    pub fn cancel(&mut self, at_period_end: bool, now: DateTime<Utc>) -> Result<()> {
        if self.status == SubscriptionStatus::Cancelled {
            return Err(ClinicError::transition(
                "subscription",
                self.status,
                SubscriptionStatus::Cancelled,
            ));
        }
        if at_period_end {
            self.cancel_at_period_end = true;
        } else {
            self.status = SubscriptionStatus::Cancelled;
            self.current_period_end = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn basic(trial_days: u32) -> Plan {
        Plan {
            code: "basic".into(),
            name: "Basic".into(),
            price: 2900,
            interval: BillingInterval::Monthly,
            max_doctors: Some(2),
            max_patients: Some(100),
            trial_days,
        }
    }

    fn pro() -> Plan {
        Plan {
            code: "pro".into(),
            name: "Pro".into(),
            price: 9900,
            interval: BillingInterval::Monthly,
            max_doctors: None,
            max_patients: None,
            trial_days: 0,
        }
    }

    #[test]
    fn test_start_with_trial() {
        let sub = Subscription::start("t1", &basic(14), at("2024-01-01T00:00:00Z"));
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert_eq!(sub.current_period_end, at("2024-01-15T00:00:00Z"));
        assert_eq!(sub.id, "t1");
    }

    #[test]
    fn test_start_without_trial() {
        let sub = Subscription::start("t1", &basic(0), at("2024-01-31T00:00:00Z"));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        // month-end clamps to the shorter month
        assert_eq!(sub.current_period_end, at("2024-02-29T00:00:00Z"));
    }

    #[test]
    fn test_payment_extends_from_period_end() {
        let plan = basic(14);
        let mut sub = Subscription::start("t1", &plan, at("2024-01-01T00:00:00Z"));
        sub.record_payment(&plan, 2900, "PAY-1".into(), at("2024-01-10T00:00:00Z"))
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.current_period_start, at("2024-01-15T00:00:00Z"));
        assert_eq!(sub.current_period_end, at("2024-02-15T00:00:00Z"));

        // late payment restarts from now
        sub.record_payment(&plan, 2900, "PAY-2".into(), at("2024-03-01T00:00:00Z"))
            .unwrap();
        assert_eq!(sub.current_period_end, at("2024-04-01T00:00:00Z"));
        assert_eq!(sub.payments.len(), 2);
    }

    #[test]
    fn test_payment_amount_must_match_plan() {
        let plan = basic(0);
        let mut sub = Subscription::start("t1", &plan, at("2024-01-01T00:00:00Z"));
        assert!(sub
            .record_payment(&plan, 2899, "PAY".into(), at("2024-01-02T00:00:00Z"))
            .is_err());
        assert!(sub
            .record_payment(&pro(), 9900, "PAY".into(), at("2024-01-02T00:00:00Z"))
            .is_err());
    }

    #[test]
    fn test_expiry_and_grace() {
        let plan = basic(0);
        let mut sub = Subscription::start("t1", &plan, at("2024-01-01T00:00:00Z"));
        let after = at("2024-02-05T00:00:00Z");
        assert_eq!(sub.effective_status(after), SubscriptionStatus::PastDue);
        assert!(sub.allows_writes(after, 7));
        assert!(!sub.allows_writes(at("2024-02-09T00:00:00Z"), 7));
        assert!(sub.refresh(after));
        assert!(!sub.refresh(after));
        assert!(sub.ensure_writable(at("2024-03-01T00:00:00Z"), 7).is_err());
    }

    #[test]
    fn test_cancel_at_period_end() {
        let plan = basic(0);
        let mut sub = Subscription::start("t1", &plan, at("2024-01-01T00:00:00Z"));
        sub.cancel(true, at("2024-01-10T00:00:00Z")).unwrap();
        assert!(sub.allows_writes(at("2024-01-20T00:00:00Z"), 7));
        assert_eq!(
            sub.effective_status(at("2024-02-02T00:00:00Z")),
            SubscriptionStatus::Cancelled
        );
        assert!(!sub.allows_writes(at("2024-02-02T00:00:00Z"), 7));
    }

    #[test]
    fn test_cancel_immediately_then_restart() {
        let plan = basic(0);
        let mut sub = Subscription::start("t1", &plan, at("2024-01-01T00:00:00Z"));
        sub.cancel(false, at("2024-01-10T00:00:00Z")).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert!(sub.cancel(false, at("2024-01-11T00:00:00Z")).is_err());

        sub.change_plan(&pro(), &Usage::default(), at("2024-01-12T00:00:00Z"))
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan_code, "pro");
    }

    #[test]
    fn test_limits() {
        let plan = basic(0);
        assert!(plan.check_limit(LimitedResource::Doctors, 1).is_ok());
        assert!(matches!(
            plan.check_limit(LimitedResource::Doctors, 2),
            Err(ClinicError::LimitExceeded { limit: 2, .. })
        ));
        assert!(pro().check_limit(LimitedResource::Patients, 1_000_000).is_ok());

        let mut sub = Subscription::start("t1", &pro(), at("2024-01-01T00:00:00Z"));
        let usage = Usage {
            doctors: 3,
            patients: 10,
        };
        assert!(sub.change_plan(&basic(0), &usage, at("2024-01-02T00:00:00Z")).is_err());
        assert_eq!(sub.plan_code, "pro");
    }
}
