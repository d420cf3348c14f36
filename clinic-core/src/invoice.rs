//! Invoices and their totals
//!
//! All arithmetic is on integer minor units; every rounding step rounds half
//! away from zero (see [`Rate::apply`]).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::money::{Currency, Money, Rate};
use crate::record::RecordMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Consultation,
    Drug,
    Lab,
    Procedure,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    #[serde(default)]
    pub kind: LineKind,
    pub quantity: u32,
    /// Minor units
    pub unit_price: i64,
    #[serde(default)]
    pub discount: Rate,
    #[serde(default)]
    pub tax: Rate,
}

impl InvoiceItem {
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(ClinicError::invalid_field("description", "description is required"));
        }
        if self.quantity == 0 {
            return Err(ClinicError::invalid_field("quantity", "quantity must be at least 1"));
        }
        if self.unit_price < 0 {
            return Err(ClinicError::invalid_field(
                "unit_price",
                "unit price cannot be negative",
            ));
        }
        self.discount.validate("discount")?;
        self.tax.validate("tax")?;
        Ok(())
    }

    fn gross(&self) -> Result<i64> {
        (self.quantity as i64)
            .checked_mul(self.unit_price)
            .ok_or_else(|| ClinicError::invalid_field("unit_price", "line amount overflow"))
    }
}

/// Invoice-level discount applied to the discounted line nets, before tax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    Percent(Rate),
    /// Minor units
    Amount(i64),
}

impl Discount {
    pub fn validate(&self) -> Result<()> {
        match self {
            Discount::Percent(rate) => rate.validate("discount"),
            Discount::Amount(a) if *a < 0 => Err(ClinicError::invalid_field(
                "discount",
                "discount amount cannot be negative",
            )),
            Discount::Amount(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Insurance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Minor units
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Draft, Issued)
                | (Draft, Void)
                | (Issued, PartiallyPaid)
                | (Issued, Paid)
                | (Issued, Void)
                | (PartiallyPaid, PartiallyPaid)
                | (PartiallyPaid, Paid)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub gross: i64,
    /// Line discount plus this line's share of the invoice discount
    pub discount: i64,
    pub net: i64,
    pub tax: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub lines: Vec<LineTotals>,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub grand_total: i64,
    pub amount_paid: i64,
    pub balance_due: i64,
}

fn overflow() -> ClinicError {
    ClinicError::invalid_field("unit_price", "invoice amount overflow")
}

fn checked_sum(values: impl IntoIterator<Item = i64>) -> Result<i64> {
    values
        .into_iter()
        .try_fold(0i64, |acc, v| acc.checked_add(v))
        .ok_or_else(overflow)
}

/// Compute line and invoice totals
///
/// Every sum is checked; amounts that leave the `i64` range are a validation error.
pub fn compute_totals(
    items: &[InvoiceItem],
    discount: Option<&Discount>,
    payments: &[Payment],
) -> Result<InvoiceTotals> {
    let mut gross = Vec::with_capacity(items.len());
    let mut line_discount = Vec::with_capacity(items.len());
    let mut nets = Vec::with_capacity(items.len());
    for item in items {
        let g = item.gross()?;
        let d = item.discount.apply(g);
        gross.push(g);
        line_discount.push(d);
        nets.push(g.checked_sub(d).ok_or_else(overflow)?);
    }

    let shares = match discount {
        None => vec![0; items.len()],
        Some(Discount::Percent(rate)) => nets.iter().map(|&n| rate.apply(n)).collect(),
        Some(Discount::Amount(amount)) => distribute(*amount, &nets)?,
    };

    let mut lines = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let net = nets[i].checked_sub(shares[i]).ok_or_else(overflow)?;
        let tax = item.tax.apply(net);
        lines.push(LineTotals {
            gross: gross[i],
            discount: line_discount[i].checked_add(shares[i]).ok_or_else(overflow)?,
            net,
            tax,
            total: net.checked_add(tax).ok_or_else(overflow)?,
        });
    }

    let subtotal = checked_sum(lines.iter().map(|l| l.gross))?;
    let discount_total = checked_sum(lines.iter().map(|l| l.discount))?;
    let tax_total = checked_sum(lines.iter().map(|l| l.tax))?;
    let grand_total = subtotal
        .checked_sub(discount_total)
        .and_then(|v| v.checked_add(tax_total))
        .ok_or_else(overflow)?;
    let amount_paid = checked_sum(payments.iter().map(|p| p.amount))?;
    let balance_due = grand_total.checked_sub(amount_paid).ok_or_else(overflow)?;

    Ok(InvoiceTotals {
        lines,
        subtotal,
        discount_total,
        tax_total,
        grand_total,
        amount_paid,
        balance_due,
    })
}

/// Split `amount` (capped at the sum of `weights`) pro rata by largest remainder
fn distribute(amount: i64, weights: &[i64]) -> Result<Vec<i64>> {
    let total = checked_sum(weights.iter().copied())?;
    if total <= 0 || amount <= 0 {
        return Ok(vec![0; weights.len()]);
    }
    let amount = amount.min(total) as i128;
    let total = total as i128;

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (i, &w) in weights.iter().enumerate() {
        let exact = amount * w as i128;
        shares.push((exact / total) as i64);
        remainders.push((exact % total, i));
    }
    // Shares never exceed their weights, so their sum stays within `total`
    let mut leftover = amount as i64 - checked_sum(shares.iter().copied())?;
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }
    Ok(shares)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: String,
    pub invoice_number: String,
    pub patient_id: String,
    pub prescription_id: Option<String>,
    pub currency: Currency,
    pub items: Vec<InvoiceItem>,
    pub discount: Option<Discount>,
    pub status: InvoiceStatus,
    pub payments: Vec<Payment>,
    pub issued_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    pub meta: RecordMeta,
}

impl_record!(Invoice, "invoices");

impl Invoice {
    pub fn new(
        id: String,
        tenant_id: String,
        invoice_number: String,
        patient_id: String,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            invoice_number,
            patient_id,
            prescription_id: None,
            currency,
            items: Vec::new(),
            discount: None,
            status: InvoiceStatus::Draft,
            payments: Vec::new(),
            issued_at: None,
            due_date: None,
            notes: None,
            meta: RecordMeta::new(now),
        }
    }

    pub fn totals(&self) -> Result<InvoiceTotals> {
        compute_totals(&self.items, self.discount.as_ref(), &self.payments)
    }

    fn ensure_draft(&self) -> Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(ClinicError::Conflict(format!(
                "invoice {} is {:?}; only drafts can be edited",
                self.invoice_number, self.status
            )));
        }
        Ok(())
    }

    fn set_status(&mut self, next: InvoiceStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                invoice = %self.invoice_number,
                from = ?self.status,
                to = ?next,
                "Rejected invoice transition"
            );
            return Err(ClinicError::transition("invoice", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn set_items(&mut self, items: Vec<InvoiceItem>) -> Result<()> {
        self.ensure_draft()?;
        for item in &items {
            item.validate()?;
        }
        compute_totals(&items, self.discount.as_ref(), &self.payments)?;
        self.items = items;
        Ok(())
    }

    pub fn add_item(&mut self, item: InvoiceItem) -> Result<()> {
        self.ensure_draft()?;
        item.validate()?;
        self.items.push(item);
        if let Err(e) = self.totals() {
            self.items.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn set_discount(&mut self, discount: Option<Discount>) -> Result<()> {
        self.ensure_draft()?;
        if let Some(ref d) = discount {
            d.validate()?;
        }
        self.discount = discount;
        Ok(())
    }

    /// Finalize the draft for payment; a zero total is settled immediately
    pub fn issue(&mut self, now: DateTime<Utc>, payment_terms_days: u32) -> Result<()> {
        if self.status == InvoiceStatus::Draft && self.items.is_empty() {
            return Err(ClinicError::validation("cannot issue an invoice without items"));
        }
        let totals = self.totals()?;
        self.set_status(InvoiceStatus::Issued)?;
        self.issued_at = Some(now);
        self.due_date = Some(now.date_naive() + Duration::days(payment_terms_days as i64));
        if totals.grand_total == 0 {
            self.set_status(InvoiceStatus::Paid)?;
        }
        Ok(())
    }

    pub fn record_payment(&mut self, payment: Payment) -> Result<InvoiceTotals> {
        if !matches!(
            self.status,
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid
        ) {
            return Err(ClinicError::Conflict(format!(
                "invoice {} is {:?}; payments need an issued invoice",
                self.invoice_number, self.status
            )));
        }
        if payment.amount <= 0 {
            return Err(ClinicError::invalid_field("amount", "payment must be positive"));
        }
        let before = self.totals()?;
        if payment.amount > before.balance_due {
            return Err(ClinicError::invalid_field(
                "amount",
                format!(
                    "payment {} exceeds balance due {}",
                    Money::new(payment.amount, self.currency.clone()),
                    Money::new(before.balance_due, self.currency.clone())
                ),
            ));
        }
        self.payments.push(payment);
        let after = self.totals()?;
        let next = if after.balance_due == 0 {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };
        self.set_status(next)?;
        Ok(after)
    }

    pub fn void(&mut self) -> Result<()> {
        if !self.payments.is_empty() {
            return Err(ClinicError::Conflict(format!(
                "invoice {} has payments and cannot be voided",
                self.invoice_number
            )));
        }
        self.set_status(InvoiceStatus::Void)
    }

    pub fn view(&self) -> Result<InvoiceView> {
        let totals = self.totals()?;
        let fmt = |minor: i64| Money::new(minor, self.currency.clone()).to_major_string();
        Ok(InvoiceView {
            display: TotalsDisplay {
                subtotal: fmt(totals.subtotal),
                discount_total: fmt(totals.discount_total),
                tax_total: fmt(totals.tax_total),
                grand_total: fmt(totals.grand_total),
                amount_paid: fmt(totals.amount_paid),
                balance_due: fmt(totals.balance_due),
            },
            invoice: self.clone(),
            totals,
        })
    }
}

/// Major-unit strings for display
#[derive(Debug, Clone, Serialize)]
pub struct TotalsDisplay {
    pub subtotal: String,
    pub discount_total: String,
    pub tax_total: String,
    pub grand_total: String,
    pub amount_paid: String,
    pub balance_due: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub totals: InvoiceTotals,
    pub display: TotalsDisplay,
}
