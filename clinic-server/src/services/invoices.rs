use clinic_core::{
    Discount, Invoice, InvoiceItem, InvoiceStatus, InvoiceView, Money, Payment, PaymentMethod,
    Result, SealedPatient,
};
use serde::Deserialize;

use super::{filter_value, new_id, ClinicService};

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub patient_id: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub discount: Option<Discount>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Replacement contents of a draft
#[derive(Debug, Deserialize)]
pub struct InvoiceUpdate {
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub discount: Option<Discount>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// Major units, e.g. "12.50"
    pub amount: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub status: Option<InvoiceStatus>,
    pub patient_id: Option<String>,
}

impl ClinicService<'_> {
    pub fn create_invoice(&self, request: InvoiceRequest) -> Result<InvoiceView> {
        self.write_tx(|ops| {
            ops.require::<SealedPatient>(self.tenant_id, &request.patient_id)?;
            let number = ops.next_sequence(self.tenant_id, "invoice")?;
            let mut invoice = Invoice::new(
                new_id(),
                self.tenant_id.to_string(),
                format!("INV-{:06}", number),
                request.patient_id,
                self.settings.currency.clone(),
                self.now,
            );
            invoice.set_items(request.items)?;
            invoice.set_discount(request.discount)?;
            invoice.notes = request.notes;
            let view = invoice.view()?;
            ops.insert(&invoice)?;
            Ok(view)
        })
    }

    pub fn get_invoice(&self, id: &str) -> Result<InvoiceView> {
        self.store.require::<Invoice>(self.tenant_id, id)?.view()
    }

    pub fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<InvoiceView>> {
        let status = query.status.as_ref().map(filter_value).transpose()?;
        let mut filters: Vec<(&str, &str)> = Vec::new();
        if let Some(ref status) = status {
            filters.push(("status", status));
        }
        if let Some(ref patient_id) = query.patient_id {
            filters.push(("patient_id", patient_id));
        }
        self.store
            .list_by::<Invoice>(self.tenant_id, &filters)?
            .iter()
            .map(Invoice::view)
            .collect()
    }

    fn mutate_invoice<F>(&self, id: &str, f: F) -> Result<InvoiceView>
    where
        F: FnOnce(&mut Invoice) -> Result<()>,
    {
        self.write_tx(|ops| {
            let mut invoice = ops.require::<Invoice>(self.tenant_id, id)?;
            f(&mut invoice)?;
            ops.update(&mut invoice, self.now)?;
            invoice.view()
        })
    }

    pub fn update_invoice(&self, id: &str, update: InvoiceUpdate) -> Result<InvoiceView> {
        self.mutate_invoice(id, |invoice| {
            invoice.set_items(update.items)?;
            invoice.set_discount(update.discount)?;
            invoice.notes = update.notes;
            Ok(())
        })
    }

    pub fn issue_invoice(&self, id: &str) -> Result<InvoiceView> {
        let view = self.mutate_invoice(id, |invoice| {
            invoice.issue(self.now, self.billing.payment_terms_days)
        })?;
        tracing::info!(
            tenant_id = %self.tenant_id,
            invoice = %view.invoice.invoice_number,
            grand_total = %view.display.grand_total,
            "Invoice issued"
        );
        Ok(view)
    }

    pub fn record_invoice_payment(&self, id: &str, request: PaymentRequest) -> Result<InvoiceView> {
        let view = self.mutate_invoice(id, |invoice| {
            let amount = Money::from_major_str(&request.amount, invoice.currency.clone())?;
            invoice.record_payment(Payment {
                id: new_id(),
                amount: amount.minor,
                method: request.method,
                reference: request.reference,
                paid_at: self.now,
            })?;
            Ok(())
        })?;
        tracing::info!(
            tenant_id = %self.tenant_id,
            invoice = %view.invoice.invoice_number,
            status = ?view.invoice.status,
            balance_due = %view.display.balance_due,
            "Payment recorded"
        );
        Ok(view)
    }

    pub fn void_invoice(&self, id: &str) -> Result<InvoiceView> {
        self.mutate_invoice(id, Invoice::void)
    }
}
