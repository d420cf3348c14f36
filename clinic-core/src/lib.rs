pub mod appointment;
pub mod audit;
pub mod doctor;
pub mod error;
pub mod error_body;
pub mod invoice;
pub mod money;
pub mod patient;
pub mod phi;
pub mod prescription;
pub mod queue;
pub mod record;
pub mod subscription;
pub mod tenant;

pub use appointment::{Appointment, AppointmentKind, AppointmentRequest, AppointmentStatus};
pub use audit::{AuditEvent, AuditOutcome, AuditSink};
pub use doctor::{Doctor, DoctorInput};
pub use error::{ClinicError, Result};
pub use error_body::{ErrorBody, ErrorCode};
pub use invoice::{
    Discount, Invoice, InvoiceItem, InvoiceStatus, InvoiceTotals, InvoiceView, Payment,
    PaymentMethod,
};
pub use money::{Currency, Money, Rate};
pub use patient::{Patient, PatientInput, PatientPhi, SealedPatient};
pub use phi::{PhiCipher, PlaintextCipher};
pub use prescription::{
    Prescription, PrescriptionInput, PrescriptionItem, PrescriptionStatus, PrescriptionUpdate,
};
pub use queue::{DoctorQueue, NewQueueEntry, QueueEntry, QueuePriority, QueueSnapshot, QueueStatus};
pub use record::{Record, RecordMeta};
pub use subscription::{BillingInterval, LimitedResource, Plan, Subscription, SubscriptionStatus, Usage};
pub use tenant::TenantSettings;
