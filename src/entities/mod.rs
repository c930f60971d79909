pub mod api_keys;
pub mod ip_limits;
pub mod packages;
pub mod payments;
pub mod soap_notes;
pub mod users;

pub use api_keys as api_key_entity;
pub use ip_limits as ip_limit_entity;
pub use packages as package_entity;
pub use payments as payment_entity;
pub use soap_notes as soap_note_entity;
pub use users as user_entity;

pub use packages::{BillingCycle, DurationUnit, PackageName};
pub use payments::PaymentPlan;
pub use soap_notes::InputType;
