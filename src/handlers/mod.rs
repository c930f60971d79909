pub mod auth;
pub mod package;
pub mod payment;
pub mod soap_note;
pub mod usage;

pub use auth::auth_config;
pub use package::package_config;
pub use payment::payment_config;
pub use soap_note::soap_note_config;
pub use usage::usage_config;
