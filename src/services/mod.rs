pub mod api_key_service;
pub mod auth_service;
pub mod package_service;
pub mod payment_service;
pub mod rate_limit_service;
pub mod soap_note_service;

pub use api_key_service::ApiKeyService;
pub use auth_service::*;
pub use package_service::*;
pub use payment_service::*;
pub use rate_limit_service::*;
pub use soap_note_service::*;
