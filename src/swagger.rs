use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{BillingCycle, DurationUnit, InputType, PackageName, PaymentPlan};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::signup,
        handlers::auth::signin,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::forgot_password,
        handlers::auth::verify_otp,
        handlers::auth::reset_password,
        handlers::auth::profile,
        handlers::package::list_packages,
        handlers::package::get_package,
        handlers::package::get_yearly_price,
        handlers::usage::get_usage,
        handlers::soap_note::create_soap_note,
        handlers::soap_note::create_soap_note_with_key,
        handlers::soap_note::list_soap_notes,
        handlers::soap_note::get_soap_note,
        handlers::soap_note::update_soap_note,
        handlers::soap_note::delete_soap_note,
        handlers::payment::create_payment_intent,
        handlers::payment::confirm_payment,
    ),
    components(
        schemas(
            SignupRequest,
            SigninRequest,
            UserResponse,
            AuthResponse,
            ForgotPasswordRequest,
            VerifyOtpRequest,
            ResetPasswordRequest,
            ProfileResponse,
            PackageName,
            BillingCycle,
            DurationUnit,
            AudioFileLength,
            PackageFeatures,
            PackageResponse,
            YearlyPriceResponse,
            UsageResponse,
            InputType,
            AudioPayload,
            CreateSoapNoteRequest,
            UpdateSoapNoteRequest,
            SoapSections,
            AudioFileInfo,
            SoapNoteResponse,
            PaymentPlan,
            CreatePaymentIntentRequest,
            CreatePaymentIntentResponse,
            ConfirmPaymentRequest,
            PaymentResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Account and token API"),
        (name = "packages", description = "Subscription package catalog"),
        (name = "usage", description = "API key usage"),
        (name = "soapnotes", description = "SOAP note generation, metered by API key"),
        (name = "payments", description = "Package purchase via Stripe"),
    ),
    info(
        title = "SOAP Note Backend API",
        version = "1.0.0",
        description = "SOAP note generation REST API with per-key quota metering"
    ),
    servers(
        (url = "/", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_metered_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/soapnotes"));
        assert!(doc.paths.paths.contains_key("/api/packages/{id}/yearly-price"));
        assert!(doc.paths.paths.contains_key("/api/auth/reset-password"));
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.security_schemes.contains_key("api_key"));
    }
}
