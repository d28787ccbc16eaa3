use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Patisserie API",
        version = "1.0.0",
        description = r#"
Backend for a patisserie click-and-collect shop.

- **Orders**: on-site intake with first-order pre-authorization gating
- **Checkout**: hosted payment sessions (immediate charge or card hold) with
  idempotent confirmation
- **Admin**: order lifecycle, hold capture/release, special codes,
  notification error log
- **Cron**: pickup-reminder dispatch and expired-hold release

All endpoints require a bearer token; cron and internal endpoints use the
shared service secret instead.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Customer order intake and queries"),
        (name = "Checkout", description = "Payment and pre-authorization sessions"),
        (name = "Admin", description = "Back-office operations"),
        (name = "Cron", description = "Scheduler-invoked sweeps"),
        (name = "Internal", description = "Server-to-server notification dispatch")
    ),
    paths(
        // Orders
        crate::handlers::orders::place_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,

        // Checkout
        crate::handlers::checkout::create_payment_session,
        crate::handlers::checkout::confirm_payment,
        crate::handlers::checkout::create_preauth_session,
        crate::handlers::checkout::confirm_preauth,

        // Admin
        crate::handlers::admin::list_all_orders,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::capture_preauth,
        crate::handlers::admin::release_preauth,
        crate::handlers::admin::generate_special_code,
        crate::handlers::admin::list_special_codes,
        crate::handlers::admin::recent_notification_errors,

        // Cron
        crate::handlers::cron::dispatch_reminders,
        crate::handlers::cron::release_expired_preauths,

        // Internal
        crate::handlers::notifications::send_email,
        crate::handlers::notifications::send_sms,
        crate::handlers::notifications::print_receipts,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::checkout::CustomerInfo,
        crate::services::checkout::PlaceOrderRequest,
        crate::services::checkout::SessionResponse,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderListResponse,
        crate::services::orders::UpdateOrderStatusRequest,
        crate::services::payments::PreAuthResponse,
        crate::services::payments::ExpirySweepSummary,
        crate::services::special_codes::SpecialCodeResponse,
        crate::services::notifications::RecentErrorEntry,
        crate::services::notifications::reminders::SweepSummary,
        crate::handlers::checkout::ConfirmSessionRequest,
        crate::handlers::admin::CaptureRequest,
        crate::handlers::admin::GenerateCodeRequest,
        crate::handlers::notifications::SendEmailRequest,
        crate::handlers::notifications::SendSmsRequest,
        crate::handlers::notifications::PrintOrderRequest,
    ))
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
