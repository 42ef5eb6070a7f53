use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub const SWAGGER_PATH: &str = "/docs";
pub const OPENAPI_PATH: &str = "/api-doc/openapi.json";

/// Swagger UI over the webhook document.
pub fn router() -> Router<SharedState> {
    SwaggerUi::new(SWAGGER_PATH)
        .url(OPENAPI_PATH, ApiDoc::openapi())
        .into()
}
