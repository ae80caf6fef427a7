use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use sha2::Digest;
use sha2::Sha256;

use crate::command::Command;
use crate::command::CommandResult;
use crate::core::Core;

/// Thin adapter over `Core::handle`: deserializes the JSON body into a
/// `Command` and serializes whatever comes back (SPEC_FULL.md §6). The
/// control-API token is opaque and checked against the stored hash on the
/// `instance` row, not against `Settings` — an instance's token can be
/// rotated without a redeploy. No token configured means no check, which is
/// the local/test default (`configuration/local.yaml` leaves it unset).
pub async fn handle_command(
    req: HttpRequest,
    core: web::Data<std::sync::Arc<Core>>,
    body: web::Json<Command>,
) -> HttpResponse {
    match authorize(&req, &core).await {
        Ok(()) => {}
        Err(resp) => return resp,
    }

    let result = core.handle(body.into_inner()).await;
    if result.ok {
        HttpResponse::Ok().json(result)
    } else {
        HttpResponse::BadRequest().json(result)
    }
}

async fn authorize(req: &HttpRequest, core: &Core) -> Result<(), HttpResponse> {
    let Ok(instance) = core.store.get_instance().await else {
        return Ok(());
    };
    let Some(expected_hash) = instance.api_token_hash else {
        return Ok(());
    };

    let provided = req
        .headers()
        .get("X-API-Token")
        .and_then(|v| v.to_str().ok());

    let Some(token) = provided else {
        return Err(HttpResponse::Unauthorized().json(unauthorized("missing X-API-Token header")));
    };

    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    if digest == expected_hash {
        Ok(())
    } else {
        Err(HttpResponse::Unauthorized().json(unauthorized("invalid API token")))
    }
}

fn unauthorized(message: &str) -> CommandResult {
    CommandResult {
        ok: false,
        error: Some(message.to_string()),
        data: None,
    }
}
