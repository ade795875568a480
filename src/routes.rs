use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;

use crate::annotate::Annotator;
use crate::codec;
use crate::error::ServiceError;
use crate::model::{InferenceResult, ModelAdapter};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict/").route(web::post().to(handle_predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

/// Pipeline for one request: validate -> decode -> infer -> annotate ->
/// encode -> respond. Validation failures return immediately; everything
/// downstream is converted to the generic 500 contract at the boundary.
async fn handle_predict(
    model: web::Data<ModelAdapter>,
    annotator: web::Data<Annotator>,
    payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let image_data = read_upload(payload).await?;
    let image = codec::decode(&image_data)?;

    let result = model.infer(&image)?;

    // Classification responses carry the unmodified input; detections get
    // boxes and label tags drawn on a copy.
    let processed = match &result {
        InferenceResult::Detections(detections) => annotator.annotate(&image, detections),
        InferenceResult::Scores(_) => image,
    };

    let png = codec::encode_png(&processed)?;
    Ok(HttpResponse::Ok().json(json!({
        "predictions": result,
        "processed_image": codec::to_data_uri(&png, "image/png"),
    })))
}

/// Reads the first non-empty file field of the multipart payload, rejecting
/// fields whose declared content type is not an image.
async fn read_upload(mut payload: Multipart) -> Result<Vec<u8>, ServiceError> {
    let mut image_data = Vec::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        if let Some(content_type) = field.content_type() {
            if content_type.type_() != mime::IMAGE {
                return Err(ServiceError::InvalidInput(format!(
                    "unsupported content type '{}', expected an image upload",
                    content_type
                )));
            }
        }

        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| {
                ServiceError::InvalidInput(format!("malformed multipart payload: {}", e))
            })?;
            image_data.extend_from_slice(&data);
        }
        if !image_data.is_empty() {
            break;
        }
    }

    if image_data.is_empty() {
        return Err(ServiceError::InvalidInput(
            "no image file found in the upload".to_string(),
        ));
    }
    Ok(image_data)
}

/// Liveness check. No side effects, no model dependency.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "healthy" }))
}
