use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    config::ImageConfig,
    error::{ApiError, ApiResult},
    images::services::{accept_image, presign, too_large, UNREADABLE_IMAGE},
    meals::{
        dto::{
            CreateMealRequest, CreatedMealResponse, ImageResponse, MealDetails, MealListQuery,
            MealSummary,
        },
        services,
        stream::stream_meals,
    },
    state::AppState,
};

/// Room for the text fields and multipart framing around a photo.
const BODY_SLACK: usize = 64 * 1024;

/// JSON bodies carry Base64 photos, which inflate by a third.
fn json_body_limit(max_image: usize) -> usize {
    max_image.div_ceil(3) * 4 + BODY_SLACK
}

fn multipart_body_limit(max_image: usize) -> usize {
    max_image + BODY_SLACK
}

pub fn meal_routes(images: &ImageConfig) -> Router<AppState> {
    Router::new()
        .route(
            "/meals",
            get(list_meals)
                .post(create_meal)
                .layer(DefaultBodyLimit::max(json_body_limit(images.max_bytes))),
        )
        .route("/meals/stream", get(stream_meals))
        .route("/meals/:id", get(get_meal).delete(delete_meal))
        .route("/meals/:id/share", get(share_meal))
        .route(
            "/meals/:id/image",
            get(get_meal_image)
                .put(upload_meal_image)
                .layer(DefaultBodyLimit::max(multipart_body_limit(images.max_bytes))),
        )
}

#[instrument(skip(state))]
pub async fn list_meals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<MealListQuery>,
) -> ApiResult<Json<Vec<MealSummary>>> {
    let filter = services::build_filter(&q)?;
    let items = services::list_summaries(&state, user_id, &filter).await?;
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MealDetails>> {
    let meal = services::get_meal(&state, user_id, id).await?;
    let details = services::to_details(&state, meal, OffsetDateTime::now_utc()).await?;
    Ok(Json(details))
}

/// POST /meals { title, description, meal_type?, macros?, portion_size, time_eaten, image_base64? }
#[instrument(skip(state, body))]
pub async fn create_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<CreateMealRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.map_err(|e| json_error(e, state.config.images.max_bytes))?;
    let meal = services::create_meal(&state, user_id, body).await?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/v1/meals/{}", meal.id))],
        Json(CreatedMealResponse {
            id: meal.id,
            created_at: meal.created_at,
            message: "Meal submitted successfully".into(),
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete_meal(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn share_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let meal = services::get_meal(&state, user_id, id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        services::share_text(&meal),
    ))
}

/// Temporary redirect to a presigned URL of the meal photo.
#[instrument(skip(state))]
pub async fn get_meal_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Redirect> {
    let meal = services::get_meal(&state, user_id, id).await?;
    let key = meal
        .image_key
        .ok_or_else(|| ApiError::not_found("Photo not found"))?;
    let url = presign(&state, &key).await?;
    Ok(Redirect::temporary(&url))
}

/// PUT /meals/:id/image (multipart, field `image` or `file`)
#[instrument(skip(state, mp))]
pub async fn upload_meal_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> ApiResult<Json<ImageResponse>> {
    let max = state.config.images.max_bytes;
    let mut image = None;
    loop {
        let field = match mp.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e, max)),
        };
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }
        let data = field.bytes().await.map_err(|e| multipart_error(e, max))?;
        image = Some(accept_image(data, max)?);
        break;
    }

    let image = image.ok_or_else(|| ApiError::validation("image is required"))?;
    let image_url = services::replace_image(&state, user_id, id, image).await?;
    Ok(Json(ImageResponse { image_url }))
}

/// Only an inline photo can push a meal body past the limit.
fn json_error(e: JsonRejection, max: usize) -> ApiError {
    warn!(error = %e, "meal body rejected");
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max)
    } else {
        ApiError::validation(e.body_text())
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError, max: usize) -> ApiError {
    warn!(error = %e, "multipart read failed");
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max)
    } else {
        ApiError::validation(UNREADABLE_IMAGE)
    }
}
