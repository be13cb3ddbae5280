use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::format::{format_timestamp, relative_time};
use crate::images::services::{
    decode_base64_image, delete_best_effort, presign, presign_opt, store_meal_image, ImageUpload,
};
use crate::meals::dto::{CreateMealRequest, MealDetails, MealListQuery, MealSummary};
use crate::meals::repo;
use crate::meals::repo_types::{Meal, MealFilter, MealType, NewMeal};
use crate::state::AppState;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 300;
pub const MAX_PAGE: i64 = 100;

/// Returns the meal type to store. Rules run in form order; first failure wins.
pub fn validate_new_meal(req: &CreateMealRequest) -> Result<MealType, ApiError> {
    let rule = |bad: bool, msg: &str| if bad { Err(ApiError::validation(msg)) } else { Ok(()) };

    rule(req.title.trim().is_empty(), "Title is required")?;
    rule(
        req.title.chars().count() > MAX_TITLE_CHARS,
        "Title must be 100 characters or less",
    )?;
    rule(req.description.trim().is_empty(), "Description is required")?;
    rule(
        req.description.chars().count() > MAX_DESCRIPTION_CHARS,
        "Description must be 300 characters or less",
    )?;
    rule(req.time_eaten.trim().is_empty(), "Time of consumption is required")?;
    rule(req.portion_size.trim().is_empty(), "Portion size is required")?;

    for v in [req.calories, req.protein, req.carbs, req.fats].into_iter().flatten() {
        rule(!v.is_finite() || v < 0.0, "Macros must be non-negative numbers")?;
    }

    match req.meal_type.as_deref().map(str::trim) {
        None | Some("") => Ok(MealType::default()),
        Some(t) => MealType::parse(t).ok_or_else(|| ApiError::validation("Unknown meal type")),
    }
}

/// Escapes LIKE wildcards so the term matches literally as a substring.
pub fn like_pattern(term: &str) -> Option<String> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    Some(out)
}

pub fn build_filter(q: &MealListQuery) -> Result<MealFilter, ApiError> {
    let meal_type = match q.meal_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(t) => Some(MealType::parse(t).ok_or_else(|| ApiError::validation("Unknown meal type"))?),
    };
    Ok(MealFilter {
        pattern: q.q.as_deref().and_then(like_pattern),
        meal_type,
        limit: q.limit.clamp(1, MAX_PAGE),
        offset: q.offset.max(0),
    })
}

/// Validates, stores the optional photo, writes the row and notifies listeners.
pub async fn create_meal(st: &AppState, user_id: Uuid, req: CreateMealRequest) -> ApiResult<Meal> {
    let meal_type = validate_new_meal(&req)?;
    let image = req
        .image_base64
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| decode_base64_image(s, st.config.images.max_bytes))
        .transpose()?;

    let meal_id = Uuid::new_v4();
    let image_key = match image {
        Some(img) => Some(store_meal_image(st, user_id, meal_id, img).await?),
        None => None,
    };

    let new = NewMeal {
        id: meal_id,
        user_id,
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        meal_type,
        calories: req.calories,
        protein: req.protein,
        carbs: req.carbs,
        fats: req.fats,
        portion_size: req.portion_size.trim().to_string(),
        image_key,
        time_eaten: req.time_eaten.trim().to_string(),
    };

    let meal = match repo::insert(&st.db, &new).await {
        Ok(m) => m,
        Err(e) => {
            if let Some(key) = &new.image_key {
                delete_best_effort(st, key).await;
            }
            return Err(e.into());
        }
    };

    info!(
        %user_id,
        meal_id = %meal.id,
        meal_type = meal_type.as_str(),
        has_image = meal.image_key.is_some(),
        "meal tracked"
    );
    st.events.publish(meal.user_id);
    Ok(meal)
}

pub async fn get_meal(st: &AppState, user_id: Uuid, meal_id: Uuid) -> ApiResult<Meal> {
    repo::get_by_id(&st.db, user_id, meal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meal not found"))
}

pub async fn delete_meal(st: &AppState, user_id: Uuid, meal_id: Uuid) -> ApiResult<()> {
    let meal = repo::delete(&st.db, user_id, meal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meal not found"))?;
    if let Some(key) = &meal.image_key {
        delete_best_effort(st, key).await;
    }
    info!(user_id = %meal.user_id, %meal_id, "meal deleted");
    st.events.publish(meal.user_id);
    Ok(())
}

/// Swaps the meal's photo and returns a presigned URL for the new one.
pub async fn replace_image(
    st: &AppState,
    user_id: Uuid,
    meal_id: Uuid,
    image: ImageUpload,
) -> ApiResult<String> {
    let key = store_meal_image(st, user_id, meal_id, image).await?;
    let previous = match repo::replace_image_key(&st.db, user_id, meal_id, &key).await {
        Ok(Some(prev)) => prev,
        Ok(None) => {
            delete_best_effort(st, &key).await;
            return Err(ApiError::not_found("Meal not found"));
        }
        Err(e) => {
            delete_best_effort(st, &key).await;
            return Err(e.into());
        }
    };
    if let Some(old) = previous {
        delete_best_effort(st, &old).await;
    }
    st.events.publish(user_id);
    Ok(presign(st, &key).await?)
}

pub async fn to_summary(st: &AppState, m: Meal, now: OffsetDateTime) -> anyhow::Result<MealSummary> {
    let image_url = presign_opt(st, m.image_key.as_deref()).await?;
    Ok(MealSummary {
        meal_type: m.kind(),
        created_ago: relative_time(m.created_at, now),
        id: m.id,
        title: m.title,
        description: m.description,
        calories: m.calories,
        time_eaten: m.time_eaten,
        created_at: m.created_at,
        image_url,
    })
}

pub async fn to_details(st: &AppState, m: Meal, now: OffsetDateTime) -> anyhow::Result<MealDetails> {
    let image_url = presign_opt(st, m.image_key.as_deref()).await?;
    Ok(MealDetails {
        meal_type: m.kind(),
        created_at_display: format_timestamp(m.created_at),
        created_ago: relative_time(m.created_at, now),
        id: m.id,
        title: m.title,
        description: m.description,
        calories: m.calories,
        protein: m.protein,
        carbs: m.carbs,
        fats: m.fats,
        portion_size: m.portion_size,
        time_eaten: m.time_eaten,
        created_at: m.created_at,
        image_url,
    })
}

pub async fn list_summaries(
    st: &AppState,
    user_id: Uuid,
    filter: &MealFilter,
) -> anyhow::Result<Vec<MealSummary>> {
    let meals = repo::list_by_user(&st.db, user_id, filter).await?;
    let now = OffsetDateTime::now_utc();
    let mut out = Vec::with_capacity(meals.len());
    for m in meals {
        out.push(to_summary(st, m, now).await?);
    }
    Ok(out)
}

/// Plain-text card for sharing a meal with other apps.
pub fn share_text(m: &Meal) -> String {
    let num = |v: Option<f64>, missing: &str| v.map(|n| n.to_string()).unwrap_or_else(|| missing.into());
    format!(
        "Check out this meal!\n\n\
         Title: {}\n\
         Description: {}\n\
         Type: {}\n\
         Portion Size: {}\n\
         Protein: {}g\n\
         Carbs: {}g\n\
         Fats: {}g\n\
         Calories: {}\n\
         Consumed at: {}\n",
        m.title,
        m.description,
        m.kind().display_name(),
        m.portion_size,
        num(m.protein, "0"),
        num(m.carbs, "0"),
        num(m.fats, "0"),
        num(m.calories, "N/A"),
        format_timestamp(m.created_at),
    )
}
