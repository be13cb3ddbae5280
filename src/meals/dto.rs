use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::meals::repo_types::MealType;

/// Body of `POST /meals`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMealRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meal_type: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    #[serde(default)]
    pub portion_size: String,
    #[serde(default)]
    pub time_eaten: String,
    pub image_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedMealResponse {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MealListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub q: Option<String>,
    pub meal_type: Option<String>,
}
fn default_limit() -> i64 { 20 }

impl Default for MealListQuery {
    fn default() -> Self {
        Self { limit: default_limit(), offset: 0, q: None, meal_type: None }
    }
}

/// List entry, also the element type of live snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct MealSummary {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub meal_type: MealType,
    pub calories: Option<f64>,
    pub time_eaten: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_ago: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MealDetails {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub meal_type: MealType,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub portion_size: String,
    pub time_eaten: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_at_display: String,
    pub created_ago: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_url: String,
}
