use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    #[default]
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub const ALL: [MealType; 3] = [MealType::Breakfast, MealType::Lunch, MealType::Dinner];

    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
        }
    }

    /// Case-insensitive, `None` for anything unknown.
    pub fn parse(value: &str) -> Option<MealType> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(value))
    }

    /// Stored values decode leniently: unknown becomes breakfast.
    pub fn from_db(value: &str) -> MealType {
        Self::parse(value).unwrap_or_default()
    }
}

/// Meal row as stored.
#[derive(Debug, Clone, FromRow)]
pub struct Meal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub meal_type: String,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub portion_size: String,
    pub image_key: Option<String>,
    pub time_eaten: String,
    pub created_at: OffsetDateTime,
}

impl Meal {
    pub fn kind(&self) -> MealType {
        MealType::from_db(&self.meal_type)
    }
}

/// Validated, trimmed input for an insert.
#[derive(Debug, Clone)]
pub struct NewMeal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub meal_type: MealType,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fats: Option<f64>,
    pub portion_size: String,
    pub image_key: Option<String>,
    pub time_eaten: String,
}

#[derive(Debug, Clone, Default)]
pub struct MealFilter {
    /// Already escaped LIKE pattern.
    pub pattern: Option<String>,
    pub meal_type: Option<MealType>,
    pub limit: i64,
    pub offset: i64,
}
