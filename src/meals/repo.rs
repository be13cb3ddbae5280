use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{Meal, MealFilter, NewMeal};

const MEAL_COLUMNS: &str = "id, user_id, title, description, meal_type, calories, protein, \
     carbs, fats, portion_size, image_key, time_eaten, created_at";

pub async fn insert(db: &PgPool, m: &NewMeal) -> anyhow::Result<Meal> {
    let sql = format!(
        r#"
        INSERT INTO meals (id, user_id, title, description, meal_type, calories, protein,
                           carbs, fats, portion_size, image_key, time_eaten)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        MEAL_COLUMNS
    );
    let meal = sqlx::query_as::<_, Meal>(&sql)
        .bind(m.id)
        .bind(m.user_id)
        .bind(&m.title)
        .bind(&m.description)
        .bind(m.meal_type.as_str())
        .bind(m.calories)
        .bind(m.protein)
        .bind(m.carbs)
        .bind(m.fats)
        .bind(&m.portion_size)
        .bind(&m.image_key)
        .bind(&m.time_eaten)
        .fetch_one(db)
        .await
        .context("insert meal")?;
    Ok(meal)
}

/// Owner's meals, newest first.
pub async fn list_by_user(db: &PgPool, user_id: Uuid, f: &MealFilter) -> anyhow::Result<Vec<Meal>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM meals
        WHERE user_id = $1
          AND ($2::text IS NULL OR title ILIKE $2 ESCAPE '\' OR description ILIKE $2 ESCAPE '\')
          AND ($3::text IS NULL OR meal_type = $3)
        ORDER BY created_at DESC, id DESC
        LIMIT $4 OFFSET $5
        "#,
        MEAL_COLUMNS
    );
    let rows = sqlx::query_as::<_, Meal>(&sql)
        .bind(user_id)
        .bind(f.pattern.as_deref())
        .bind(f.meal_type.map(|t| t.as_str()))
        .bind(f.limit)
        .bind(f.offset)
        .fetch_all(db)
        .await
        .context("list meals")?;
    Ok(rows)
}

pub async fn get_by_id(db: &PgPool, user_id: Uuid, meal_id: Uuid) -> anyhow::Result<Option<Meal>> {
    let sql = format!(
        "SELECT {} FROM meals WHERE id = $1 AND user_id = $2",
        MEAL_COLUMNS
    );
    let meal = sqlx::query_as::<_, Meal>(&sql)
        .bind(meal_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
        .context("get meal")?;
    Ok(meal)
}

/// Deletes an owned meal and returns what was removed.
pub async fn delete(db: &PgPool, user_id: Uuid, meal_id: Uuid) -> anyhow::Result<Option<Meal>> {
    let sql = format!(
        "DELETE FROM meals WHERE id = $1 AND user_id = $2 RETURNING {}",
        MEAL_COLUMNS
    );
    let meal = sqlx::query_as::<_, Meal>(&sql)
        .bind(meal_id)
        .bind(user_id)
        .fetch_optional(db)
        .await
        .context("delete meal")?;
    Ok(meal)
}

/// Points an owned meal at a new image. `None` when the meal does not exist,
/// otherwise the previous key (if any).
pub async fn replace_image_key(
    db: &PgPool,
    user_id: Uuid,
    meal_id: Uuid,
    key: &str,
) -> anyhow::Result<Option<Option<String>>> {
    let mut tx = db.begin().await.context("begin tx")?;

    let old: Option<(Option<String>,)> = sqlx::query_as(
        "SELECT image_key FROM meals WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(meal_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .context("lock meal")?;

    let Some((old_key,)) = old else {
        return Ok(None);
    };

    sqlx::query("UPDATE meals SET image_key = $2 WHERE id = $1")
        .bind(meal_id)
        .bind(key)
        .execute(&mut *tx)
        .await
        .context("update image key")?;

    tx.commit().await.context("commit tx")?;
    Ok(Some(old_key))
}
